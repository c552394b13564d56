//! Minimal document model for heuristic extraction.
//!
//! Pages reach the pipeline as serialized markup snapshots; this module parses
//! a snapshot into a queryable node tree so the selector cascade can run as a
//! pure function, offline, against fixtures. The parser is deliberately
//! tolerant: case-insensitive tag handling, unclosed and mismatched tags are
//! absorbed, script/style bodies are dropped, and no input ever fails to
//! parse. It supports exactly the selector subset the cascade tables need
//! (see `selector`), nothing more.

pub mod selector;

pub use selector::Selector;

/// Elements that never have content.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug)]
enum NodeData {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug)]
struct Node {
    parent: Option<usize>,
    children: Vec<usize>,
    data: NodeData,
}

/// A parsed page. Index 0 is a synthetic root.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
}

/// A borrowed handle to one element in a `Document`.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    doc: &'a Document,
    index: usize,
}

impl Document {
    /// Parse markup into a document. Never fails; garbage degrades to text.
    pub fn parse(html: &str) -> Document {
        Parser::new(html).run()
    }

    /// First element matching the selector, in document order.
    pub fn select_first(&self, selector: &Selector) -> Option<NodeRef<'_>> {
        self.element_indices()
            .find(|&i| self.matches_at(selector, i))
            .map(|index| NodeRef { doc: self, index })
    }

    /// All elements matching the selector, in document order.
    pub fn select_all(&self, selector: &Selector) -> Vec<NodeRef<'_>> {
        self.element_indices()
            .filter(|&i| self.matches_at(selector, i))
            .map(|index| NodeRef { doc: self, index })
            .collect()
    }

    pub fn exists(&self, selector: &Selector) -> bool {
        self.select_first(selector).is_some()
    }

    /// Normalized text of the `<title>` element, if any.
    pub fn title(&self) -> Option<String> {
        let sel = Selector::parse("title").expect("static selector");
        self.select_first(&sel).map(|n| n.text())
    }

    /// Normalized text of `<body>`, falling back to the whole document.
    pub fn body_text(&self) -> String {
        let sel = Selector::parse("body").expect("static selector");
        match self.select_first(&sel) {
            Some(body) => body.text(),
            None => NodeRef {
                doc: self,
                index: 0,
            }
            .text(),
        }
    }

    fn element_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&i| matches!(self.nodes[i].data, NodeData::Element { .. }))
    }

    /// Descendant-combinator matching: the node must match the last compound,
    /// and each earlier compound must match some strictly-higher ancestor.
    fn matches_at(&self, selector: &Selector, index: usize) -> bool {
        let parts = selector.parts();
        let last = match parts.last() {
            Some(last) => last,
            None => return false,
        };
        if !self.compound_matches(last, index) {
            return false;
        }
        let mut remaining = &parts[..parts.len() - 1];
        let mut cursor = self.nodes[index].parent;
        while let Some(part) = remaining.last() {
            let mut found = false;
            while let Some(i) = cursor {
                cursor = self.nodes[i].parent;
                if self.compound_matches(part, i) {
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
            remaining = &remaining[..remaining.len() - 1];
        }
        true
    }

    fn compound_matches(&self, part: &selector::Compound, index: usize) -> bool {
        let (name, attrs) = match &self.nodes[index].data {
            NodeData::Element { name, attrs } => (name, attrs),
            NodeData::Text(_) => return false,
        };
        part.matches(name, attrs)
    }
}

impl<'a> NodeRef<'a> {
    pub fn name(&self) -> &'a str {
        match &self.doc.nodes[self.index].data {
            NodeData::Element { name, .. } => name,
            NodeData::Text(_) => "",
        }
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        match &self.doc.nodes[self.index].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            NodeData::Text(_) => None,
        }
    }

    /// Whitespace-normalized text of this node and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(self.index, &mut out);
        normalize_whitespace(&out)
    }

    fn collect_text(&self, index: usize, out: &mut String) {
        match &self.doc.nodes[index].data {
            NodeData::Text(t) => {
                out.push_str(t);
                out.push(' ');
            }
            NodeData::Element { .. } => {
                for &child in &self.doc.nodes[index].children {
                    self.collect_text(child, out);
                }
            }
        }
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the handful of entities that matter for text comparison.
fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let end = match rest.find(';') {
            Some(end) if end <= 10 => end,
            _ => {
                out.push('&');
                rest = &rest[1..];
                continue;
            }
        };
        let entity = &rest[1..end];
        let decoded: Option<char> = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix('#')
                .and_then(|num| {
                    if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        num.parse::<u32>().ok()
                    }
                })
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte-wise ASCII-case-insensitive substring search.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || n.len() > h.len() {
        return None;
    }
    'outer: for start in 0..=(h.len() - n.len()) {
        for (i, &nb) in n.iter().enumerate() {
            if h[start + i].to_ascii_lowercase() != nb.to_ascii_lowercase() {
                continue 'outer;
            }
        }
        return Some(start);
    }
    None
}

struct Parser<'a> {
    src: &'a str,
    nodes: Vec<Node>,
    stack: Vec<usize>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::Element {
                name: String::new(),
                attrs: Vec::new(),
            },
        };
        Parser {
            src,
            nodes: vec![root],
            stack: vec![0],
        }
    }

    fn run(mut self) -> Document {
        let mut i = 0;
        let s = self.src;
        while i < s.len() {
            match s[i..].find('<') {
                None => {
                    self.push_text(&s[i..]);
                    break;
                }
                Some(off) => {
                    if off > 0 {
                        self.push_text(&s[i..i + off]);
                        i += off;
                    }
                    let rest = &s[i..];
                    if rest.starts_with("<!--") {
                        i = match rest.find("-->") {
                            Some(p) => i + p + 3,
                            None => s.len(),
                        };
                    } else if rest.starts_with("<!") || rest.starts_with("<?") {
                        i = match rest.find('>') {
                            Some(p) => i + p + 1,
                            None => s.len(),
                        };
                    } else if let Some(close) = rest.strip_prefix("</") {
                        let end = match close.find('>') {
                            Some(p) => p,
                            None => {
                                i = s.len();
                                continue;
                            }
                        };
                        let name = close[..end].trim().to_ascii_lowercase();
                        self.close_element(&name);
                        i += 2 + end + 1;
                    } else {
                        // Open tag. Find '>' outside quotes; a stray '<' with
                        // no tag end degrades to literal text.
                        match scan_tag(rest) {
                            Some(tag_len) => {
                                let inner = &rest[1..tag_len - 1];
                                let consumed = self.open_element(inner);
                                i += tag_len;
                                if let Some(skip_name) = consumed {
                                    i += skip_raw_content(&s[i..], &skip_name);
                                }
                            }
                            None => {
                                self.push_text(rest);
                                i = s.len();
                            }
                        }
                    }
                }
            }
        }
        Document { nodes: self.nodes }
    }

    fn push_text(&mut self, raw: &str) {
        if raw.trim().is_empty() {
            return;
        }
        let parent = *self.stack.last().expect("root never popped");
        let index = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            data: NodeData::Text(decode_entities(raw)),
        });
        self.nodes[parent].children.push(index);
    }

    /// Returns `Some(name)` when the element's raw content (script/style)
    /// must be skipped by the caller.
    fn open_element(&mut self, inner: &str) -> Option<String> {
        let inner = inner.trim();
        let self_closing = inner.ends_with('/');
        let inner = inner.trim_end_matches('/').trim_end();

        let name_end = inner
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(inner.len());
        let name = inner[..name_end].to_ascii_lowercase();
        if name.is_empty() || !name.chars().next().unwrap().is_ascii_alphabetic() {
            return None;
        }
        let attrs = parse_attrs(&inner[name_end..]);

        let parent = *self.stack.last().expect("root never popped");
        let index = self.nodes.len();
        let is_void = VOID_ELEMENTS.contains(&name.as_str());
        let is_raw = name == "script" || name == "style";
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            data: NodeData::Element {
                name: name.clone(),
                attrs,
            },
        });
        self.nodes[parent].children.push(index);

        if is_raw {
            return if self_closing { None } else { Some(name) };
        }
        if !self_closing && !is_void {
            self.stack.push(index);
        }
        None
    }

    fn close_element(&mut self, name: &str) {
        // Find the nearest open element with this name; unknown closers are
        // ignored rather than corrupting the stack.
        let pos = self.stack.iter().rposition(|&i| match &self.nodes[i].data {
            NodeData::Element { name: n, .. } => n == name && i != 0,
            NodeData::Text(_) => false,
        });
        if let Some(pos) = pos {
            self.stack.truncate(pos);
            if self.stack.is_empty() {
                self.stack.push(0);
            }
        }
    }
}

/// Length of the tag including both angle brackets, or None if unterminated.
fn scan_tag(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(i + 1),
                _ => {}
            },
        }
    }
    None
}

/// Bytes to skip so that `</script>`/`</style>` content never becomes nodes.
fn skip_raw_content(rest: &str, name: &str) -> usize {
    let closer = format!("</{}", name);
    match find_ci(rest, &closer) {
        Some(pos) => match rest[pos..].find('>') {
            Some(end) => pos + end + 1,
            None => rest.len(),
        },
        None => rest.len(),
    }
}

fn parse_attrs(mut rest: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let name_end = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '=')
            .unwrap_or(rest.len());
        let name = rest[..name_end].trim_end_matches('/').to_ascii_lowercase();
        rest = rest[name_end..].trim_start();
        if name.is_empty() {
            // Stray '=' or '/'; skip one char to guarantee progress.
            rest = &rest[1.min(rest.len())..];
            continue;
        }
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            let (value, remaining) = if let Some(q) = after_eq.strip_prefix('"') {
                match q.find('"') {
                    Some(end) => (&q[..end], &q[end + 1..]),
                    None => (q, ""),
                }
            } else if let Some(q) = after_eq.strip_prefix('\'') {
                match q.find('\'') {
                    Some(end) => (&q[..end], &q[end + 1..]),
                    None => (q, ""),
                }
            } else {
                let end = after_eq
                    .find(|c: char| c.is_ascii_whitespace())
                    .unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            };
            attrs.push((name, decode_entities(value)));
            rest = remaining;
        } else {
            attrs.push((name, String::new()));
        }
    }
    attrs
}
