//! CSS-subset selectors for the cascade tables.
//!
//! Supported grammar: compounds of `tag`, `#id`, `.class`, and attribute
//! tests `[a]`, `[a=v]`, `[a^=v]`, `[a*=v]` (values optionally quoted),
//! joined by the descendant combinator (whitespace). This covers every
//! selector the extraction and autofill tables use; anything fancier is a
//! parse error so a bad table entry fails loudly at startup, not silently at
//! match time.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid selector `{selector}`: {reason}")]
pub struct InvalidSelector {
    selector: String,
    reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrOp {
    Exists,
    Equals,
    StartsWith,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrTest {
    pub name: String,
    pub op: AttrOp,
    pub value: String,
}

/// One whitespace-separated step of a selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrTest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    parts: Vec<Compound>,
    source: String,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Selector {
    pub fn parse(input: &str) -> Result<Selector, InvalidSelector> {
        let err = |reason| InvalidSelector {
            selector: input.to_string(),
            reason,
        };
        let mut parts = Vec::new();
        for raw in input.split_whitespace() {
            if raw == ">" || raw == "+" || raw == "~" || raw.contains(',') {
                return Err(err("unsupported combinator"));
            }
            parts.push(parse_compound(raw).map_err(err)?);
        }
        if parts.is_empty() {
            return Err(err("empty selector"));
        }
        Ok(Selector {
            parts,
            source: input.to_string(),
        })
    }

    pub(crate) fn parts(&self) -> &[Compound] {
        &self.parts
    }
}

impl Compound {
    /// Match against a lowercase element name and its attribute list.
    pub fn matches(&self, name: &str, attrs: &[(String, String)]) -> bool {
        if let Some(tag) = &self.tag {
            if tag != name {
                return false;
            }
        }
        let attr_of = |wanted: &str| {
            attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
                .map(|(_, v)| v.as_str())
        };
        if let Some(id) = &self.id {
            if attr_of("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = attr_of("class").unwrap_or("");
            let tokens: Vec<&str> = class_attr.split_whitespace().collect();
            if !self.classes.iter().all(|c| tokens.contains(&c.as_str())) {
                return false;
            }
        }
        for test in &self.attrs {
            let actual = attr_of(&test.name);
            let ok = match (&test.op, actual) {
                (AttrOp::Exists, Some(_)) => true,
                (AttrOp::Equals, Some(v)) => v == test.value,
                (AttrOp::StartsWith, Some(v)) => v.starts_with(&test.value),
                (AttrOp::Contains, Some(v)) => v.contains(&test.value),
                (_, None) => false,
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

fn parse_compound(raw: &str) -> Result<Compound, &'static str> {
    let mut compound = Compound::default();
    let mut rest = raw;

    // Leading tag name.
    let tag_end = rest
        .find(|c| c == '.' || c == '#' || c == '[')
        .unwrap_or(rest.len());
    if tag_end > 0 {
        let tag = &rest[..tag_end];
        if tag == "*" {
            // universal: no constraint
        } else if tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            compound.tag = Some(tag.to_ascii_lowercase());
        } else {
            return Err("bad tag name");
        }
        rest = &rest[tag_end..];
    }

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after
                .find(|c| c == '.' || c == '#' || c == '[')
                .unwrap_or(after.len());
            if end == 0 {
                return Err("empty class");
            }
            compound.classes.push(after[..end].to_string());
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('#') {
            let end = after
                .find(|c| c == '.' || c == '[')
                .unwrap_or(after.len());
            if end == 0 {
                return Err("empty id");
            }
            compound.id = Some(after[..end].to_string());
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or("unterminated attribute test")?;
            compound.attrs.push(parse_attr_test(&after[..close])?);
            rest = &after[close + 1..];
        } else {
            return Err("unexpected character");
        }
    }

    if compound.tag.is_none()
        && compound.id.is_none()
        && compound.classes.is_empty()
        && compound.attrs.is_empty()
    {
        return Err("empty compound");
    }
    Ok(compound)
}

fn parse_attr_test(body: &str) -> Result<AttrTest, &'static str> {
    let (name_part, op, value_part) = if let Some((n, v)) = body.split_once("^=") {
        (n, AttrOp::StartsWith, Some(v))
    } else if let Some((n, v)) = body.split_once("*=") {
        (n, AttrOp::Contains, Some(v))
    } else if let Some((n, v)) = body.split_once('=') {
        (n, AttrOp::Equals, Some(v))
    } else {
        (body, AttrOp::Exists, None)
    };

    let name = name_part.trim();
    if name.is_empty() {
        return Err("empty attribute name");
    }
    let value = match value_part {
        Some(v) => {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| v.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(v);
            v.to_string()
        }
        None => String::new(),
    };
    Ok(AttrTest {
        name: name.to_ascii_lowercase(),
        op,
        value,
    })
}
