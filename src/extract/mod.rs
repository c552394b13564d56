//! Page Extractor: heuristically locates job-posting fields in an arbitrary,
//! unowned page under uncertainty.
//!
//! The engine is a pure pipeline over a parsed snapshot
//! (`extract_from_document`), so every heuristic is unit-testable against
//! fixture markup. `run` adds the two effects the pipeline needs from the
//! outside world: taking snapshots through the `PageSource` seam (including
//! the single bounded retry for late-attaching nodes) and the never-throws
//! boundary: any internal failure degrades to a best-effort result with
//! `is_job_page: None` instead of propagating.

pub mod selectors;

use crate::dom::{Document, Selector};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use selectors::{
    CANONICAL_JOB_URL_TEMPLATE, COMPANY_SELECTORS, DESCRIPTION_SELECTORS,
    GENERIC_JOB_URL_MARKERS, JOB_FINGERPRINT_SELECTORS, JOB_ID_QUERY_PARAM,
    JOB_SECTION_SELECTORS, LINKEDIN_JOB_VIEW_MARKER, LOCATION_SELECTORS, LOGIN_COPY_FRAGMENTS,
    LOGIN_SELECTORS, SALARY_PATTERNS, SALARY_SELECTORS, TITLE_REJECT_FRAGMENTS, TITLE_SELECTORS,
};

/// Sentinel meaning "extraction attempted and failed", as distinct from a
/// genuinely empty field.
pub const UNKNOWN_TITLE: &str = "Unknown Job Title";
pub const UNKNOWN_COMPANY: &str = "Unknown Company";
/// Sentinel for fields behind a target-site login wall.
pub const LOGIN_REQUIRED: &str = "LOGIN_REQUIRED";

/// Best-effort structured guess at the posting's fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobFields {
    pub job_title: String,
    pub company: String,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub description: Option<String>,
}

impl JobFields {
    pub fn unknown() -> Self {
        JobFields {
            job_title: UNKNOWN_TITLE.to_string(),
            company: UNKNOWN_COMPANY.to_string(),
            location: None,
            salary: None,
            description: None,
        }
    }

    pub fn login_required() -> Self {
        JobFields {
            job_title: LOGIN_REQUIRED.to_string(),
            company: LOGIN_REQUIRED.to_string(),
            location: None,
            salary: None,
            description: None,
        }
    }

    pub fn title_resolved(&self) -> bool {
        self.job_title != UNKNOWN_TITLE && self.job_title != LOGIN_REQUIRED
    }

    pub fn company_resolved(&self) -> bool {
        self.company != UNKNOWN_COMPANY && self.company != LOGIN_REQUIRED
    }
}

/// What the extractor hands back across the isolation boundary.
/// `is_job_page == None` signals an extraction-time failure, distinct from
/// `Some(false)` ("successfully determined not a job page").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionResult {
    pub html_content: Option<String>,
    pub fallback_data: JobFields,
    pub is_login_page: bool,
    pub is_job_page: Option<bool>,
    pub canonical_url: Option<String>,
}

impl ExtractionResult {
    /// Degraded result for when the pipeline itself failed.
    pub fn failure() -> Self {
        ExtractionResult {
            html_content: None,
            fallback_data: JobFields::unknown(),
            is_login_page: false,
            is_job_page: None,
            canonical_url: None,
        }
    }
}

/// Where snapshots of the visited page come from. The bounded retry takes a
/// second snapshot through the same seam, so a source backed by a live page
/// can observe nodes that attached after the first pass.
#[async_trait]
pub trait PageSource: Send + Sync {
    fn url(&self) -> &str;
    async fn snapshot(&self) -> Result<String>;
}

/// A fixed snapshot already in hand (the stdio host receives markup inline).
pub struct StaticPage {
    url: String,
    html: String,
}

impl StaticPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        StaticPage {
            url: url.into(),
            html: html.into(),
        }
    }
}

#[async_trait]
impl PageSource for StaticPage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn snapshot(&self) -> Result<String> {
        Ok(self.html.clone())
    }
}

/// Run the full extraction against a page source. Never returns an error:
/// the caller cannot recover from a failure thrown across the injection
/// boundary, so failures become a degraded result instead.
pub async fn run(source: &dyn PageSource, retry_delay: Duration) -> ExtractionResult {
    let html = match source.snapshot().await {
        Ok(html) => html,
        Err(err) => {
            warn!(?err, url = source.url(), "page snapshot failed");
            return ExtractionResult::failure();
        }
    };

    let doc = Document::parse(&html);
    let mut result = extract_from_document(&doc, source.url(), html);

    // Single bounded retry, not a loop: pages whose relevant node attaches
    // shortly after injection get one more chance at title/company.
    if result.is_job_page == Some(true)
        && (!result.fallback_data.title_resolved() || !result.fallback_data.company_resolved())
    {
        tokio::time::sleep(retry_delay).await;
        match source.snapshot().await {
            Ok(fresh) => {
                let doc = Document::parse(&fresh);
                retry_title_company(&doc, &mut result.fallback_data);
            }
            Err(err) => {
                warn!(?err, "retry snapshot failed; keeping first-pass fields");
            }
        }
    }

    result
}

/// The pure heuristic pipeline: login wall, job fingerprints, field
/// cascades, salary fallback, description, canonical URL.
pub fn extract_from_document(doc: &Document, url: &str, html: String) -> ExtractionResult {
    if is_login_page(doc) {
        return ExtractionResult {
            html_content: Some(html),
            fallback_data: JobFields::login_required(),
            is_login_page: true,
            is_job_page: Some(false),
            canonical_url: canonical_link(doc),
        };
    }

    if !is_job_page(doc, url) {
        return ExtractionResult {
            html_content: Some(html),
            fallback_data: JobFields::unknown(),
            is_login_page: false,
            is_job_page: Some(false),
            canonical_url: canonical_link(doc),
        };
    }

    let mut fields = JobFields::unknown();
    if let Some(title) = cascade(doc, &TITLE_SELECTORS, 4, TITLE_REJECT_FRAGMENTS) {
        fields.job_title = title;
    } else if let Some(header) = glassdoor_header_fallback(doc, url) {
        fields.job_title = header;
    }
    if let Some(company) = cascade(doc, &COMPANY_SELECTORS, 2, &[]) {
        fields.company = company;
    }
    fields.location = cascade(doc, &LOCATION_SELECTORS, 2, &[]);
    fields.salary = cascade(doc, &SALARY_SELECTORS, 1, &[]).or_else(|| salary_from_text(doc));
    fields.description = longest_description(doc);

    ExtractionResult {
        html_content: Some(html),
        fallback_data: fields,
        is_login_page: false,
        is_job_page: Some(true),
        canonical_url: canonical_url(doc, url),
    }
}

/// Second pass over a fresh snapshot; only unresolved fields are replaced.
fn retry_title_company(doc: &Document, fields: &mut JobFields) {
    if !fields.title_resolved() {
        if let Some(title) = cascade(doc, &TITLE_SELECTORS, 4, TITLE_REJECT_FRAGMENTS) {
            fields.job_title = title;
        }
    }
    if !fields.company_resolved() {
        if let Some(company) = cascade(doc, &COMPANY_SELECTORS, 2, &[]) {
            fields.company = company;
        }
    }
}

/// The generic cascade: first selector whose text is non-empty, at least
/// `min_len` chars, and free of every reject fragment.
fn cascade(
    doc: &Document,
    table: &[Selector],
    min_len: usize,
    reject_fragments: &[&str],
) -> Option<String> {
    for selector in table {
        if let Some(node) = doc.select_first(selector) {
            let text = node.text();
            if text.len() >= min_len && !reject_fragments.iter().any(|f| text.contains(f)) {
                return Some(text);
            }
        }
    }
    None
}

fn is_login_page(doc: &Document) -> bool {
    if LOGIN_SELECTORS.iter().any(|s| doc.exists(s)) {
        return true;
    }
    if doc
        .title()
        .is_some_and(|t| t.contains("Sign in"))
    {
        return true;
    }
    let body = doc.body_text();
    LOGIN_COPY_FRAGMENTS.iter().any(|f| body.contains(f))
}

fn is_job_page(doc: &Document, url: &str) -> bool {
    JOB_FINGERPRINT_SELECTORS.iter().any(|s| doc.exists(s)) || looks_like_job_url(url)
}

/// URL-shape half of job-page detection, shared with the panel's view
/// routing (which has no document to inspect).
pub fn looks_like_job_url(url: &str) -> bool {
    if url.contains(LINKEDIN_JOB_VIEW_MARKER) || job_id_from_query(url).is_some() {
        return true;
    }
    // Glassdoor renders job details into index pages, so any page on the
    // site is a potential job page.
    if url.contains("glassdoor.com") {
        return true;
    }
    GENERIC_JOB_URL_MARKERS.iter().any(|m| url.contains(m))
}

/// Glassdoor's right-column header sometimes carries the only usable title.
fn glassdoor_header_fallback(doc: &Document, url: &str) -> Option<String> {
    if !url.contains("glassdoor.com") {
        return None;
    }
    let sel = Selector::parse(r#"header[data-test="job-details-header"]"#).expect("static selector");
    let text = doc.select_first(&sel)?.text();
    if text.len() > 10 {
        Some(text)
    } else {
        None
    }
}

/// Regex fallback over job-scoped containers only, never the whole page.
fn salary_from_text(doc: &Document) -> Option<String> {
    let mut scoped = String::new();
    for selector in JOB_SECTION_SELECTORS.iter() {
        for node in doc.select_all(selector) {
            scoped.push_str(&node.text());
            scoped.push(' ');
        }
    }
    if scoped.trim().is_empty() {
        return None;
    }
    for pattern in SALARY_PATTERNS.iter() {
        if let Some(m) = pattern.find(&scoped) {
            let text = m.as_str().trim();
            // The optional tail can match the bare "$" prefix alone; require
            // at least one digit to call it a salary.
            if text.chars().any(|c| c.is_ascii_digit()) {
                return Some(text.to_string());
            }
        }
    }
    None
}

/// Longest substantial description among the selector matches.
fn longest_description(doc: &Document) -> Option<String> {
    let mut best: Option<String> = None;
    for selector in DESCRIPTION_SELECTORS.iter() {
        for node in doc.select_all(selector) {
            let text = node.text();
            if text.len() > 100 && best.as_ref().map_or(true, |b| text.len() > b.len()) {
                best = Some(text);
            }
        }
    }
    best
}

fn canonical_link(doc: &Document) -> Option<String> {
    let sel = Selector::parse(r#"link[rel="canonical"]"#).expect("static selector");
    doc.select_first(&sel)
        .and_then(|n| n.attr("href"))
        .filter(|href| !href.is_empty())
        .map(str::to_string)
}

/// Canonical address resolution: explicit link element, else derived from the
/// job-id query parameter, else the current address.
fn canonical_url(doc: &Document, url: &str) -> Option<String> {
    if let Some(link) = canonical_link(doc) {
        return Some(link);
    }
    if let Some(job_id) = job_id_from_query(url) {
        return Some(format!("{}{}", CANONICAL_JOB_URL_TEMPLATE, job_id));
    }
    Some(url.to_string())
}

fn job_id_from_query(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == JOB_ID_QUERY_PARAM)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
