//! Form Autofiller: fills known application forms from the device-local
//! applicant profile.
//!
//! A static table maps each supported applicant-tracking site to ordered
//! selector lists per logical field. `plan_fill` is pure over a parsed
//! snapshot: it picks, for each field, the first empty, enabled, non-hidden
//! input any selector finds. The returned plan names the matched selector so
//! the host shim can apply the writes and dispatch input/change/blur events.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::dom::{Document, Selector};
use crate::extract::PageSource;
use crate::store::ApplicationProfile;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    FirstName,
    LastName,
    Email,
    Phone,
    Linkedin,
    Portfolio,
}

/// One planned write: fill `value` into the first eligible input matched by
/// `selector`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FillAction {
    pub field: FieldKind,
    pub selector: String,
    pub value: String,
}

#[derive(Debug)]
pub enum FillOutcome {
    UnrecognizedSite,
    Filled {
        site: &'static str,
        actions: Vec<FillAction>,
    },
}

struct SiteSpec {
    name: &'static str,
    domains: &'static [&'static str],
    fields: Vec<(FieldKind, Vec<Selector>)>,
}

fn field(kind: FieldKind, raw: &[&str]) -> (FieldKind, Vec<Selector>) {
    let selectors = raw
        .iter()
        .map(|s| Selector::parse(s).expect("static autofill selector"))
        .collect();
    (kind, selectors)
}

static SITES: Lazy<Vec<SiteSpec>> = Lazy::new(|| {
    vec![
        SiteSpec {
            name: "greenhouse",
            domains: &["greenhouse.io"],
            fields: vec![
                field(
                    FieldKind::FirstName,
                    &[
                        r#"input[name*="first"]"#,
                        r#"input[id*="first"]"#,
                        r#"input[placeholder*="First"]"#,
                        r#"input[placeholder*="first"]"#,
                    ],
                ),
                field(
                    FieldKind::LastName,
                    &[
                        r#"input[name*="last"]"#,
                        r#"input[id*="last"]"#,
                        r#"input[placeholder*="Last"]"#,
                        r#"input[placeholder*="last"]"#,
                    ],
                ),
                field(
                    FieldKind::Email,
                    &[
                        r#"input[type="email"]"#,
                        r#"input[name*="email"]"#,
                        r#"input[id*="email"]"#,
                    ],
                ),
                field(
                    FieldKind::Phone,
                    &[
                        r#"input[type="tel"]"#,
                        r#"input[name*="phone"]"#,
                        r#"input[id*="phone"]"#,
                    ],
                ),
                field(
                    FieldKind::Linkedin,
                    &[
                        r#"input[name*="linkedin"]"#,
                        r#"input[id*="linkedin"]"#,
                        r#"input[placeholder*="linkedin"]"#,
                    ],
                ),
                field(
                    FieldKind::Portfolio,
                    &[
                        r#"input[name*="website"]"#,
                        r#"input[name*="portfolio"]"#,
                        r#"input[name*="url"]"#,
                        r#"input[id*="website"]"#,
                        r#"input[id*="portfolio"]"#,
                    ],
                ),
            ],
        },
        SiteSpec {
            name: "lever",
            domains: &["lever.co"],
            fields: vec![
                field(
                    FieldKind::FirstName,
                    &[
                        r#"input[name*="firstName"]"#,
                        r#"input[id*="firstName"]"#,
                        r#"input[name*="first"]"#,
                    ],
                ),
                field(
                    FieldKind::LastName,
                    &[
                        r#"input[name*="lastName"]"#,
                        r#"input[id*="lastName"]"#,
                        r#"input[name*="last"]"#,
                    ],
                ),
                field(
                    FieldKind::Email,
                    &[r#"input[type="email"]"#, r#"input[name*="email"]"#],
                ),
                field(
                    FieldKind::Phone,
                    &[r#"input[type="tel"]"#, r#"input[name*="phone"]"#],
                ),
                field(
                    FieldKind::Linkedin,
                    &[
                        r#"input[name*="LinkedIn"]"#,
                        r#"input[name*="linkedin"]"#,
                        r#"input[id*="linkedin"]"#,
                    ],
                ),
            ],
        },
        SiteSpec {
            name: "workday",
            domains: &["myworkdayjobs.com", "workday.com"],
            fields: vec![
                field(
                    FieldKind::FirstName,
                    &[
                        r#"input[aria-label*="First"]"#,
                        r#"input[name*="first"]"#,
                        r#"input[id*="first"]"#,
                    ],
                ),
                field(
                    FieldKind::LastName,
                    &[
                        r#"input[aria-label*="Last"]"#,
                        r#"input[name*="last"]"#,
                        r#"input[id*="last"]"#,
                    ],
                ),
                field(
                    FieldKind::Email,
                    &[r#"input[type="email"]"#, r#"input[name*="email"]"#],
                ),
                field(
                    FieldKind::Phone,
                    &[r#"input[type="tel"]"#, r#"input[name*="phone"]"#],
                ),
            ],
        },
        SiteSpec {
            name: "smartrecruiters",
            domains: &["smartrecruiters.com"],
            fields: vec![
                field(
                    FieldKind::FirstName,
                    &[
                        r#"input[name*="firstName"]"#,
                        r#"input[id*="firstName"]"#,
                        r#"input[name*="first"]"#,
                    ],
                ),
                field(
                    FieldKind::LastName,
                    &[
                        r#"input[name*="lastName"]"#,
                        r#"input[id*="lastName"]"#,
                        r#"input[name*="last"]"#,
                    ],
                ),
                field(
                    FieldKind::Email,
                    &[r#"input[type="email"]"#, r#"input[name*="email"]"#],
                ),
                field(
                    FieldKind::Phone,
                    &[r#"input[type="tel"]"#, r#"input[name*="phone"]"#],
                ),
            ],
        },
    ]
});

fn detect(host: &str) -> Option<&'static SiteSpec> {
    let host = host.to_ascii_lowercase();
    SITES
        .iter()
        .find(|site| site.domains.iter().any(|d| host.contains(d)))
}

/// Name of the recognized application site for a page address, if any.
pub fn detect_site_for_url(url: &str) -> Option<&'static str> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    detect(host).map(|site| site.name)
}

fn profile_value<'a>(profile: &'a ApplicationProfile, field: FieldKind) -> Option<&'a str> {
    let value = match field {
        FieldKind::FirstName => profile.first_name.as_deref(),
        FieldKind::LastName => profile.last_name.as_deref(),
        FieldKind::Email => profile.email.as_deref(),
        FieldKind::Phone => profile.phone.as_deref(),
        FieldKind::Linkedin => profile.linkedin_url.as_deref(),
        FieldKind::Portfolio => profile.portfolio_url.as_deref(),
    };
    value.filter(|v| !v.is_empty())
}

/// Only empty, enabled, visible inputs are fillable; host-page state is
/// never overwritten.
fn is_fillable(node: &crate::dom::NodeRef<'_>) -> bool {
    if node.name() != "input" {
        return false;
    }
    if node.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return false;
    }
    if node.attr("disabled").is_some() {
        return false;
    }
    node.attr("value").map_or(true, str::is_empty)
}

fn plan_for_site(
    doc: &Document,
    site: &'static SiteSpec,
    profile: &ApplicationProfile,
) -> Vec<FillAction> {
    let mut actions = Vec::new();
    for (kind, selectors) in &site.fields {
        let value = match profile_value(profile, *kind) {
            Some(value) => value,
            None => continue,
        };
        'field: for selector in selectors {
            for node in doc.select_all(selector) {
                if is_fillable(&node) {
                    actions.push(FillAction {
                        field: *kind,
                        selector: selector.to_string(),
                        value: value.to_string(),
                    });
                    break 'field;
                }
            }
        }
    }
    actions
}

/// Pure fill planning for a known host; `None` when the host is not in the
/// site table.
pub fn plan_fill(
    doc: &Document,
    url: &str,
    profile: &ApplicationProfile,
) -> Option<(&'static str, Vec<FillAction>)> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let site = detect(parsed.host_str()?)?;
    Some((site.name, plan_for_site(doc, site, profile)))
}

/// Run the autofiller against a page source, with one delayed second pass
/// for client-rendered forms that appear after initial load.
pub async fn run(
    source: &dyn PageSource,
    profile: &ApplicationProfile,
    retry_delay: Duration,
) -> FillOutcome {
    let plan = |html: &str| plan_fill(&Document::parse(html), source.url(), profile);

    let mut outcome = match source.snapshot().await {
        Ok(html) => plan(&html),
        Err(err) => {
            warn!(?err, "autofill snapshot failed");
            None
        }
    };
    if outcome.is_none() && detect_site_for_url(source.url()).is_none() {
        return FillOutcome::UnrecognizedSite;
    }

    // Delayed second pass, single-shot like the extractor's retry.
    if outcome.as_ref().map_or(true, |(_, actions)| actions.is_empty()) {
        tokio::time::sleep(retry_delay).await;
        if let Ok(html) = source.snapshot().await {
            if let Some(fresh) = plan(&html) {
                outcome = Some(fresh);
            }
        }
    }

    match outcome {
        Some((site, actions)) => FillOutcome::Filled { site, actions },
        None => FillOutcome::UnrecognizedSite,
    }
}
