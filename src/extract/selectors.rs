//! Declarative cascade tables for the heuristic engine.
//!
//! Each field is an ordered selector list, most site-specific first and most
//! generic last, so the cascade in `extract` stays a single data-driven
//! function. Ordering is load-bearing: Glassdoor's header selectors come
//! before LinkedIn's card selectors, which come before bare-tag fallbacks.

use crate::dom::Selector;
use once_cell::sync::Lazy;
use regex::Regex;

fn compile(raw: &[&str]) -> Vec<Selector> {
    raw.iter()
        .map(|s| Selector::parse(s).expect("static selector table entry"))
        .collect()
}

pub static TITLE_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        r#"header[data-test="job-details-header"] h1"#,
        r#"header[data-test="job-details-header"] [data-test="jobTitle"]"#,
        r#"[data-test="jobTitle"]"#,
        ".JobDetails_jobTitle",
        ".jobTitle",
        r#"h1[data-test="jobTitle"]"#,
        ".JobHeader_jobTitle",
        "h1.JobDetails_jobTitle",
        r#"h1[data-testid="job-title"]"#,
        ".job-details-jobs-unified-top-card__job-title",
        ".jobs-unified-top-card__job-title",
        ".top-card-layout__title",
        "h1.job-title",
        ".job-details__job-title",
        "h1",
        r#"[data-testid*="job-title"]"#,
        ".jobs-details__main-content h1",
        "h1.topcard__title",
    ])
});

pub static COMPANY_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        r#"header[data-test="job-details-header"] [data-test="employerName"]"#,
        r#"header[data-test="job-details-header"] a[href*="/Overview/"]"#,
        r#"[data-test="employerName"]"#,
        ".JobDetails_employerName",
        ".employerName",
        r#"a[data-test="employerName"]"#,
        ".JobHeader_employerName",
        r#"[data-test="jobHeader"] a"#,
        ".JobDetails_companyName",
        r#"[data-testid="company-name"]"#,
        ".job-details-jobs-unified-top-card__company-name",
        ".jobs-unified-top-card__company-name",
        ".topcard__org-name-link",
        "a.topcard__org-name-link",
        ".company-name",
        ".job-details__company-name",
        r#"[data-testid*="company"]"#,
        ".jobs-details__main-content .company-name",
        ".jobs-unified-top-card__subtitle-primary-grouping a",
    ])
});

pub static LOCATION_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        r#"header[data-test="job-details-header"] [data-test="location"]"#,
        r#"[data-test="jobLocation"]"#,
        ".JobDetails_location",
        ".jobLocation",
        ".JobHeader_location",
        r#"[data-test="location"]"#,
        ".JobDetails_jobLocation",
        r#"[data-testid="job-location"]"#,
        ".job-details-jobs-unified-top-card__bullet",
        ".jobs-unified-top-card__bullet",
        ".topcard__flavor--bullet",
        ".jobs-unified-top-card__primary-description",
        ".job-location",
        ".job-details__location",
        r#"[data-testid*="location"]"#,
        ".jobs-details__main-content .location",
    ])
});

pub static SALARY_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        r#"[data-test="detailSalary"]"#,
        ".JobDetails_salaryEstimate",
        ".salaryEstimate",
        ".JobDetails_salary",
        r#"[data-test="salary"]"#,
        ".JobDetails_estimatedSalary",
        ".estimatedSalary",
        ".job-details-jobs-unified-top-card__salary",
        ".jobs-unified-top-card__salary",
        ".jobs-details-top-card__salary",
        ".salary",
        ".compensation",
        r#"[data-testid*="salary"]"#,
        r#"[data-testid*="compensation"]"#,
        ".job-salary",
        ".pay-range",
        ".salary-range",
        ".compensation-range",
        ".job-pay",
        ".wage",
        ".job-details__salary",
        r#"span[class*="salary"]"#,
        r#"div[class*="salary"]"#,
        r#"span[class*="compensation"]"#,
        r#"div[class*="compensation"]"#,
    ])
});

/// Containers the salary regex fallback is scoped to; never the whole page.
pub static JOB_SECTION_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".jobs-details",
        ".jobs-unified-top-card",
        ".job-details",
        r#"[data-testid*="job"]"#,
        ".JobDetails",
        ".JobHeader",
        r#"[data-test="jobHeader"]"#,
        ".JobDetails_jobDescription",
    ])
});

/// Currency-amount forms, optionally a range, optionally a per-period suffix;
/// the second pattern covers `$120k`-style abbreviations.
pub static SALARY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\$[\d,]+(?:\.\d{2})?\s*(?:-\s*\$?[\d,]+(?:\.\d{2})?)?\s*(?:per\s+(?:year|month|hour|week))?",
        r"(?i)\$[\d,]+(?:\.\d{2})?\s*k\s*(?:per\s+(?:year|month|hour|week))?",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static salary pattern"))
    .collect()
});

pub static DESCRIPTION_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        "#main article",
        "article",
        ".jobs-description__text",
        ".jobs-description-content__text",
        ".jobs-box__html-content",
        ".jobs-details__main-content",
        r#"[data-testid="job-details"]"#,
        ".job-details__job-description",
        ".JobDetails_jobDescription",
        ".JobDetails_jobDescriptionText",
        r#"[data-test="jobDescription"]"#,
        ".jobDescription",
        r#"[id^="job-viewed-waypoint-"]"#,
        ".job-description",
        ".description",
        r#"[class*="description"]"#,
        r#"[class*="Description"]"#,
    ])
});

/// Structural fingerprints that mark a page as a job posting.
pub static JOB_FINGERPRINT_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".jobs-details",
        r#"[data-testid*="job"]"#,
        ".job-details",
        ".jobs-unified-top-card",
        ".jobs-details__main-content",
    ])
});

pub static LOGIN_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        r#"input[type="password"]"#,
        r#"input[name="password"]"#,
        ".login-form",
    ])
});

/// Copy fragments that betray a login wall even without a password field.
pub const LOGIN_COPY_FRAGMENTS: &[&str] = &[
    "Sign in with Apple",
    "We've emailed a one-time link",
    "LinkedIn Login",
];

/// Substrings that disqualify a title match (login banners under an `h1`).
pub const TITLE_REJECT_FRAGMENTS: &[&str] = &["Sign in", "Login"];

/// URL shapes that mark a job page without structural fingerprints.
pub const GENERIC_JOB_URL_MARKERS: &[&str] = &["/job/", "/jobs/", "/viewjob", "/job-listing"];

pub const LINKEDIN_JOB_VIEW_MARKER: &str = "/jobs/view/";
pub const JOB_ID_QUERY_PARAM: &str = "currentJobId";

/// Canonical job-view address template; the job id substitutes for `{}`.
pub const CANONICAL_JOB_URL_TEMPLATE: &str = "https://www.linkedin.com/jobs/view/";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_tables_compile() {
        // Force every Lazy so a bad entry fails here, not mid-extraction.
        assert!(!TITLE_SELECTORS.is_empty());
        assert!(!COMPANY_SELECTORS.is_empty());
        assert!(!LOCATION_SELECTORS.is_empty());
        assert!(!SALARY_SELECTORS.is_empty());
        assert!(!JOB_SECTION_SELECTORS.is_empty());
        assert!(!DESCRIPTION_SELECTORS.is_empty());
        assert!(!JOB_FINGERPRINT_SELECTORS.is_empty());
        assert!(!LOGIN_SELECTORS.is_empty());
        assert_eq!(SALARY_PATTERNS.len(), 2);
    }

    #[test]
    fn salary_patterns_match_common_forms() {
        let range = &SALARY_PATTERNS[0];
        assert!(range.is_match("$120,000 - $150,000 per year"));
        assert!(range.is_match("$85,000.00"));

        let abbreviated = &SALARY_PATTERNS[1];
        assert!(abbreviated.is_match("$120k per year"));
        assert!(abbreviated.is_match("$95K"));
    }
}
