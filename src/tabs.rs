//! Awaitable seam over the browser's tab facilities.
//!
//! The coordinator opens tabs and snapshots the active page through this
//! trait; the panel polls the active tab's address through it. The stdio host
//! forwards `open` as an outbound event for the browser-side shim to apply,
//! and tests substitute scripted fakes.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Tabs: Send + Sync {
    /// Address of the currently active tab, if any.
    async fn active_url(&self) -> Option<String>;

    /// Open a new tab at `url`.
    async fn open(&self, url: &str) -> Result<()>;

    /// Serialized markup of the currently active tab.
    async fn snapshot(&self) -> Result<String>;
}
