//! Session Store: the only state shared across process restarts.
//!
//! This module is split into two submodules:
//! - `model`: typed records kept in the store (auth session, autofill profile).
//! - `repo`: SQL-only functions over two key-value tables, `session_kv`
//!   (purged on sign-out / 401) and `device_kv` (device-local, independent of
//!   the auth session).
//!
//! External modules should import from `jobscout::store` — we re-export the
//! repository API and the models for convenience.

pub mod model;
pub mod repo;

pub use model::{ApplicationProfile, AuthSession};
pub use repo::*;
