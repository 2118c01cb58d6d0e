#![forbid(unsafe_code)]

//! Proxy profile store and synchronization layer
//!
//! Persists connection profiles, projects them into a filtered view,
//! translates them into native runtime configs, and keeps a controller and a
//! background worker in step over a notification bus.

pub mod config;
pub mod constants;
pub mod controller;
pub mod ipc;
pub mod measure;
pub mod profile;
pub mod store;
pub mod translate;
pub mod view;
pub mod worker;

pub use controller::{Controller, ViewUpdate};
pub use profile::{AffiliationInfo, ConfigType, Profile};
pub use store::ProfileStore;
pub use worker::Worker;
