//! Keeper service: polls upstream feeds over HTTP, refreshes one collateral on
//! a fixed interval and reports status changes.

pub mod notify;
pub mod poller;
pub mod sources;
