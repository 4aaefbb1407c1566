//! Affiliate Post Metric Reconciliation Engine — library crate.
//!
//! Exposes the reconciliation core for the `reconcile` binary and
//! integration tests. See `reconciliation::mod` for the module breakdown.

pub mod reconciliation;
