//! patchguard library crate
//!
//! A guarded, self-modifying code-maintenance pipeline: external scanner
//! findings in, reversible batched fixes out, with an approval lifecycle for
//! anything riskier than a mechanical text edit and an emergency switch that
//! restores every applied change from its snapshot.

pub mod approval;
pub mod backup;
pub mod config;
pub mod emergency;
pub mod error;
pub mod findings;
pub mod fixer;
pub mod sandbox;
pub mod scanner;
pub mod session;
pub mod store;
pub mod strategy;
pub mod testing;
pub mod util;
pub mod validate;
