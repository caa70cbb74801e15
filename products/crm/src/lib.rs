//! Lead pipeline domain for the single-tenant sales CRM.
//!
//! Every public operation takes the pool explicitly; multi-statement writes
//! (merge, bulk stage moves, import, cadence advances) run in one transaction.

pub mod analytics;
pub mod columns;
pub mod dedup;
pub mod email;
mod error;
pub mod history;
pub mod leads;
pub mod merge;
pub mod scoring;
pub mod seed;
pub mod tabular;
pub mod tasks;
pub mod templates;
pub mod transitions;
mod validate;

pub use entity::leads::{Priority, Stage};
pub use error::{CrmError, CrmResult};
