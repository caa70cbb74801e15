//! REST handlers. Each one validates through the crm crate and maps
//! `CrmError` into the shared `ApiError` envelope.

pub mod analytics;
pub mod email;
pub mod leads;
pub mod tasks;
