//! sea-orm entities for the CRM tables.

pub mod contact_history;
pub mod email_templates;
pub mod leads;
pub mod scheduled_emails;
pub mod tasks;
