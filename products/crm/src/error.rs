use platform_api::{ApiError, FieldError};
use sea_orm::DbErr;
use thiserror::Error;

pub type CrmResult<T> = Result<T, CrmError>;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("email is not configured")]
    EmailNotConfigured,
    #[error("email delivery failed: {0}")]
    Delivery(String),
    #[error(transparent)]
    Db(#[from] DbErr),
}

impl CrmError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        CrmError::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<CrmError> for ApiError {
    fn from(value: CrmError) -> Self {
        match value {
            CrmError::Validation(details) => ApiError::Validation(details),
            CrmError::NotFound(kind) => ApiError::NotFound(kind.to_string()),
            CrmError::EmailNotConfigured => ApiError::Unavailable(value.to_string()),
            CrmError::Delivery(reason) => ApiError::Delivery(reason),
            CrmError::Db(err) => ApiError::internal(err),
        }
    }
}
