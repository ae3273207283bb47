use thiserror::Error;
use transport_bus::{BusError, ReplyError};

use crate::store::StoreError;
use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("config store: {0}")]
    Store(#[from] StoreError),
    #[error("rendering template: {0}")]
    Template(#[from] TemplateError),
    #[error("config store task: {0}")]
    StoreTask(#[from] tokio::task::JoinError),
    #[error("no available profiles")]
    NoProfiles,
    #[error("no track playing")]
    NoTrack,
    #[error("request carried no config")]
    MissingConfig,
}

impl ServiceError {
    /// Error to put in a reply. A peer's reply error is passed through as is.
    pub fn to_reply_error(&self) -> ReplyError {
        match self {
            ServiceError::Bus(BusError::Reply(err)) => err.clone(),
            ServiceError::Bus(err) => ReplyError {
                detail: Some(err.to_string()),
                ..ReplyError::default()
            },
            other => ReplyError::user(other.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
