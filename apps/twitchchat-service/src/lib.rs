//! Trackstar → Twitch chat bridge: the service that owns the announce
//! configuration and answers for it over the bus.

pub mod config;
pub mod error;
pub mod peers;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod template;

pub use error::{ServiceError, ServiceResult};
pub use service::{ChatService, ServiceOptions};
pub use store::{ConfigStore, FileStore, MemoryStore};
