//! Reactive client for server-owned configuration reached over the bus.
//!
//! - [`ValueUpdater`]: observable slot with subscribe/unsubscribe
//! - [`RemoteConfig`]: cache kept in step with the server through
//!   `refresh`/`save` round trips
//! - [`ChatConfigClient`]: the Twitch chat bridge's config plus its
//!   announce trigger

mod chat;
mod remote;
mod updater;

pub use chat::ChatConfigClient;
pub use remote::{ConfigRoute, OrderingPolicy, RemoteConfig};
pub use updater::{Subscription, ValueUpdater};
