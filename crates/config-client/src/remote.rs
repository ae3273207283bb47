use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport_bus::{BusClient, BusError, BusMessage, BusResult};

use crate::updater::{Subscription, ValueUpdater};

/// Where a remote value is read from and written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRoute {
    /// Reads (GET) go here.
    pub request_topic: String,
    /// Writes (SET) go here.
    pub command_topic: String,
    pub get_type: i32,
    pub set_type: i32,
}

/// What to do when replies come back in a different order than their
/// requests went out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Whichever reply arrives last is stored.
    #[default]
    LastReplyWins,
    /// Replies to requests older than the last applied one are dropped.
    DiscardStale,
}

#[derive(Serialize)]
struct SetRequest<'a, T> {
    config: &'a T,
}

#[derive(Deserialize)]
struct ConfigReply<T> {
    config: Option<T>,
}

/// Local cache of a remote, server-owned value.
///
/// The cache is the only writer of its snapshot, and it only ever stores
/// values decoded from an error-free reply. `save` stores what the server
/// answered with, not what was sent.
pub struct RemoteConfig<T> {
    client: Arc<dyn BusClient>,
    route: ConfigRoute,
    policy: OrderingPolicy,
    value: ValueUpdater<T>,
    issued: AtomicU64,
    applied: Mutex<u64>,
}

impl<T> RemoteConfig<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(client: Arc<dyn BusClient>, route: ConfigRoute) -> Self {
        Self::with_policy(client, route, OrderingPolicy::default())
    }

    pub fn with_policy(client: Arc<dyn BusClient>, route: ConfigRoute, policy: OrderingPolicy) -> Self {
        Self {
            client,
            route,
            policy,
            value: ValueUpdater::new(),
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
        }
    }

    pub fn route(&self) -> &ConfigRoute {
        &self.route
    }

    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    pub fn last(&self) -> Option<Arc<T>> {
        self.value.last()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        self.value.subscribe(callback)
    }

    /// Fetches the current value from the request topic and stores it.
    pub async fn refresh(&self) -> BusResult<()> {
        let seq = self.next_seq();
        let request = BusMessage::new(self.route.request_topic.clone(), self.route.get_type);
        let reply = self.client.send_and(request).await?;
        let value = decode_config::<T>(&reply)?;
        debug!(target = "config.cache", topic = %self.route.request_topic, seq, "refresh resolved");
        self.apply(seq, Arc::new(value));
        Ok(())
    }

    /// Sends `value` on the command topic and stores the server's canonical
    /// answer, which is also returned.
    pub async fn save(&self, value: &T) -> BusResult<Arc<T>> {
        let seq = self.next_seq();
        let request = BusMessage::new(self.route.command_topic.clone(), self.route.set_type)
            .with_payload(&SetRequest { config: value })?;
        let reply = self.client.send_and(request).await?;
        let canonical = Arc::new(decode_config::<T>(&reply)?);
        debug!(target = "config.cache", topic = %self.route.command_topic, seq, "save resolved");
        self.apply(seq, Arc::clone(&canonical));
        Ok(canonical)
    }

    fn next_seq(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::Relaxed) + 1
    }

    // `applied` stays locked through notification so concurrent replies
    // store and broadcast in the same order.
    fn apply(&self, seq: u64, value: Arc<T>) -> bool {
        let mut applied = self.applied.lock();
        if self.policy == OrderingPolicy::DiscardStale && seq < *applied {
            debug!(target = "config.cache", seq, applied = *applied, "stale reply discarded");
            return false;
        }
        *applied = (*applied).max(seq);
        self.value.update_shared(value);
        true
    }
}

fn decode_config<T: DeserializeOwned>(reply: &BusMessage) -> BusResult<T> {
    let body: ConfigReply<T> = reply.decode()?;
    body.config
        .ok_or_else(|| BusError::Decode("reply carried no config".into()))
}
