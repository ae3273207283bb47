use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use transport_bus::{send_with_reply, BusClient, BusMessage, BusResult};
use twitchchat_proto::{
    Config, MessageTypeCommand, MessageTypeRequest, TrackAnnounceRequest, TOPIC_COMMAND,
    TOPIC_REQUEST,
};

use crate::remote::{ConfigRoute, OrderingPolicy, RemoteConfig};
use crate::updater::Subscription;

/// Client side of the Twitch chat bridge: its cached configuration plus the
/// one-off announce trigger.
pub struct ChatConfigClient {
    client: Arc<dyn BusClient>,
    config: RemoteConfig<Config>,
}

impl ChatConfigClient {
    pub fn new(client: Arc<dyn BusClient>) -> Self {
        Self::with_policy(client, OrderingPolicy::default())
    }

    pub fn with_policy(client: Arc<dyn BusClient>, policy: OrderingPolicy) -> Self {
        let config = RemoteConfig::with_policy(Arc::clone(&client), Self::route(), policy);
        Self { client, config }
    }

    pub fn route() -> ConfigRoute {
        ConfigRoute {
            request_topic: TOPIC_REQUEST.to_string(),
            command_topic: TOPIC_COMMAND.to_string(),
            get_type: MessageTypeRequest::ConfigGetReq.into(),
            set_type: MessageTypeCommand::ConfigSetReq.into(),
        }
    }

    pub fn config(&self) -> &RemoteConfig<Config> {
        &self.config
    }

    pub fn last(&self) -> Option<Arc<Config>> {
        self.config.last()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<Config>) + Send + Sync + 'static,
    {
        self.config.subscribe(callback)
    }

    pub async fn refresh(&self) -> BusResult<()> {
        self.config.refresh().await
    }

    pub async fn save(&self, config: &Config) -> BusResult<Arc<Config>> {
        self.config.save(config).await
    }

    /// Clones the last snapshot (fetching one first if the cache is empty),
    /// applies `edit` to the clone and saves it.
    pub async fn edit<F>(&self, edit: F) -> BusResult<Arc<Config>>
    where
        F: FnOnce(&mut Config),
    {
        let current = match self.config.last() {
            Some(current) => current,
            None => {
                self.config.refresh().await?;
                self.config.last().unwrap_or_default()
            }
        };
        let mut next = (*current).clone();
        edit(&mut next);
        self.config.save(&next).await
    }

    /// Asks the service to announce the current track once.
    pub async fn announce(&self) -> BusResult<()> {
        let reply = self.client.send_and(announce_request()?).await?;
        reply.into_result()?;
        debug!(target = "chat.client", "announce acknowledged");
        Ok(())
    }

    /// Callback flavour of [`announce`](Self::announce); returns without
    /// waiting for the reply.
    pub fn announce_with_reply<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(BusResult<()>) + Send + 'static,
    {
        let request = match announce_request() {
            Ok(request) => request,
            Err(err) => return tokio::spawn(async move { callback(Err(err)) }),
        };
        send_with_reply(Arc::clone(&self.client), request, move |result| {
            let result = result.and_then(|reply| reply.into_result()).map(|_| ());
            if let Err(err) = &result {
                warn!(target = "chat.client", error = %err, "announce failed");
            }
            callback(result);
        })
    }
}

fn announce_request() -> BusResult<BusMessage> {
    BusMessage::new(TOPIC_REQUEST, MessageTypeRequest::TrackAnnounceReq)
        .with_payload(&TrackAnnounceRequest {})
}
