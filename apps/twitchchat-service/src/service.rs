use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, error, info, warn};
use transport_bus::{send_and_timeout, BusClient, BusMessage, Handler};
use twitchchat_proto::peers::{trackstar, twitch};
use twitchchat_proto::{
    Config, ConfigGetResponse, ConfigSetRequest, ConfigSetResponse, MessageTypeCommand,
    MessageTypeRequest, DEFAULT_TEMPLATE, TOPIC_COMMAND, TOPIC_REQUEST,
};

use crate::error::{ServiceError, ServiceResult};
use crate::store::ConfigStore;
use crate::template;

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Bound on the trackstar lookup behind an announce request.
    pub track_timeout: Duration,
    /// Bound on the startup profile lookup.
    pub profile_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            track_timeout: Duration::from_millis(1_000),
            profile_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Owns the bridge configuration and answers for it on the bus.
pub struct ChatService {
    config: Mutex<Config>,
    // Serializes SET so the store and the in-memory config change in the
    // same order.
    writes: tokio::sync::Mutex<()>,
    store: Arc<dyn ConfigStore>,
    client: Arc<dyn BusClient>,
    options: ServiceOptions,
}

impl ChatService {
    pub const TOPICS: [&'static str; 3] = [TOPIC_REQUEST, TOPIC_COMMAND, trackstar::TOPIC_EVENT];

    /// Loads the stored configuration and fills in what is missing: the first
    /// available twitch profile for `send_as`, `send_as` again for `send_to`,
    /// and the default template.
    pub async fn start(
        store: Arc<dyn ConfigStore>,
        client: Arc<dyn BusClient>,
        options: ServiceOptions,
    ) -> ServiceResult<Arc<Self>> {
        let mut config = store.load()?.unwrap_or_default();

        if config.send_as.is_empty() {
            config.send_as = first_profile(client.as_ref(), options.profile_timeout).await?;
            persist(&store, &config).await?;
            info!(target = "chat.service", profile = %config.send_as, "defaulted send_as");
        }
        if config.send_to.is_empty() {
            config.send_to = config.send_as.clone();
            persist(&store, &config).await?;
        }
        if config.template.trim().is_empty() {
            config.template = DEFAULT_TEMPLATE.to_string();
        }

        Ok(Arc::new(Self {
            config: Mutex::new(config),
            writes: tokio::sync::Mutex::new(()),
            store,
            client,
            options,
        }))
    }

    pub fn config(&self) -> Config {
        self.config.lock().clone()
    }

    fn handle_get_config(&self, reply: &mut BusMessage) -> ServiceResult<()> {
        reply.set_payload(&ConfigGetResponse {
            config: Some(self.config()),
        })?;
        Ok(())
    }

    /// Readers keep seeing the previous config until the write has landed.
    async fn handle_set_config(&self, msg: &BusMessage, reply: &mut BusMessage) -> ServiceResult<()> {
        let request: ConfigSetRequest = msg.decode()?;
        let mut next = request.config.ok_or(ServiceError::MissingConfig)?;
        normalize(&mut next);

        let _write = self.writes.lock().await;
        persist(&self.store, &next).await?;
        *self.config.lock() = next.clone();

        info!(
            target = "chat.service",
            announce = next.announce,
            send_as = %next.send_as,
            send_to = %next.send_to,
            "config updated"
        );
        reply.set_payload(&ConfigSetResponse { config: Some(next) })?;
        Ok(())
    }

    async fn handle_track_announce(&self) -> ServiceResult<()> {
        let request = BusMessage::new(trackstar::TOPIC_REQUEST, trackstar::MessageTypeRequest::GetTrackReq)
            .with_payload(&trackstar::GetTrackRequest::default())?;
        let reply = send_and_timeout(self.client.as_ref(), request, self.options.track_timeout).await?;
        let response: trackstar::GetTrackResponse = reply.decode()?;
        let update = response.track_update.ok_or(ServiceError::NoTrack)?;
        self.send_track_update(&update)
    }

    fn handle_track_update(&self, msg: &BusMessage) {
        if !self.config.lock().announce {
            return;
        }
        let update: trackstar::TrackUpdate = match msg.decode() {
            Ok(update) => update,
            Err(err) => {
                warn!(target = "chat.service", error = %err, "undecodable track update");
                return;
            }
        };
        if let Err(err) = self.send_track_update(&update) {
            error!(target = "chat.service", error = %err, "announcing track update");
        }
    }

    /// Renders the configured template for `update` and sends it to chat.
    pub fn send_track_update(&self, update: &trackstar::TrackUpdate) -> ServiceResult<()> {
        let config = self.config();
        let doc = json!({ "track_update": update });
        let text = template::render(&config.template, &doc)?;
        let msg = BusMessage::new(
            twitch::TOPIC_CHAT_REQUEST,
            twitch::MessageTypeTwitchChatRequest::SendReq,
        )
        .with_payload(&twitch::TwitchChatRequestSendRequest {
            text: text.clone(),
            profile: config.send_as,
            channel: config.send_to,
        })?;
        self.client.send(msg)?;
        debug!(target = "chat.service", text = %text, "sent chat announcement");
        Ok(())
    }
}

#[async_trait]
impl Handler for ChatService {
    async fn handle(&self, msg: BusMessage) -> Option<BusMessage> {
        let mut reply;
        let result = match msg.topic.as_str() {
            TOPIC_REQUEST => match MessageTypeRequest::try_from(msg.msg_type) {
                Ok(MessageTypeRequest::ConfigGetReq) => {
                    reply = msg.reply_as(MessageTypeRequest::ConfigGetResp);
                    self.handle_get_config(&mut reply)
                }
                Ok(MessageTypeRequest::TrackAnnounceReq) => {
                    reply = msg.reply_as(MessageTypeRequest::TrackAnnounceResp);
                    self.handle_track_announce().await
                }
                _ => return unhandled(&msg),
            },
            TOPIC_COMMAND => match MessageTypeCommand::try_from(msg.msg_type) {
                Ok(MessageTypeCommand::ConfigSetReq) => {
                    reply = msg.reply_as(MessageTypeCommand::ConfigSetResp);
                    self.handle_set_config(&msg, &mut reply).await
                }
                _ => return unhandled(&msg),
            },
            trackstar::TOPIC_EVENT => {
                if let Ok(trackstar::MessageTypeEvent::TrackUpdate) =
                    trackstar::MessageTypeEvent::try_from(msg.msg_type)
                {
                    self.handle_track_update(&msg);
                }
                return None;
            }
            _ => return unhandled(&msg),
        };
        if let Err(err) = result {
            warn!(
                target = "chat.service",
                topic = %msg.topic,
                msg_type = msg.msg_type,
                error = %err,
                "request failed"
            );
            reply.error = Some(err.to_reply_error());
        }
        Some(reply)
    }
}

fn unhandled(msg: &BusMessage) -> Option<BusMessage> {
    debug!(target = "chat.service", topic = %msg.topic, msg_type = msg.msg_type, "ignoring message");
    None
}

/// Canonical form of a config the service stores.
pub fn normalize(config: &mut Config) {
    config.send_as = config.send_as.trim().to_string();
    config.send_to = config.send_to.trim().to_string();
    if config.send_to.is_empty() {
        config.send_to = config.send_as.clone();
    }
    if config.template.trim().is_empty() {
        config.template = DEFAULT_TEMPLATE.to_string();
    }
}

// Store writes touch the filesystem; keep them off the async workers.
async fn persist(store: &Arc<dyn ConfigStore>, config: &Config) -> ServiceResult<()> {
    let store = Arc::clone(store);
    let config = config.clone();
    tokio::task::spawn_blocking(move || store.save(&config)).await??;
    Ok(())
}

async fn first_profile(client: &dyn BusClient, timeout: Duration) -> ServiceResult<String> {
    let request = BusMessage::new(twitch::TOPIC_REQUEST, twitch::MessageTypeRequest::ListProfilesReq)
        .with_payload(&twitch::ListProfilesRequest {})?;
    let reply = send_and_timeout(client, request, timeout).await?;
    let response: twitch::ListProfilesResponse = reply.decode()?;
    response
        .names
        .into_iter()
        .next()
        .ok_or(ServiceError::NoProfiles)
}
