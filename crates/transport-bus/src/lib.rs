//! Topic-addressed message bus with request/reply correlation.
//!
//! A [`BusMessage`] is routed by `topic`, disambiguated by `msg_type`, and
//! carries an opaque JSON payload. Requests that expect an answer carry a
//! [`Correlation`]; the responder builds its answer with [`BusMessage::reply`]
//! and the requesting [`RequestClient`] resolves exactly one pending call per
//! reply.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

mod request;
mod serve;

pub use request::{send_and_timeout, send_with_reply, BusClient, RequestClient};
pub use serve::{serve, Handler};

/// Binds a reply to the request that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub id: u64,
    pub reply_topic: String,
}

/// Failure reported by the responder inside a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyError {
    pub code: Option<i32>,
    pub detail: Option<String>,
    pub user_message: Option<String>,
}

impl ReplyError {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            user_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::default()
        }
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user_message, &self.detail, self.code) {
            (Some(message), _, _) => f.write_str(message),
            (None, Some(detail), _) => f.write_str(detail),
            (None, None, Some(code)) => write!(f, "error code {code}"),
            (None, None, None) => f.write_str("unspecified error"),
        }
    }
}

impl std::error::Error for ReplyError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub msg_type: i32,
    pub message: Bytes,
    pub error: Option<ReplyError>,
    pub correlation: Option<Correlation>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, msg_type: impl Into<i32>) -> Self {
        Self {
            topic: topic.into(),
            msg_type: msg_type.into(),
            message: Bytes::new(),
            error: None,
            correlation: None,
        }
    }

    /// Serializes `payload` as the message body.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> BusResult<Self> {
        self.set_payload(payload)?;
        Ok(self)
    }

    pub fn set_payload<T: Serialize>(&mut self, payload: &T) -> BusResult<()> {
        let bytes = serde_json::to_vec(payload).map_err(|err| BusError::Encode(err.to_string()))?;
        self.message = Bytes::from(bytes);
        Ok(())
    }

    /// Decodes the body, refusing to touch it when the reply carries an error.
    ///
    /// An empty body decodes as `{}` so payload types whose fields all have
    /// defaults accept it.
    pub fn decode<T: DeserializeOwned>(&self) -> BusResult<T> {
        if let Some(err) = &self.error {
            return Err(BusError::Reply(err.clone()));
        }
        let body: &[u8] = if self.message.is_empty() {
            b"{}"
        } else {
            &self.message
        };
        serde_json::from_slice(body).map_err(|err| BusError::Decode(err.to_string()))
    }

    /// Converts a reply carrying an error into `Err`.
    pub fn into_result(self) -> BusResult<Self> {
        match self.error {
            Some(err) => Err(BusError::Reply(err)),
            None => Ok(self),
        }
    }

    /// Default reply to this request: same type, addressed to the requester's
    /// reply topic, empty body.
    pub fn reply(&self) -> BusMessage {
        let topic = self
            .correlation
            .as_ref()
            .map(|c| c.reply_topic.clone())
            .unwrap_or_else(|| self.topic.clone());
        BusMessage {
            topic,
            msg_type: self.msg_type,
            message: Bytes::new(),
            error: None,
            correlation: self.correlation.clone(),
        }
    }

    /// Like [`reply`](Self::reply), tagged with the response's own type.
    pub fn reply_as(&self, msg_type: impl Into<i32>) -> BusMessage {
        BusMessage {
            msg_type: msg_type.into(),
            ..self.reply()
        }
    }

    pub fn expects_reply(&self) -> bool {
        self.correlation.is_some()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
    #[error("{0}")]
    Reply(ReplyError),
    #[error("encoding payload: {0}")]
    Encode(String),
    #[error("decoding payload: {0}")]
    Decode(String),
    #[error("request dropped before a reply arrived")]
    Dropped,
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

impl BusError {
    /// True for failures of the send mechanism itself, as opposed to an
    /// error the responder put in its reply.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BusError::Closed | BusError::Transport(_) | BusError::Dropped | BusError::Timeout(_)
        )
    }
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;
    fn publish(&self, message: BusMessage) -> BusResult<()>;
}

const DEFAULT_CAPACITY: usize = 64;

/// Simple in-memory bus for tests and single-process wiring.
///
/// Each topic buffers `capacity` messages per subscriber; a subscriber that
/// falls further behind sees `RecvError::Lagged`.
#[derive(Debug)]
pub struct LocalBus {
    topics: parking_lot::RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: parking_lot::RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(topic).subscribe()
    }

    /// Fails with [`BusError::Closed`] when nobody listens on the topic.
    fn publish(&self, message: BusMessage) -> BusResult<()> {
        let sender = self.sender_for(&message.topic);
        sender.send(message).map(|_| ()).map_err(|_| BusError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Probe {
        #[serde(default)]
        value: u32,
    }

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("controller/input");
        let msg = BusMessage::new("controller/input", 7)
            .with_payload(&Probe { value: 3 })
            .expect("encode");
        bus.publish(msg).expect("publish ok");
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, "controller/input");
        assert_eq!(msg.msg_type, 7);
        assert_eq!(msg.decode::<Probe>().expect("decode"), Probe { value: 3 });
    }

    #[test]
    fn publish_without_listeners_is_closed() {
        let bus = LocalBus::new();
        let err = bus.publish(BusMessage::new("nobody", 1)).unwrap_err();
        assert_eq!(err, BusError::Closed);
        assert!(err.is_transport());
    }

    #[test]
    fn decode_refuses_failed_reply() {
        let mut reply = BusMessage::new("t", 1)
            .with_payload(&Probe { value: 9 })
            .expect("encode");
        reply.error = Some(ReplyError::user("storage offline"));
        match reply.decode::<Probe>() {
            Err(BusError::Reply(err)) => assert_eq!(err.to_string(), "storage offline"),
            other => panic!("expected reply error, got {other:?}"),
        }
        assert!(reply.into_result().is_err());
    }

    #[test]
    fn empty_body_decodes_as_defaults() {
        let msg = BusMessage::new("t", 1);
        assert_eq!(msg.decode::<Probe>().expect("decode"), Probe::default());
    }

    #[test]
    fn reply_targets_requesters_topic() {
        let mut request = BusMessage::new("svc.request", 4);
        request.correlation = Some(Correlation {
            id: 11,
            reply_topic: "client.reply.1".into(),
        });
        let reply = request.reply();
        assert_eq!(reply.topic, "client.reply.1");
        assert_eq!(reply.msg_type, 4);
        assert_eq!(reply.correlation, request.correlation);
        assert!(reply.message.is_empty());
    }

    #[test]
    fn reply_as_sets_response_type() {
        let mut request = BusMessage::new("svc.request", 1);
        request.correlation = Some(Correlation {
            id: 2,
            reply_topic: "client.reply.2".into(),
        });
        let reply = request.reply_as(2);
        assert_eq!(reply.msg_type, 2);
        assert_eq!(reply.topic, "client.reply.2");
        assert_eq!(reply.correlation, request.correlation);
    }

    #[test]
    fn reply_error_display_prefers_user_message() {
        let err = ReplyError {
            code: Some(3),
            detail: Some("disk full".into()),
            user_message: Some("could not save".into()),
        };
        assert_eq!(err.to_string(), "could not save");
        assert_eq!(
            ReplyError {
                code: Some(3),
                ..ReplyError::default()
            }
            .to_string(),
            "error code 3"
        );
    }
}
