//! Shared protocol definitions for the trackstar → Twitch chat bridge.
//! Topic names, per-topic message discriminators, and the JSON payloads
//! exchanged on each `(topic, type)` pair live here so the service and its
//! clients agree without depending on each other.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod peers;

/// Template used when none is configured.
pub const DEFAULT_TEMPLATE: &str = "{{ .track_update.track.artist }} - {{ .track_update.track.title }}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown message type {value} for {kind}")]
pub struct UnknownMessageType {
    pub kind: &'static str,
    pub value: i32,
}

macro_rules! message_type {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $value),+
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value as i32
            }
        }

        impl TryFrom<i32> for $name {
            type Error = $crate::UnknownMessageType;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    _ => Err($crate::UnknownMessageType {
                        kind: stringify!($name),
                        value,
                    }),
                }
            }
        }
    };
}
pub(crate) use message_type;

/// Topics owned by the chat bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusTopics {
    /// Reads and side-effect triggers that commit no state.
    TrackstarTwitchChatRequest,
    /// State-mutating writes.
    TrackstarTwitchChatCommand,
}

impl BusTopics {
    pub const fn as_str(self) -> &'static str {
        match self {
            BusTopics::TrackstarTwitchChatRequest => "TRACKSTAR_TWITCH_CHAT_REQUEST",
            BusTopics::TrackstarTwitchChatCommand => "TRACKSTAR_TWITCH_CHAT_COMMAND",
        }
    }
}

impl std::fmt::Display for BusTopics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const TOPIC_REQUEST: &str = BusTopics::TrackstarTwitchChatRequest.as_str();
pub const TOPIC_COMMAND: &str = BusTopics::TrackstarTwitchChatCommand.as_str();

message_type!(
    /// Discriminators on [`TOPIC_REQUEST`].
    MessageTypeRequest {
        ConfigGetReq = 1,
        ConfigGetResp = 2,
        TrackAnnounceReq = 3,
        TrackAnnounceResp = 4,
    }
);

message_type!(
    /// Discriminators on [`TOPIC_COMMAND`].
    MessageTypeCommand {
        ConfigSetReq = 1,
        ConfigSetResp = 2,
    }
);

/// Bridge configuration as stored by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Announce every new track in chat.
    #[serde(default)]
    pub announce: bool,
    /// Placeholder template rendered against `{ "track_update": .. }`.
    #[serde(default)]
    pub template: String,
    /// Twitch profile the announcement is sent as.
    #[serde(default)]
    pub send_as: String,
    /// Channel the announcement is sent to.
    #[serde(default)]
    pub send_to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigGetRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigGetResponse {
    #[serde(default)]
    pub config: Option<Config>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSetRequest {
    #[serde(default)]
    pub config: Option<Config>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSetResponse {
    #[serde(default)]
    pub config: Option<Config>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackAnnounceRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackAnnounceResponse {}
