//! Payloads of the peer services the bridge talks to: trackstar (what is
//! playing) and twitch (profiles and chat).

use serde::{Deserialize, Serialize};

pub mod trackstar {
    use super::*;

    pub const TOPIC_REQUEST: &str = "TRACKSTAR_REQUEST";
    pub const TOPIC_EVENT: &str = "TRACKSTAR_EVENT";

    crate::message_type!(
        MessageTypeRequest {
            GetTrackReq = 1,
            GetTrackResp = 2,
        }
    );

    crate::message_type!(
        MessageTypeEvent {
            TrackUpdate = 1,
        }
    );

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Track {
        #[serde(default)]
        pub artist: String,
        #[serde(default)]
        pub title: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TrackUpdate {
        #[serde(default)]
        pub deck_id: String,
        /// Unix seconds.
        #[serde(default)]
        pub when: i64,
        #[serde(default)]
        pub track: Option<Track>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GetTrackRequest {
        /// How far back from now to look; zero means the current track.
        #[serde(default)]
        pub delta_seconds: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GetTrackResponse {
        #[serde(default)]
        pub track_update: Option<TrackUpdate>,
    }
}

pub mod twitch {
    use super::*;

    pub const TOPIC_REQUEST: &str = "TWITCH_REQUEST";
    pub const TOPIC_CHAT_REQUEST: &str = "TWITCH_CHAT_REQUEST";

    crate::message_type!(
        MessageTypeRequest {
            ListProfilesReq = 1,
            ListProfilesResp = 2,
        }
    );

    crate::message_type!(
        MessageTypeTwitchChatRequest {
            SendReq = 1,
        }
    );

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ListProfilesRequest {}

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ListProfilesResponse {
        #[serde(default)]
        pub names: Vec<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TwitchChatRequestSendRequest {
        pub text: String,
        pub profile: String,
        pub channel: String,
    }
}
