//! In-process stand-ins for the trackstar and twitch services, used when the
//! bridge runs without a host.

use async_trait::async_trait;
use tracing::debug;
use transport_bus::{BusMessage, Handler, ReplyError};
use twitchchat_proto::peers::{trackstar, twitch};

pub struct LocalPeers {
    profiles: Vec<String>,
    now_playing: Option<trackstar::Track>,
}

impl LocalPeers {
    pub const TOPICS: [&'static str; 2] = [trackstar::TOPIC_REQUEST, twitch::TOPIC_REQUEST];

    pub fn new(profiles: Vec<String>, now_playing: Option<trackstar::Track>) -> Self {
        Self {
            profiles,
            now_playing,
        }
    }

    fn get_track(&self, msg: &BusMessage) -> BusMessage {
        let mut reply = msg.reply_as(trackstar::MessageTypeRequest::GetTrackResp);
        let Some(track) = self.now_playing.clone() else {
            reply.error = Some(ReplyError::user("nothing is playing"));
            return reply;
        };
        let response = trackstar::GetTrackResponse {
            track_update: Some(trackstar::TrackUpdate {
                deck_id: "1".into(),
                when: unix_now(),
                track: Some(track),
            }),
        };
        if let Err(err) = reply.set_payload(&response) {
            reply.error = Some(ReplyError::detail(err.to_string()));
        }
        reply
    }

    fn list_profiles(&self, msg: &BusMessage) -> BusMessage {
        let mut reply = msg.reply_as(twitch::MessageTypeRequest::ListProfilesResp);
        let response = twitch::ListProfilesResponse {
            names: self.profiles.clone(),
        };
        if let Err(err) = reply.set_payload(&response) {
            reply.error = Some(ReplyError::detail(err.to_string()));
        }
        reply
    }
}

#[async_trait]
impl Handler for LocalPeers {
    async fn handle(&self, msg: BusMessage) -> Option<BusMessage> {
        debug!(target = "chat.peers", topic = %msg.topic, msg_type = msg.msg_type, "peer request");
        match msg.topic.as_str() {
            trackstar::TOPIC_REQUEST => match trackstar::MessageTypeRequest::try_from(msg.msg_type) {
                Ok(trackstar::MessageTypeRequest::GetTrackReq) => Some(self.get_track(&msg)),
                _ => None,
            },
            twitch::TOPIC_REQUEST => match twitch::MessageTypeRequest::try_from(msg.msg_type) {
                Ok(twitch::MessageTypeRequest::ListProfilesReq) => Some(self.list_profiles(&msg)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Parses `"Artist - Title"`; without a separator the whole text is the title.
pub fn parse_track(text: &str) -> trackstar::Track {
    match text.split_once(" - ") {
        Some((artist, title)) => trackstar::Track {
            artist: artist.trim().to_string(),
            title: title.trim().to_string(),
        },
        None => trackstar::Track {
            artist: String::new(),
            title: text.trim().to_string(),
        },
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
