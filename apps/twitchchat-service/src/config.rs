use std::path::PathBuf;
use std::time::Duration;

use config_client::OrderingPolicy;

use crate::service::ServiceOptions;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_filter: String,
    /// Persist config here; in memory when unset.
    pub state_file: Option<PathBuf>,
    pub track_timeout_ms: u64,
    pub profile_timeout_ms: u64,
    pub ordering: OrderingPolicy,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let log_filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,twitchchat_service=debug".into());
        let state_file = std::env::var("TWITCHCHAT_STATE_FILE").ok().map(PathBuf::from);
        let track_timeout_ms = std::env::var("TWITCHCHAT_TRACK_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_000);
        let profile_timeout_ms = std::env::var("TWITCHCHAT_PROFILE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000);
        let ordering = std::env::var("TWITCHCHAT_DISCARD_STALE")
            .map(|v| parse_ordering(&v))
            .unwrap_or_default();
        Self {
            log_filter,
            state_file,
            track_timeout_ms,
            profile_timeout_ms,
            ordering,
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            track_timeout: Duration::from_millis(self.track_timeout_ms),
            profile_timeout: Duration::from_millis(self.profile_timeout_ms),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            state_file: None,
            track_timeout_ms: 1_000,
            profile_timeout_ms: 5_000,
            ordering: OrderingPolicy::LastReplyWins,
        }
    }
}

fn parse_ordering(value: &str) -> OrderingPolicy {
    if matches!(value, "1" | "true" | "TRUE" | "yes" | "on") {
        OrderingPolicy::DiscardStale
    } else {
        OrderingPolicy::LastReplyWins
    }
}
