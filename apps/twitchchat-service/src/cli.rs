use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "trackstar-twitchchat")]
#[command(about = "View and edit the trackstar Twitch chat announcer over an in-process bus")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON file the config is persisted to (in memory when omitted)
    #[arg(long, env = "TWITCHCHAT_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Twitch profile offered by the local twitch stand-in (repeatable)
    #[arg(long = "profile")]
    pub profiles: Vec<String>,

    /// Track reported by the local trackstar stand-in, as "Artist - Title"
    #[arg(long)]
    pub now_playing: Option<String>,

    /// Drop replies that resolve after a newer request's reply
    #[arg(long)]
    pub discard_stale: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the current configuration
    Show,

    /// Change configuration fields; the stored (normalized) result is printed
    Set {
        /// Announce every new track in chat
        #[arg(long)]
        announce: Option<bool>,

        /// Announcement template, e.g. "{{ .track_update.track.title }}"
        #[arg(long)]
        template: Option<String>,

        /// Profile to send as
        #[arg(long)]
        send_as: Option<String>,

        /// Channel to send to
        #[arg(long)]
        send_to: Option<String>,
    },

    /// Announce the current track once
    Announce,

    /// Go back to the default announcement template
    ResetTemplate,
}
