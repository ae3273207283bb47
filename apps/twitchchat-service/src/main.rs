mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use config_client::{ChatConfigClient, OrderingPolicy};
use tracing::{debug, info};
use transport_bus::{serve, Bus, LocalBus, RequestClient};
use twitchchat_proto::peers::twitch;
use twitchchat_proto::Config;
use twitchchat_service::config::AppConfig;
use twitchchat_service::peers::{parse_track, LocalPeers};
use twitchchat_service::telemetry::init_tracing;
use twitchchat_service::{ChatService, ConfigStore, FileStore, MemoryStore};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = AppConfig::from_env();
    if cli.state_file.is_some() {
        cfg.state_file = cli.state_file.clone();
    }
    if cli.discard_stale {
        cfg.ordering = OrderingPolicy::DiscardStale;
    }
    init_tracing(&cfg.log_filter);

    let bus = Arc::new(LocalBus::new());
    let profiles = if cli.profiles.is_empty() {
        vec!["streamer".to_string()]
    } else {
        cli.profiles.clone()
    };
    let peers = Arc::new(LocalPeers::new(profiles, cli.now_playing.as_deref().map(parse_track)));
    let _peer_tasks = serve(bus.clone(), &LocalPeers::TOPICS, peers);

    let store: Arc<dyn ConfigStore> = match &cfg.state_file {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::default()),
    };
    let service = ChatService::start(
        store,
        Arc::new(RequestClient::new(bus.clone())),
        cfg.service_options(),
    )
    .await
    .context("starting chat service")?;
    let _service_tasks = serve(bus.clone(), &ChatService::TOPICS, service);

    info!(
        state_file = %cfg.state_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "memory".into()),
        ordering = ?cfg.ordering,
        "bridge running on local bus"
    );

    let chat = ChatConfigClient::with_policy(Arc::new(RequestClient::new(bus.clone())), cfg.ordering);
    let _sub = chat.subscribe(|snapshot| {
        debug!(announce = snapshot.announce, template = %snapshot.template, "config snapshot")
    });
    chat.refresh().await.context("fetching config")?;

    match cli.command {
        Commands::Show => {
            if let Some(current) = chat.last() {
                print_config(&current);
            }
        }
        Commands::Set {
            announce,
            template,
            send_as,
            send_to,
        } => {
            let saved = chat
                .edit(|cfg| {
                    if let Some(announce) = announce {
                        cfg.announce = announce;
                    }
                    if let Some(template) = template {
                        cfg.template = template;
                    }
                    if let Some(send_as) = send_as {
                        cfg.send_as = send_as;
                    }
                    if let Some(send_to) = send_to {
                        cfg.send_to = send_to;
                    }
                })
                .await
                .context("saving config")?;
            print_config(&saved);
        }
        Commands::Announce => {
            let mut chat_rx = bus.subscribe(twitch::TOPIC_CHAT_REQUEST);
            chat.announce().await.context("announcing current track")?;
            let sent = tokio::time::timeout(Duration::from_secs(1), chat_rx.recv())
                .await
                .context("waiting for chat message")?
                .context("chat topic closed")?;
            let line: twitch::TwitchChatRequestSendRequest = sent.decode()?;
            println!("[{} as {}] {}", line.channel, line.profile, line.text);
        }
        Commands::ResetTemplate => {
            // An empty template is stored as the default one.
            let saved = chat
                .edit(|cfg| cfg.template.clear())
                .await
                .context("resetting template")?;
            print_config(&saved);
        }
    }
    Ok(())
}

fn print_config(cfg: &Config) {
    println!("announce: {}", cfg.announce);
    println!("template: {}", cfg.template);
    println!("send as:  {}", cfg.send_as);
    println!("send to:  {}", cfg.send_to);
}
