#![forbid(unsafe_code)]

//! Command-line front end for the catalog cache. Every command prints JSON to
//! stdout, one document per line; logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use catalog_cache::config::{CatalogSettings, SettingsOverrides, resolve_settings};
use catalog_cache::payload;
use catalog_cache::{CacheCoordinator, UreqTransport};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "catalog-cache", version, about = "Cache-first catalog metadata lookups")]
struct Cli {
    /// Read settings from this file instead of `.env`.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[arg(long, global = true)]
    profile_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    api_key: Option<String>,
    #[arg(long, global = true)]
    region: Option<String>,
    /// Skip the eviction pass that follows a command which grew the video
    /// cache past its retention budget.
    #[arg(long, global = true)]
    no_evict: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a channel name, channel id, uploads list or playlist id.
    Resolve {
        identifier: String,
        /// Resolve to the uploads list instead of the channel id.
        #[arg(long)]
        uploads: bool,
    },
    /// Print cached or freshly fetched video metadata.
    Videos {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Print a short summary per video instead of the full payload.
        #[arg(long)]
        summary: bool,
    },
    /// Print channel details.
    Channel { identifier: String },
    /// List the public videos of a playlist or channel.
    Playlist {
        identifier: String,
        #[arg(long)]
        page_token: Option<String>,
        /// Follow continuation tokens to the last page.
        #[arg(long)]
        all: bool,
    },
    /// List the non-empty playlists of a channel.
    Playlists {
        identifier: String,
        #[arg(long)]
        page_token: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// List videos related to a video.
    Related {
        video_id: String,
        #[arg(long)]
        page_token: Option<String>,
    },
    /// Trim the cache to its retention budget.
    Evict,
}

impl Command {
    fn caches_videos(&self) -> bool {
        matches!(
            self,
            Self::Videos { .. } | Self::Playlist { .. } | Self::Related { .. }
        )
    }
}

/// Eviction also drops channels no cached video points at, so it only runs
/// once videos were added and the cache is over budget.
fn should_evict(caches_videos: bool, no_evict: bool, over_budget: bool) -> bool {
    caches_videos && !no_evict && over_budget
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("catalog_cache=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn video_summary(video: &Value, settings: &CatalogSettings) -> Value {
    json!({
        "id": payload::video_id(video),
        "title": payload::title(video),
        "channel": payload::channel_id(video),
        "category": payload::category_name(video),
        "published": payload::published_at(video),
        "seconds": payload::duration_seconds(video),
        "hd": payload::is_hd(video, settings),
    })
}

fn print_page(videos: &[Value], next_page_token: Option<&str>) -> Result<()> {
    for video in videos {
        print_json(video)?;
    }
    if let Some(token) = next_page_token {
        print_json(&json!({ "nextPageToken": token }))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let Cli {
        env_file,
        profile_dir,
        api_key,
        region,
        no_evict,
        command,
    } = Cli::parse();

    let settings = resolve_settings(SettingsOverrides {
        profile_dir,
        api_key,
        region,
        env_path: env_file,
    })
    .context("loading settings")?;

    let transport = UreqTransport::new(settings.api_base.clone());
    let mut cache = CacheCoordinator::open(&settings, transport)
        .await
        .with_context(|| format!("opening cache under {}", settings.cache_dir().display()))?;

    let evicting_command = command.caches_videos();
    match command {
        Command::Resolve {
            identifier,
            uploads,
        } => {
            let resolved = cache.resolve_identifier(&identifier, uploads).await?;
            print_json(&json!({ "identifier": identifier, "resolved": resolved }))?;
        }
        Command::Videos { ids, summary } => {
            for video in cache.get_videos(&ids).await? {
                if summary {
                    print_json(&video_summary(&video, &settings))?;
                } else {
                    print_json(&video)?;
                }
            }
        }
        Command::Channel { identifier } => {
            let channel_id = cache.resolve_identifier(&identifier, false).await?;
            let channel = cache.get_channel(&channel_id).await?;
            print_json(&serde_json::to_value(&channel)?)?;
        }
        Command::Playlist {
            identifier,
            page_token,
            all,
        } => {
            let page = cache
                .playlist_videos(&identifier, page_token.as_deref(), all)
                .await?;
            print_page(&page.videos, page.next_page_token.as_deref())?;
        }
        Command::Playlists {
            identifier,
            page_token,
            all,
        } => {
            let page = cache
                .channel_playlists(&identifier, page_token.as_deref(), all)
                .await?;
            print_page(&page.playlists, page.next_page_token.as_deref())?;
        }
        Command::Related {
            video_id,
            page_token,
        } => {
            let page = cache.related_videos(&video_id, page_token.as_deref()).await?;
            print_page(&page.videos, page.next_page_token.as_deref())?;
        }
        Command::Evict => {
            let report = cache.run_eviction().await?;
            print_json(&serde_json::to_value(report)?)?;
        }
    }

    if should_evict(evicting_command, no_evict, cache.over_budget()) {
        cache.run_eviction().await.context("evicting stale cache entries")?;
    }
    Ok(())
}
