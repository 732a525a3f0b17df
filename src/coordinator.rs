//! Cache-first access to catalog metadata.
//!
//! The coordinator owns the record store, the reference maps and the remote
//! client for one session. Every read checks the local caches first and only
//! asks the catalog API for what is missing; everything fetched is written
//! back before it is returned.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CatalogSettings;
use crate::error::{CatalogError, Result};
use crate::eviction::{EvictionPlan, EvictionReport, RETAINED_VIDEOS};
use crate::identifier::ContentId;
use crate::payload::{self, VideoPayload};
use crate::references::ReferenceCache;
use crate::remote::{ChannelLookup, RemoteClient, SearchParams, Transport};
use crate::store::{ChannelRecord, RecordStore, VideoRecord};

/// One page of a video listing.
#[derive(Debug, Clone, Default)]
pub struct VideoPage {
    pub videos: Vec<VideoPayload>,
    pub next_page_token: Option<String>,
}

/// One page of a channel's playlists.
#[derive(Debug, Clone, Default)]
pub struct PlaylistPage {
    /// The owning channel, when it is cached.
    pub channel: Option<ChannelRecord>,
    pub playlists: Vec<Value>,
    pub next_page_token: Option<String>,
}

pub struct CacheCoordinator<T> {
    remote: RemoteClient<T>,
    store: RecordStore,
    references: ReferenceCache,
    region: String,
    retained_videos: usize,
}

impl<T: Transport> CacheCoordinator<T> {
    pub fn new(
        remote: RemoteClient<T>,
        store: RecordStore,
        references: ReferenceCache,
        region: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            store,
            references,
            region: region.into(),
            retained_videos: RETAINED_VIDEOS,
        }
    }

    /// Opens the store and reference files under the configured profile.
    pub async fn open(settings: &CatalogSettings, transport: T) -> Result<Self> {
        let store = RecordStore::open(&settings.record_db_path()).await?;
        let references =
            ReferenceCache::open(settings.category_path(), settings.channel_ref_path())?;
        let remote = RemoteClient::new(transport, settings.api_key.clone(), settings.max_results);
        Ok(Self::new(remote, store, references, settings.region.clone()))
    }

    /// Overrides how many processed videos survive an eviction pass.
    pub fn with_retention(mut self, retained_videos: usize) -> Self {
        self.retained_videos = retained_videos;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn references(&self) -> &ReferenceCache {
        &self.references
    }

    /// More videos are cached than an eviction pass would keep.
    pub fn over_budget(&self) -> bool {
        self.store.all_video_ids().len() > self.retained_videos
    }

    /// Maps `identifier` to a playlist id when `require_uploads_list` is set,
    /// or to a canonical channel id otherwise.
    pub async fn resolve_identifier(
        &mut self,
        identifier: &str,
        require_uploads_list: bool,
    ) -> Result<String> {
        let content = ContentId::classify(identifier);
        debug!("resolving {content} (uploads list required: {require_uploads_list})");
        match content {
            ContentId::Playlist(id) if require_uploads_list => Ok(id.to_string()),
            ContentId::Playlist(id) => Err(CatalogError::resolution(format!(
                "cannot map a playlist id to a channel id: {id}"
            ))),
            ContentId::Uploads(id) if require_uploads_list => Ok(id.to_string()),
            ContentId::Uploads(id) => self
                .references
                .channel_for(id)
                .map(str::to_string)
                .ok_or_else(|| {
                    CatalogError::resolution(format!("no channel known for uploads list {id}"))
                }),
            ContentId::Channel(id) => self.channel_target(id, require_uploads_list).await,
            ContentId::ChannelName(name) => {
                let cached = self.references.channel_for(name).map(str::to_string);
                let channel_id = match cached {
                    Some(channel_id) => channel_id,
                    None => self.lookup_username(name).await?,
                };
                self.channel_target(&channel_id, require_uploads_list).await
            }
        }
    }

    async fn channel_target(&mut self, channel_id: &str, require_uploads_list: bool) -> Result<String> {
        if require_uploads_list {
            Ok(self.get_channel(channel_id).await?.uploads_list_id)
        } else {
            Ok(channel_id.to_string())
        }
    }

    async fn lookup_username(&mut self, name: &str) -> Result<String> {
        let channels = self
            .cache_channels(ChannelLookup::Username(name.to_string()))
            .await?;
        let channel = channels
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::resolution(format!("no such channel: {name}")))?;
        self.references.register_channel(name, channel.id.clone());
        self.references.flush_channels()?;
        Ok(channel.id)
    }

    /// Cached channel details, fetching and caching them on a miss.
    pub async fn get_channel(&mut self, channel_id: &str) -> Result<ChannelRecord> {
        if let Some(channel) = self.store.get_channel(channel_id).await? {
            return Ok(channel);
        }
        self.refresh_channels(&[channel_id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::resolution(format!("no such channel: {channel_id}")))
    }

    /// Fetches `ids` from the catalog and replaces their cached records.
    pub async fn refresh_channels(&mut self, ids: &[String]) -> Result<Vec<ChannelRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.cache_channels(ChannelLookup::Ids(ids.to_vec())).await
    }

    async fn cache_channels(&mut self, lookup: ChannelLookup) -> Result<Vec<ChannelRecord>> {
        let feed = self.remote.channels(lookup).await?;
        let channels = feed
            .items
            .iter()
            .map(channel_from_item)
            .collect::<Result<Vec<_>>>()?;
        if channels.is_empty() {
            return Ok(channels);
        }

        self.store.put_channels(&channels).await?;
        for channel in &channels {
            self.references
                .register_channel(channel.uploads_list_id.clone(), channel.id.clone());
        }
        self.references.flush_channels()?;
        debug!("cached {} channels", channels.len());
        Ok(channels)
    }

    /// Reloads every category name for the configured region.
    pub async fn refresh_categories(&mut self) -> Result<usize> {
        let feed = self.remote.video_categories(&[], &self.region).await?;
        let categories: Vec<(String, String)> = feed
            .items
            .iter()
            .filter_map(|item| {
                let id = item.get("id")?.as_str()?;
                let title = item.pointer("/snippet/title")?.as_str()?;
                Some((id.to_string(), title.to_string()))
            })
            .collect();
        let count = categories.len();
        self.references.store_categories(categories)?;
        info!("refreshed {count} categories for region {}", self.region);
        Ok(count)
    }

    /// Payloads for `ids`: cached ones first, in the caller's relative order,
    /// followed by freshly fetched ones in response order.
    pub async fn get_videos(&mut self, ids: &[String]) -> Result<Vec<VideoPayload>> {
        let mut seen = HashSet::new();
        let mut cached = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if self.store.has_video(id) {
                cached.push(id.clone());
            } else {
                missing.push(id.clone());
            }
        }

        let batch = self.store.get_videos(&cached).await?;
        // Unreadable rows are fetched again and overwritten.
        missing.extend(batch.corrupt);
        let mut videos: Vec<VideoPayload> =
            batch.videos.into_iter().map(|video| video.payload).collect();

        if !missing.is_empty() {
            debug!("{} cached, {} to fetch", videos.len(), missing.len());
            let fetched = self.fetch_videos(&missing).await?;
            videos.extend(fetched);
        }
        Ok(videos)
    }

    async fn fetch_videos(&mut self, ids: &[String]) -> Result<Vec<VideoPayload>> {
        let mut items = self.remote.videos(ids).await?.items;
        self.attach_category_names(&mut items).await?;

        let known = self.ensure_channels(&items).await?;
        let mut records = Vec::with_capacity(items.len());
        for item in &items {
            let id = payload::video_id(item)
                .ok_or_else(|| CatalogError::RemoteApi("video item without an id".into()))?;
            match payload::channel_id(item) {
                Some(channel_id) if known.contains(channel_id) => records.push(VideoRecord {
                    id: id.to_string(),
                    published_at: payload::published_at(item).unwrap_or_default().to_string(),
                    payload: item.clone(),
                }),
                _ => warn!("not caching video {id}: its channel could not be resolved"),
            }
        }
        self.store.put_videos(&records).await?;
        Ok(items)
    }

    /// Makes sure every channel referenced by `items` is cached and returns
    /// the ids that are.
    async fn ensure_channels(&mut self, items: &[Value]) -> Result<HashSet<String>> {
        let mut seen = HashSet::new();
        let wanted: Vec<String> = items
            .iter()
            .filter_map(payload::channel_id)
            .filter(|channel_id| seen.insert(*channel_id))
            .map(str::to_string)
            .collect();

        let mut known: HashSet<String> = self
            .store
            .get_channels(&wanted)
            .await?
            .into_iter()
            .map(|channel| channel.id)
            .collect();
        let unknown: Vec<String> = wanted
            .into_iter()
            .filter(|id| !known.contains(id))
            .collect();
        for channel in self.refresh_channels(&unknown).await? {
            known.insert(channel.id);
        }
        Ok(known)
    }

    async fn attach_category_names(&mut self, items: &mut [Value]) -> Result<()> {
        let mut refreshed = false;
        for item in items.iter_mut() {
            let Some(category_id) = payload::category_id(item).map(str::to_string) else {
                continue;
            };
            if self.references.category_name(&category_id).is_none() && !refreshed {
                refreshed = true;
                self.refresh_categories().await?;
            }
            let name = match self.references.category_name(&category_id) {
                Some(name) => name.to_string(),
                None => {
                    warn!("unknown category {category_id}, using the id as its name");
                    category_id.clone()
                }
            };
            payload::set_category_name(item, &name);
        }
        Ok(())
    }

    /// Public videos of a playlist, uploads list, channel or channel name.
    pub async fn playlist_videos(
        &mut self,
        content_id: &str,
        page_token: Option<&str>,
        follow_pages: bool,
    ) -> Result<VideoPage> {
        let playlist_id = self.resolve_identifier(content_id, true).await?;
        let feed = self
            .remote
            .playlist_items(&playlist_id, page_token, follow_pages)
            .await?;

        let mut ids = Vec::new();
        for item in &feed.items {
            let Some(video_id) = item.pointer("/snippet/resourceId/videoId").and_then(Value::as_str)
            else {
                continue;
            };
            match item.pointer("/status/privacyStatus").and_then(Value::as_str) {
                Some("public") => ids.push(video_id.to_string()),
                status => debug!("skipping video {video_id} with privacy status {status:?}"),
            }
        }

        Ok(VideoPage {
            videos: self.get_videos(&ids).await?,
            next_page_token: feed.next_page_token,
        })
    }

    /// Non-empty playlists of a channel.
    pub async fn channel_playlists(
        &mut self,
        content_id: &str,
        page_token: Option<&str>,
        follow_pages: bool,
    ) -> Result<PlaylistPage> {
        let channel_id = self.resolve_identifier(content_id, false).await?;
        let feed = self
            .remote
            .playlists(&channel_id, page_token, follow_pages)
            .await?;
        let playlists = feed
            .items
            .into_iter()
            .filter(|item| {
                item.pointer("/contentDetails/itemCount")
                    .and_then(Value::as_u64)
                    != Some(0)
            })
            .collect();

        Ok(PlaylistPage {
            channel: self.store.get_channel(&channel_id).await?,
            playlists,
            next_page_token: feed.next_page_token,
        })
    }

    /// Videos the catalog considers related to `video_id`.
    pub async fn related_videos(
        &mut self,
        video_id: &str,
        page_token: Option<&str>,
    ) -> Result<VideoPage> {
        let feed = self
            .remote
            .search(SearchParams {
                related_to: Some(video_id.to_string()),
                page_token: page_token.map(str::to_string),
                ..SearchParams::default()
            })
            .await?;
        let ids: Vec<String> = feed
            .items
            .iter()
            .filter_map(|item| item.pointer("/id/videoId").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        Ok(VideoPage {
            videos: self.get_videos(&ids).await?,
            next_page_token: feed.next_page_token,
        })
    }

    /// Trims the video cache to the retention budget, then drops channels and
    /// channel references no retained video points at.
    pub async fn run_eviction(&mut self) -> Result<EvictionReport> {
        let snapshot = self.store.list_videos().await?;
        let plan = EvictionPlan::compute(&snapshot.videos, &snapshot.corrupt, self.retained_videos);

        for id in &plan.remove {
            debug!("evicting video {id}");
        }
        self.store.delete_videos(&plan.remove).await?;

        let dead_channels: Vec<String> = self
            .store
            .channel_ids()
            .await?
            .into_iter()
            .filter(|id| !plan.live_channels.contains(id))
            .collect();
        self.store.delete_channels(&dead_channels).await?;

        let references_removed = self.references.retain_channels(&plan.live_channels)?;

        let report = EvictionReport {
            videos_removed: plan.remove.len(),
            channels_removed: dead_channels.len(),
            references_removed,
            videos_retained: plan.retained.len(),
        };
        info!(
            "evicted {} videos, {} channels and {} references; {} videos retained",
            report.videos_removed,
            report.channels_removed,
            report.references_removed,
            report.videos_retained
        );
        Ok(report)
    }
}

/// Converts one `channels` item into a record.
fn channel_from_item(item: &Value) -> Result<ChannelRecord> {
    let text = |pointer: &str| item.pointer(pointer).and_then(Value::as_str);
    let id = text("/id").ok_or_else(|| CatalogError::RemoteApi("channel item without an id".into()))?;
    let uploads = text("/contentDetails/relatedPlaylists/uploads").ok_or_else(|| {
        CatalogError::RemoteApi(format!("channel {id} has no uploads list"))
    })?;
    Ok(ChannelRecord {
        id: id.to_string(),
        fanart: text("/brandingSettings/image/bannerTvMediumImageUrl")
            .unwrap_or_default()
            .to_string(),
        description: text("/snippet/localized/description")
            .unwrap_or_default()
            .to_string(),
        uploads_list_id: uploads.to_string(),
        title: text("/snippet/localized/title").unwrap_or_default().to_string(),
    })
}
