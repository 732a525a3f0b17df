//! Relational record store for cached video and channel metadata.
//!
//! Two tables live in one SQLite file:
//! - `videos(key, date, value)`: the video id, its publish timestamp and the
//!   codec-encoded payload. The store never looks inside the payload.
//! - `channels(key, fanart, desc, uploads, title)`: one row per resolved
//!   channel.
//!
//! Every bulk write is a single transaction. There is no transaction spanning
//! both tables.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use libsql::params::Params;
use libsql::{Builder, Connection, Row, Transaction, Value, params};
use tracing::{debug, warn};

use crate::codec::{JsonCodec, PayloadCodec};
use crate::error::Result;

/// How long a writer waits for another process to release the file.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(1);
/// Keeps `IN (...)` lists well below SQLite's bound parameter limit.
const MAX_KEYS_PER_QUERY: usize = 500;

/// A cached video: created on first fetch, replaced by re-inserts and only
/// removed by eviction.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRecord {
    pub id: String,
    /// ISO-8601 timestamp; sorts chronologically as a plain string.
    pub published_at: String,
    pub payload: serde_json::Value,
}

/// Channel details cached when a channel is first resolved.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChannelRecord {
    pub id: String,
    /// Banner image url, empty when the channel has none.
    pub fanart: String,
    pub description: String,
    pub uploads_list_id: String,
    pub title: String,
}

/// Result of a keyed video read. Rows whose payload cannot be decoded are
/// reported by key instead of failing the whole batch.
#[derive(Debug, Default)]
pub struct VideoBatch {
    pub videos: Vec<VideoRecord>,
    pub corrupt: Vec<String>,
}

impl VideoBatch {
    pub fn ids(&self) -> Vec<&str> {
        self.videos.iter().map(|video| video.id.as_str()).collect()
    }
}

async fn configure_connection(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        PRAGMA busy_timeout={};
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        "#,
        busy_timeout.as_millis()
    ))
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            key TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            value BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            key TEXT PRIMARY KEY,
            fanart TEXT NOT NULL DEFAULT '',
            "desc" TEXT NOT NULL DEFAULT '',
            uploads TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT ''
        );
        "#,
    )
    .await?;
    Ok(())
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn text_params(keys: &[String]) -> Params {
    Params::Positional(keys.iter().cloned().map(Value::Text).collect())
}

/// Commits when every statement succeeded, otherwise rolls the whole batch
/// back so the store is left exactly as it was.
async fn finish(tx: Transaction, outcome: Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => Ok(tx.commit().await?),
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("rollback failed after {err}: {rollback}");
            }
            Err(err)
        }
    }
}

async fn insert_videos(conn: &Connection, encoded: Vec<(&VideoRecord, Vec<u8>)>) -> Result<()> {
    for (video, bytes) in encoded {
        conn.execute(
            "INSERT OR REPLACE INTO videos (key, date, value) VALUES (?1, ?2, ?3)",
            Params::Positional(vec![
                Value::Text(video.id.clone()),
                Value::Text(video.published_at.clone()),
                Value::Blob(bytes),
            ]),
        )
        .await?;
    }
    Ok(())
}

async fn insert_channels(conn: &Connection, channels: &[ChannelRecord]) -> Result<()> {
    for channel in channels {
        conn.execute(
            r#"
            INSERT OR REPLACE INTO channels (key, fanart, "desc", uploads, title)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                channel.id.as_str(),
                channel.fanart.as_str(),
                channel.description.as_str(),
                channel.uploads_list_id.as_str(),
                channel.title.as_str(),
            ],
        )
        .await?;
    }
    Ok(())
}

/// `table` is always one of our two literal table names.
async fn delete_keys(conn: &Connection, table: &str, ids: &[String]) -> Result<()> {
    for id in ids {
        conn.execute(
            &format!("DELETE FROM {table} WHERE key = ?1"),
            params![id.as_str()],
        )
        .await?;
    }
    Ok(())
}

/// Wrapper around the SQLite-compatible connection plus the payload codec.
pub struct RecordStore {
    conn: Connection,
    codec: Box<dyn PayloadCodec>,
    video_ids: HashSet<String>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("videos", &self.video_ids.len())
            .finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Opens (and if necessary creates) the store with JSON payloads.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_with_codec(path, Box::new(JsonCodec), DEFAULT_BUSY_TIMEOUT).await
    }

    pub async fn open_with_codec(
        path: &Path,
        codec: Box<dyn PayloadCodec>,
        busy_timeout: Duration,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        configure_connection(&conn, busy_timeout).await?;
        ensure_schema(&conn).await?;

        let mut store = Self {
            conn,
            codec,
            video_ids: HashSet::new(),
        };
        store.refresh_video_ids().await?;
        debug!(
            "opened record store {} with {} cached videos",
            path.display(),
            store.video_ids.len()
        );
        Ok(store)
    }

    async fn refresh_video_ids(&mut self) -> Result<()> {
        let mut rows = self.conn.query("SELECT key FROM videos", params![]).await?;
        let mut ids = HashSet::new();
        while let Some(row) = rows.next().await? {
            ids.insert(row.get::<String>(0)?);
        }
        self.video_ids = ids;
        Ok(())
    }

    /// Ids of every cached video, as of the last write.
    pub fn all_video_ids(&self) -> &HashSet<String> {
        &self.video_ids
    }

    pub fn has_video(&self, id: &str) -> bool {
        self.video_ids.contains(id)
    }

    /// Inserts or replaces videos in one transaction.
    pub async fn put_videos(&mut self, videos: &[VideoRecord]) -> Result<()> {
        if videos.is_empty() {
            return Ok(());
        }
        // Encode up front so a codec failure never leaves a half-written batch.
        let encoded = videos
            .iter()
            .map(|video| Ok((video, self.codec.encode(&video.payload)?)))
            .collect::<Result<Vec<_>>>()?;

        let tx = self.conn.transaction().await?;
        let outcome = insert_videos(&tx, encoded).await;
        finish(tx, outcome).await?;

        self.refresh_video_ids().await?;
        debug!("stored {} videos", videos.len());
        Ok(())
    }

    /// Inserts or replaces channels in one transaction.
    pub async fn put_channels(&self, channels: &[ChannelRecord]) -> Result<()> {
        if channels.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction().await?;
        let outcome = insert_channels(&tx, channels).await;
        finish(tx, outcome).await?;
        debug!("stored {} channels", channels.len());
        Ok(())
    }

    /// Reads the requested videos, preserving the order of `ids`. Unknown ids
    /// are skipped.
    pub async fn get_videos(&self, ids: &[String]) -> Result<VideoBatch> {
        let mut raw: HashMap<String, (String, Vec<u8>)> = HashMap::new();
        for chunk in ids.chunks(MAX_KEYS_PER_QUERY) {
            let sql = format!(
                "SELECT key, date, value FROM videos WHERE key IN ({})",
                placeholders(chunk.len())
            );
            let mut rows = self.conn.query(&sql, text_params(chunk)).await?;
            while let Some(row) = rows.next().await? {
                let key: String = row.get(0)?;
                raw.insert(key, (row.get(1)?, row.get(2)?));
            }
        }

        let mut batch = VideoBatch::default();
        for id in ids {
            let Some((published_at, bytes)) = raw.remove(id) else {
                continue;
            };
            match self.codec.decode(&bytes) {
                Ok(payload) => batch.videos.push(VideoRecord {
                    id: id.clone(),
                    published_at,
                    payload,
                }),
                Err(err) => {
                    warn!("cached payload for {id} is unusable: {err}");
                    batch.corrupt.push(id.clone());
                }
            }
        }
        Ok(batch)
    }

    /// Reads every cached video. Used by eviction.
    pub async fn list_videos(&self) -> Result<VideoBatch> {
        let mut rows = self
            .conn
            .query("SELECT key, date, value FROM videos ORDER BY key", params![])
            .await?;
        let mut batch = VideoBatch::default();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(2)?;
            match self.codec.decode(&bytes) {
                Ok(payload) => batch.videos.push(VideoRecord {
                    id,
                    published_at: row.get(1)?,
                    payload,
                }),
                Err(err) => {
                    warn!("cached payload for {id} is unusable: {err}");
                    batch.corrupt.push(id);
                }
            }
        }
        Ok(batch)
    }

    /// Reads the requested channels, preserving the order of `ids`.
    pub async fn get_channels(&self, ids: &[String]) -> Result<Vec<ChannelRecord>> {
        let mut found: HashMap<String, ChannelRecord> = HashMap::new();
        for chunk in ids.chunks(MAX_KEYS_PER_QUERY) {
            let sql = format!(
                r#"SELECT key, fanart, "desc", uploads, title FROM channels WHERE key IN ({})"#,
                placeholders(chunk.len())
            );
            let mut rows = self.conn.query(&sql, text_params(chunk)).await?;
            while let Some(row) = rows.next().await? {
                let channel = row_to_channel(&row)?;
                found.insert(channel.id.clone(), channel);
            }
        }
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    pub async fn get_channel(&self, id: &str) -> Result<Option<ChannelRecord>> {
        let mut channels = self.get_channels(&[id.to_string()]).await?;
        Ok(channels.pop())
    }

    pub async fn channel_ids(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query("SELECT key FROM channels ORDER BY key", params![])
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<String>(0)?);
        }
        Ok(ids)
    }

    pub async fn delete_video(&mut self, id: &str) -> Result<()> {
        self.delete_videos(&[id.to_string()]).await
    }

    /// Removes videos in one transaction.
    pub async fn delete_videos(&mut self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction().await?;
        let outcome = delete_keys(&tx, "videos", ids).await;
        finish(tx, outcome).await?;
        self.refresh_video_ids().await
    }

    pub async fn delete_channel(&self, id: &str) -> Result<()> {
        self.delete_channels(&[id.to_string()]).await
    }

    /// Removes channels in one transaction.
    pub async fn delete_channels(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction().await?;
        let outcome = delete_keys(&tx, "channels", ids).await;
        finish(tx, outcome).await
    }
}

/// Converts a SQL row into a `ChannelRecord`. Column order must match the
/// SELECT in `get_channels`.
fn row_to_channel(row: &Row) -> Result<ChannelRecord> {
    Ok(ChannelRecord {
        id: row.get(0)?,
        fanart: row.get(1)?,
        description: row.get(2)?,
        uploads_list_id: row.get(3)?,
        title: row.get(4)?,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::XzJsonCodec;
    use crate::error::CatalogError;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn sample_video(id: &str, published_at: &str) -> VideoRecord {
        VideoRecord {
            id: id.to_owned(),
            published_at: published_at.to_owned(),
            payload: json!({
                "id": id,
                "snippet": {"channelId": "c1", "publishedAt": published_at},
                "status": {"uploadStatus": "processed"}
            }),
        }
    }

    fn sample_channel(id: &str) -> ChannelRecord {
        ChannelRecord {
            id: id.to_owned(),
            fanart: format!("https://img.example/{id}.jpg"),
            description: "desc".into(),
            uploads_list_id: format!("UU{}", &id[2..]),
            title: format!("Channel {id}"),
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    /// Opens a brand-new store inside a temp directory; the directory guard
    /// must outlive the store.
    async fn create_store() -> Result<(tempfile::TempDir, RecordStore, PathBuf)> {
        let dir = tempdir()?;
        let path = dir.path().join("youtube/cache.sqlite");
        let store = RecordStore::open(&path).await?;
        Ok((dir, store, path))
    }

    #[tokio::test]
    async fn opens_store_and_creates_schema() -> Result<()> {
        let (_temp, store, path) = create_store().await?;
        assert!(path.exists(), "database file should be created");

        let mut rows = store.conn.query("PRAGMA journal_mode", params![]).await?;
        let journal: String = rows.next().await?.expect("journal row").get(0)?;
        assert_eq!(journal.to_lowercase(), "wal");

        for table in ["videos", "channels"] {
            let mut rows = store
                .conn
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                )
                .await?;
            let exists: Option<String> = rows
                .next()
                .await?
                .map(|row| row.get::<String>(0))
                .transpose()?;
            assert_eq!(exists.as_deref(), Some(table));
        }
        Ok(())
    }

    #[tokio::test]
    async fn nested_payloads_survive_roundtrip() -> Result<()> {
        let (_temp, mut store, _path) = create_store().await?;
        let video = VideoRecord {
            id: "v1".into(),
            published_at: "2024-01-01T00:00:00Z".into(),
            payload: json!({"id": "v1", "snippet": {"channelId": "c1"}}),
        };
        store.put_videos(std::slice::from_ref(&video)).await?;

        let batch = store.get_videos(&ids(&["v1"])).await?;
        assert!(batch.corrupt.is_empty());
        assert_eq!(batch.videos, vec![video]);
        Ok(())
    }

    #[tokio::test]
    async fn compressed_codec_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let mut store = RecordStore::open_with_codec(
            &dir.path().join("cache.sqlite"),
            Box::new(XzJsonCodec),
            DEFAULT_BUSY_TIMEOUT,
        )
        .await?;
        let video = sample_video("v1", "2024-01-01");
        store.put_videos(std::slice::from_ref(&video)).await?;
        let batch = store.get_videos(&ids(&["v1"])).await?;
        assert_eq!(batch.videos, vec![video]);
        Ok(())
    }

    #[tokio::test]
    async fn reinsert_replaces_existing_row() -> Result<()> {
        let (_temp, mut store, _path) = create_store().await?;
        store.put_videos(&[sample_video("v1", "2024-01-01")]).await?;

        let mut updated = sample_video("v1", "2024-02-02");
        updated.payload["statistics"] = json!({"viewCount": "7"});
        store.put_videos(std::slice::from_ref(&updated)).await?;

        let batch = store.get_videos(&ids(&["v1"])).await?;
        assert_eq!(batch.videos, vec![updated]);
        assert_eq!(store.all_video_ids().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn video_ids_refresh_after_writes() -> Result<()> {
        let (_temp, mut store, path) = create_store().await?;
        assert!(!store.has_video("v1"));

        store
            .put_videos(&[sample_video("v1", "2024-01-01"), sample_video("v2", "2024-01-02")])
            .await?;
        assert!(store.has_video("v1"));
        assert!(store.has_video("v2"));

        store.delete_video("v1").await?;
        assert!(!store.has_video("v1"));
        assert_eq!(store.all_video_ids(), &HashSet::from(["v2".to_string()]));

        // A fresh handle sees the persisted keys.
        drop(store);
        let reopened = RecordStore::open(&path).await?;
        assert!(reopened.has_video("v2"));
        Ok(())
    }

    #[tokio::test]
    async fn get_videos_keeps_requested_order_and_skips_unknown() -> Result<()> {
        let (_temp, mut store, _path) = create_store().await?;
        store
            .put_videos(&[
                sample_video("a", "2024-01-01"),
                sample_video("b", "2024-01-02"),
                sample_video("c", "2024-01-03"),
            ])
            .await?;

        let batch = store.get_videos(&ids(&["c", "ghost", "a"])).await?;
        assert_eq!(batch.ids(), vec!["c", "a"]);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_payload_does_not_poison_the_batch() -> Result<()> {
        let (_temp, mut store, _path) = create_store().await?;
        store.put_videos(&[sample_video("good", "2024-01-01")]).await?;
        store
            .conn
            .execute(
                "INSERT INTO videos (key, date, value) VALUES (?1, ?2, ?3)",
                Params::Positional(vec![
                    Value::Text("bad".into()),
                    Value::Text("2024-01-02".into()),
                    Value::Blob(b"\xff\xfe not json".to_vec()),
                ]),
            )
            .await?;

        let batch = store.get_videos(&ids(&["bad", "good"])).await?;
        assert_eq!(batch.corrupt, ids(&["bad"]));
        assert_eq!(batch.videos.len(), 1);
        assert_eq!(batch.videos[0].id, "good");

        let all = store.list_videos().await?;
        assert_eq!(all.corrupt, ids(&["bad"]));
        assert_eq!(all.videos.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn channels_roundtrip_and_delete() -> Result<()> {
        let (_temp, store, _path) = create_store().await?;
        store
            .put_channels(&[sample_channel("UCa"), sample_channel("UCb")])
            .await?;

        let channels = store.get_channels(&ids(&["UCb", "UCa", "UCx"])).await?;
        assert_eq!(channels, vec![sample_channel("UCb"), sample_channel("UCa")]);
        assert_eq!(
            store.get_channel("UCa").await?.map(|c| c.uploads_list_id),
            Some("UUa".to_string())
        );

        store.delete_channel("UCa").await?;
        assert!(store.get_channel("UCa").await?.is_none());
        assert_eq!(store.channel_ids().await?, ids(&["UCb"]));
        Ok(())
    }

    #[tokio::test]
    async fn large_key_sets_are_chunked() -> Result<()> {
        let (_temp, mut store, _path) = create_store().await?;
        let videos: Vec<VideoRecord> = (0..1200)
            .map(|index| sample_video(&format!("v{index:04}"), "2024-01-01"))
            .collect();
        store.put_videos(&videos).await?;

        let wanted: Vec<String> = videos.iter().map(|video| video.id.clone()).collect();
        let batch = store.get_videos(&wanted).await?;
        assert_eq!(batch.videos.len(), 1200);
        Ok(())
    }

    #[tokio::test]
    async fn locked_store_reports_busy() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cache.sqlite");
        let mut store =
            RecordStore::open_with_codec(&path, Box::new(JsonCodec), Duration::from_millis(100))
                .await?;

        let other = Builder::new_local(&path).build().await?.connect()?;
        other.execute("BEGIN EXCLUSIVE", params![]).await?;

        let err = store
            .put_videos(&[sample_video("v1", "2024-01-01")])
            .await
            .unwrap_err();
        assert!(
            matches!(err, CatalogError::StorageBusy(_)),
            "unexpected error: {err}"
        );

        other.execute("ROLLBACK", params![]).await?;
        store.put_videos(&[sample_video("v1", "2024-01-01")]).await?;
        assert!(store.has_video("v1"));
        Ok(())
    }
}
