#![forbid(unsafe_code)]

//! Local metadata cache in front of a video catalog API.
//!
//! Content identifiers of unknown shape are resolved to channel or playlist
//! ids, video and channel metadata is served from a SQLite record store when
//! possible and fetched in batches when not, and an eviction pass keeps the
//! store bounded while leaving channels and channel references consistent
//! with the videos that remain.

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod eviction;
pub mod identifier;
pub mod payload;
pub mod references;
pub mod remote;
pub mod store;

#[cfg(test)]
mod testing;

pub use coordinator::{CacheCoordinator, PlaylistPage, VideoPage};
pub use error::{CatalogError, Result};
pub use identifier::ContentId;
pub use remote::{RemoteClient, Transport, UreqTransport};
pub use store::{ChannelRecord, RecordStore, VideoRecord};
