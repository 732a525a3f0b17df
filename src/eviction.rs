//! Retention planning for the record store.
//!
//! The plan is computed from a full snapshot before anything is deleted, so a
//! failure halfway through applying it never changes which rows are judged
//! live.

use std::collections::HashSet;

use crate::payload;
use crate::store::VideoRecord;

/// Number of processed videos kept after an eviction pass.
pub const RETAINED_VIDEOS: usize = 1000;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Video ids to delete: every non-processed or unreadable video, plus the
    /// oldest processed videos beyond the retention budget.
    pub remove: Vec<String>,
    /// Ids of the videos that stay.
    pub retained: HashSet<String>,
    /// Channels referenced by at least one retained video.
    pub live_channels: HashSet<String>,
}

impl EvictionPlan {
    /// Plans a pass over `videos` keeping the `budget` newest processed
    /// videos. `corrupt` lists rows whose payload could not be decoded.
    pub fn compute(videos: &[VideoRecord], corrupt: &[String], budget: usize) -> Self {
        let mut plan = Self {
            remove: corrupt.to_vec(),
            ..Self::default()
        };

        let mut processed: Vec<&VideoRecord> = Vec::with_capacity(videos.len());
        for video in videos {
            if payload::is_processed(&video.payload) {
                processed.push(video);
            } else {
                plan.remove.push(video.id.clone());
            }
        }

        // Newest first; ties broken by id so repeated passes agree.
        processed.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        for (rank, video) in processed.into_iter().enumerate() {
            if rank >= budget {
                plan.remove.push(video.id.clone());
                continue;
            }
            plan.retained.insert(video.id.clone());
            if let Some(channel_id) = payload::channel_id(&video.payload) {
                plan.live_channels.insert(channel_id.to_string());
            }
        }
        plan
    }
}

/// What an eviction pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct EvictionReport {
    pub videos_removed: usize,
    pub channels_removed: usize,
    pub references_removed: usize,
    pub videos_retained: usize,
}
