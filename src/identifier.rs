//! Structural classification of loosely specified content identifiers.
//!
//! Callers hand us whatever they have: a channel display name, a channel id,
//! the id of a channel's uploads list, or a playlist id. The first two
//! characters are enough to tell them apart.

use std::fmt;

/// Every shape of identifier the resolver understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentId<'a> {
    /// `PL...` user playlists and `FL...` system lists (favourites).
    Playlist(&'a str),
    /// `UU...` lists holding every upload of one channel.
    Uploads(&'a str),
    /// `UC...` canonical channel ids.
    Channel(&'a str),
    /// Anything else is treated as a channel display name.
    ChannelName(&'a str),
}

impl<'a> ContentId<'a> {
    /// Classifies `raw` by its two-character prefix.
    pub fn classify(raw: &'a str) -> Self {
        match raw.get(..2) {
            Some("PL" | "FL") => Self::Playlist(raw),
            Some("UU") => Self::Uploads(raw),
            Some("UC") => Self::Channel(raw),
            _ => Self::ChannelName(raw),
        }
    }

    pub fn as_str(&self) -> &'a str {
        match *self {
            Self::Playlist(id) | Self::Uploads(id) | Self::Channel(id) | Self::ChannelName(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Playlist(_) => "playlist",
            Self::Uploads(_) => "uploads list",
            Self::Channel(_) => "channel",
            Self::ChannelName(_) => "channel name",
        }
    }
}

impl fmt::Display for ContentId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`", self.kind(), self.as_str())
    }
}
