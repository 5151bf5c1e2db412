//! Types for movie catalog API responses

use serde::{Deserialize, Serialize};

/// Response wrapper of the catalog API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailData {
    pub item: MovieDetail,
}

/// One playable episode on a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeLink {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    /// Embeddable player page
    #[serde(default)]
    pub link_embed: String,
    /// Direct HLS playlist
    #[serde(default)]
    pub link_m3u8: String,
}

/// A source (mirror) and its episode list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeServer {
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub server_data: Vec<EpisodeLink>,
}

/// The part of a movie's detail page the watch party needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDetail {
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub episodes: Vec<EpisodeServer>,
}

/// What the local player should load
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// HLS playlist the app plays itself
    Stream(String),
    /// Third-party player page, driven through the bridge
    Embed(String),
}

impl MediaSource {
    pub fn url(&self) -> &str {
        match self {
            MediaSource::Stream(url) | MediaSource::Embed(url) => url,
        }
    }

    pub fn is_embed(&self) -> bool {
        matches!(self, MediaSource::Embed(_))
    }
}

impl MovieDetail {
    /// Episode list of a server, empty if the index is out of range
    pub fn episodes_on(&self, server: u32) -> &[EpisodeLink] {
        self.episodes
            .get(server as usize)
            .map(|s| s.server_data.as_slice())
            .unwrap_or(&[])
    }

    /// Media for an episode index on a server, preferring the HLS stream
    pub fn resolve(&self, episode: u32, server: u32) -> Option<MediaSource> {
        let link = self.episodes_on(server).get(episode as usize)?;
        let m3u8 = link.link_m3u8.trim();
        let embed = link.link_embed.trim();
        if !m3u8.is_empty() {
            Some(MediaSource::Stream(m3u8.to_string()))
        } else if !embed.is_empty() {
            Some(MediaSource::Embed(embed.to_string()))
        } else {
            None
        }
    }
}
