//! Wire-facing status snapshots.

use serde::Serialize;
use vidra_tags::Tags;

/// Status of one file inside a managed torrent.
#[derive(Debug, Clone, Serialize)]
pub struct TorrentFileInfo {
    /// Display path of the file.
    #[serde(rename = "Name")]
    pub name: String,
    /// File size in bytes.
    #[serde(rename = "Size")]
    pub size: u64,
    /// Whether the playback pre-fetch budget is satisfied.
    #[serde(rename = "Ready")]
    pub ready: bool,
    /// Pre-fetch budget in bytes.
    #[serde(rename = "BytesWant")]
    pub bytes_want: u64,
    /// Pre-fetched bytes so far.
    #[serde(rename = "BytesHave")]
    pub bytes_have: u64,
}

/// Status snapshot of one managed torrent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TorrentInfo {
    /// Engine-side torrent name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Total payload size in bytes.
    #[serde(rename = "Size")]
    pub size: u64,
    /// Number of files in the payload.
    #[serde(rename = "FilesCount")]
    pub files_count: usize,
    /// Per-file status.
    #[serde(rename = "Files")]
    pub files: Vec<TorrentFileInfo>,
    /// Connected seeders.
    #[serde(rename = "Seeders")]
    pub seeders: u32,
    /// Active peers.
    #[serde(rename = "Leechers")]
    pub leechers: u32,
    /// Whether the payload is fully downloaded.
    #[serde(rename = "Completed")]
    pub completed: bool,
    /// Download completion percentage (0-100).
    #[serde(rename = "Completion")]
    pub completion: i64,
    /// Payload bytes received this session.
    #[serde(rename = "BytesDownloaded")]
    pub bytes_downloaded: u64,
    /// Payload bytes uploaded this session.
    #[serde(rename = "BytesUploaded")]
    pub bytes_uploaded: u64,
    /// Whether the torrent is paused.
    #[serde(rename = "Paused")]
    pub paused: bool,
    /// Open playback readers across all files.
    #[serde(rename = "OpenPlays")]
    pub open_plays: usize,
    /// Full tag map.
    #[serde(rename = "Tags")]
    pub tags: Tags,
    /// Last measured download rate in bytes per second.
    #[serde(rename = "DownloadRate")]
    pub download_rate: i64,
}
