use std::time::Duration;

use serde::Deserialize;

/// Top-level player settings loaded from `config.toml`.
///
/// File format: TOML
/// Default path (Linux/XDG): `$XDG_CONFIG_HOME/playhead/config.toml` or `~/.config/playhead/config.toml`
///
/// Precedence (highest wins):
/// 1) Environment variables (prefix `PLAYHEAD__`, `__` as nested separator)
/// 2) Config file (if present)
/// 3) Struct defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub playback: PlaybackSettings,
    pub engine: EngineSettings,
    pub library: LibrarySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Shuffle the list once before playback starts.
    pub shuffle: bool,
    /// Loop each track's buffer; a looping track never finishes on its own.
    pub loop_tracks: bool,
    /// Start loading every track as soon as it is created.
    pub preload: bool,
}

impl PlaybackSettings {
    pub fn track_options(&self) -> crate::track::TrackOptions {
        crate::track::TrackOptions {
            looping: self.loop_tracks,
            preload: self.preload,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How often the driver pumps the output engine (milliseconds).
    pub tick_ms: u64,
}

impl EngineSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { tick_ms: 50 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    /// File extensions to treat as audio (case-insensitive, without dot).
    pub extensions: Vec<String>,
    /// Whether to follow symlinks during scanning.
    pub follow_links: bool,
    /// Whether to include hidden files/directories (dotfiles).
    pub include_hidden: bool,
    /// Whether to recurse into subdirectories.
    pub recursive: bool,
    /// Optional cap on directory recursion depth.
    pub max_depth: Option<usize>,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            extensions: vec!["mp3".into(), "flac".into(), "wav".into(), "ogg".into()],
            follow_links: true,
            include_hidden: true,
            recursive: true,
            max_depth: None,
        }
    }
}
