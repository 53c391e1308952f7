//! Error types for playhead.

use thiserror::Error;

use crate::engine::ResourceRef;

/// Why a track could not become loaded.
///
/// Cloneable because one load outcome is shared by every caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The resource could not be read (missing file, I/O error, ...).
    #[error("failed to fetch {resource}: {reason}")]
    Fetch { resource: ResourceRef, reason: String },

    /// The bytes were read but are not decodable audio.
    #[error("failed to decode {resource}: {reason}")]
    Decode { resource: ResourceRef, reason: String },

    /// The load task could not be scheduled on the executor.
    #[error("failed to schedule load of {resource}: {reason}")]
    Spawn { resource: ResourceRef, reason: String },

    /// The track went away before its load finished.
    #[error("track for {resource} was dropped while loading")]
    Dropped { resource: ResourceRef },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackListError {
    #[error("track index {index} is out of range (list has {len} tracks)")]
    InvalidIndex { index: usize, len: usize },

    #[error(transparent)]
    Load(#[from] LoadError),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("audio output error: {0}")]
    Output(String),
}
