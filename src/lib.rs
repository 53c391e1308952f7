//! Playback of audio tracks and ordered track lists over an injected audio
//! engine.
//!
//! A [`Track`] owns one resource and a small state machine (loading, playing,
//! stopped) and reports what happens to it on its own [`EventBus`]. A
//! [`TrackList`] keeps a playback head over several tracks and advances it
//! when the current track finishes.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod library;
pub mod track;
pub mod tracklist;

#[cfg(test)]
mod testing;

pub use engine::{AudioEngine, PlaybackContext, ResourceLoader, ResourceRef};
pub use error::{EngineError, LoadError, TrackListError};
pub use events::{CancelToken, EventBus, SubscribeOptions, handler};
pub use track::{EndReason, NoOp, Track, TrackEvent, TrackOptions, TrackTopic, Transition};
pub use tracklist::{ListEvent, ListTopic, TrackList};
