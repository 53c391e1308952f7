//! Capabilities consumed by tracks.
//!
//! Tracks never talk to an audio backend directly: rendering goes through
//! [`AudioEngine`] (voices, gain controls, clock) and resource fetching goes
//! through [`ResourceLoader`]. Both are injected, together with the executor
//! used for asynchronous loads, as a [`PlaybackContext`].

use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::task::LocalSpawn;

use crate::error::LoadError;

pub mod loader;
pub mod output;

pub use loader::FileLoader;
pub use output::RodioEngine;

/// Opaque identifier of an audio resource (a path or URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef(String);

impl ResourceRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&Path> for ResourceRef {
    fn from(value: &Path) -> Self {
        Self(value.to_string_lossy().into_owned())
    }
}

/// Handle of a node in the engine's routing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Suspended,
    Closed,
}

/// Interleaved PCM produced by a [`ResourceLoader`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    channels: u16,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl DecodedBuffer {
    pub fn new(channels: u16, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
            samples: samples.into(),
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// One schedulable unit of playback.
///
/// A voice is one-shot: once started and then stopped (or finished), it cannot
/// be started again. Methods take `&self`; implementations keep their own
/// interior state so an engine may call back into a track while a voice call
/// is on the stack.
pub trait Voice {
    fn id(&self) -> NodeId;
    fn set_buffer(&self, buffer: DecodedBuffer);
    /// Begin playback at engine time `at` (a time in the past means now).
    fn start(&self, at: f64);
    fn stop(&self);
    /// Replace the callback run when the voice stops producing sound, whether
    /// it drained naturally or was stopped.
    fn on_ended(&self, callback: Box<dyn FnMut()>);
}

pub trait GainControl {
    fn id(&self) -> NodeId;
    /// Approach `value` exponentially from engine time `at` with the given
    /// time constant (seconds).
    fn ramp_to(&self, value: f32, at: f64, time_constant: f64);
}

pub trait AudioEngine {
    fn create_voice(&self, looping: bool) -> Rc<dyn Voice>;
    fn create_gain(&self) -> Rc<dyn GainControl>;
    fn connect(&self, from: NodeId, to: NodeId);
    /// The final destination node.
    fn output(&self) -> NodeId;
    /// Engine clock in seconds.
    fn clock_now(&self) -> f64;
    fn run_state(&self) -> RunState;
}

pub trait ResourceLoader {
    fn fetch_and_decode(
        &self,
        resource: &ResourceRef,
    ) -> LocalBoxFuture<'static, Result<DecodedBuffer, LoadError>>;
}

/// Everything a track needs from the outside world.
#[derive(Clone)]
pub struct PlaybackContext {
    pub engine: Rc<dyn AudioEngine>,
    pub loader: Rc<dyn ResourceLoader>,
    pub spawner: Rc<dyn LocalSpawn>,
}

impl PlaybackContext {
    pub fn new(
        engine: Rc<dyn AudioEngine>,
        loader: Rc<dyn ResourceLoader>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            engine,
            loader,
            spawner,
        }
    }
}

impl fmt::Debug for PlaybackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackContext")
            .field("run_state", &self.engine.run_state())
            .finish_non_exhaustive()
    }
}
