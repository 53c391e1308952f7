//! One audio resource and its load/play state machine.
//!
//! Load axis: `Unloaded -> Loading -> Loaded`, with `Failed` when the loader
//! reports an error (a later `load()` retries from there). Play axis:
//! `Stopped <-> Playing`, and a track only plays once it is loaded.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use futures::task::LocalSpawnExt;
use tracing::{debug, info, warn};

use crate::engine::{DecodedBuffer, GainControl, PlaybackContext, ResourceRef, RunState, Voice};
use crate::error::LoadError;
use crate::events::EventBus;

/// Smoothing time constant (seconds) applied to every volume change.
pub const VOLUME_TIME_CONSTANT: f64 = 0.1;

/// Outcome of a load, shared by every caller that asked for it.
pub type LoadFuture = Shared<LocalBoxFuture<'static, Result<(), LoadError>>>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackTopic {
    Loaded,
    Ended,
    LoadFailed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The voice drained on its own.
    Finished,
    /// Playback was halted with `stop()`.
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    Loaded,
    Ended(EndReason),
    LoadFailed(LoadError),
}

/// Why a transport command had no effect.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NoOp {
    NotLoaded,
    AlreadyPlaying,
    NotPlaying,
    EngineNotRunning,
    AtEnd,
    AtStart,
    Empty,
}

/// Result of a transport command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// Accepted, but waits for the track to finish loading.
    Deferred,
    Ignored(NoOp),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct TrackOptions {
    /// Loop the resource forever; a looping track never finishes on its own.
    pub looping: bool,
    /// Start loading as soon as the track is built.
    pub preload: bool,
}

enum LoadSlot {
    Unloaded,
    Loading(LoadFuture),
    Loaded(DecodedBuffer),
    Failed(LoadError),
}

pub struct Track {
    resource: ResourceRef,
    looping: bool,
    ctx: PlaybackContext,
    gain: Rc<dyn GainControl>,
    voice: RefCell<Rc<dyn Voice>>,
    // The current voice has already been started once and cannot be reused.
    voice_spent: Cell<bool>,
    load: RefCell<LoadSlot>,
    play: Cell<PlayState>,
    start_offset: Cell<f64>,
    // Play cycle counter; voice end callbacks carry the cycle they belong to.
    cycle: Cell<u64>,
    ended_published: Cell<bool>,
    events: EventBus<TrackTopic, TrackEvent>,
    me: Weak<Track>,
}

impl Track {
    /// Build a track and wire its voice through a private gain to the output.
    pub fn new(
        resource: impl Into<ResourceRef>,
        options: TrackOptions,
        ctx: &PlaybackContext,
    ) -> Rc<Self> {
        let engine = &ctx.engine;
        let voice = engine.create_voice(options.looping);
        let gain = engine.create_gain();
        engine.connect(voice.id(), gain.id());
        engine.connect(gain.id(), engine.output());

        let track = Rc::new_cyclic(|me| Self {
            resource: resource.into(),
            looping: options.looping,
            ctx: ctx.clone(),
            gain,
            voice: RefCell::new(voice),
            voice_spent: Cell::new(false),
            load: RefCell::new(LoadSlot::Unloaded),
            play: Cell::new(PlayState::Stopped),
            start_offset: Cell::new(0.0),
            cycle: Cell::new(0),
            ended_published: Cell::new(true),
            events: EventBus::new(),
            me: me.clone(),
        });

        if options.preload {
            // The fetch is spawned; nobody needs to hold the future.
            drop(track.load());
        }
        track
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn events(&self) -> &EventBus<TrackTopic, TrackEvent> {
        &self.events
    }

    pub fn load_state(&self) -> LoadState {
        match &*self.load.borrow() {
            LoadSlot::Unloaded => LoadState::Unloaded,
            LoadSlot::Loading(_) => LoadState::Loading,
            LoadSlot::Loaded(_) => LoadState::Loaded,
            LoadSlot::Failed(_) => LoadState::Failed,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.load_state() == LoadState::Loaded
    }

    pub fn play_state(&self) -> PlayState {
        self.play.get()
    }

    pub fn is_playing(&self) -> bool {
        self.play.get() == PlayState::Playing
    }

    /// Seconds since the current play cycle started; 0 while stopped.
    pub fn current_time(&self) -> f64 {
        match self.play.get() {
            PlayState::Playing => self.start_offset.get() + self.ctx.engine.clock_now(),
            PlayState::Stopped => 0.0,
        }
    }

    #[cfg(test)]
    pub(crate) fn gain_id(&self) -> crate::engine::NodeId {
        self.gain.id()
    }

    pub fn set_volume(&self, volume: f32) {
        let now = self.ctx.engine.clock_now();
        self.gain.ramp_to(volume, now, VOLUME_TIME_CONSTANT);
    }

    /// Fetch and decode the resource.
    ///
    /// Only the first call issues a fetch; calls made while it is in flight
    /// share its outcome, and calls made after success resolve at once. The
    /// fetch runs on the context's spawner, so dropping the returned future
    /// does not cancel it.
    pub fn load(&self) -> LoadFuture {
        match &*self.load.borrow() {
            LoadSlot::Loading(pending) => {
                debug!(resource = %self.resource, "load already in flight");
                return pending.clone();
            }
            LoadSlot::Loaded(_) => return resolved(Ok(())),
            LoadSlot::Unloaded | LoadSlot::Failed(_) => {}
        }

        info!(resource = %self.resource, "loading track");
        let fetch = self.ctx.loader.fetch_and_decode(&self.resource);
        let me = self.me.clone();
        let resource = self.resource.clone();
        let pending: LoadFuture = async move {
            let outcome = fetch.await;
            match me.upgrade() {
                Some(track) => track.finish_load(outcome),
                None => Err(LoadError::Dropped { resource }),
            }
        }
        .boxed_local()
        .shared();

        *self.load.borrow_mut() = LoadSlot::Loading(pending.clone());

        if let Err(e) = self.ctx.spawner.spawn_local(pending.clone().map(|_| ())) {
            let error = LoadError::Spawn {
                resource: self.resource.clone(),
                reason: e.to_string(),
            };
            return resolved(self.finish_load(Err(error)));
        }
        pending
    }

    fn finish_load(&self, outcome: Result<DecodedBuffer, LoadError>) -> Result<(), LoadError> {
        match outcome {
            Ok(buffer) => {
                let voice = self.voice.borrow().clone();
                voice.set_buffer(buffer.clone());
                *self.load.borrow_mut() = LoadSlot::Loaded(buffer);
                // Silent until started.
                self.set_volume(0.0);
                info!(resource = %self.resource, "track loaded");
                self.events.publish(TrackTopic::Loaded, &TrackEvent::Loaded);
                Ok(())
            }
            Err(error) => {
                warn!(resource = %self.resource, %error, "track failed to load");
                *self.load.borrow_mut() = LoadSlot::Failed(error.clone());
                self.events
                    .publish(TrackTopic::LoadFailed, &TrackEvent::LoadFailed(error.clone()));
                Err(error)
            }
        }
    }

    /// Begin playback from the start of the resource, fading in.
    ///
    /// Ignored unless the track is loaded and stopped.
    pub fn start(&self) -> Transition {
        let buffer = match &*self.load.borrow() {
            LoadSlot::Loaded(buffer) => buffer.clone(),
            _ => {
                debug!(resource = %self.resource, "start ignored: track not loaded");
                return Transition::Ignored(NoOp::NotLoaded);
            }
        };
        if self.is_playing() {
            debug!(resource = %self.resource, "start ignored: already playing");
            return Transition::Ignored(NoOp::AlreadyPlaying);
        }

        let voice = if self.voice_spent.get() {
            self.rearm_voice(buffer)
        } else {
            self.voice.borrow().clone()
        };

        let cycle = self.cycle.get() + 1;
        self.cycle.set(cycle);
        self.ended_published.set(false);
        let me = self.me.clone();
        voice.on_ended(Box::new(move || {
            if let Some(track) = me.upgrade() {
                track.voice_ended(cycle);
            }
        }));

        let now = self.ctx.engine.clock_now();
        self.start_offset.set(-now);
        self.play.set(PlayState::Playing);
        self.voice_spent.set(true);
        voice.start(now);
        self.set_volume(1.0);
        info!(resource = %self.resource, cycle, "track started");
        Transition::Applied
    }

    /// Fade out and halt playback.
    ///
    /// Ignored unless the track is playing and the engine is running.
    pub fn stop(&self) -> Transition {
        if !self.is_loaded() {
            debug!(resource = %self.resource, "stop ignored: track not loaded");
            return Transition::Ignored(NoOp::NotLoaded);
        }
        if !self.is_playing() {
            debug!(resource = %self.resource, "stop ignored: not playing");
            return Transition::Ignored(NoOp::NotPlaying);
        }
        let run_state = self.ctx.engine.run_state();
        if run_state != RunState::Running {
            debug!(resource = %self.resource, ?run_state, "stop ignored: engine not running");
            return Transition::Ignored(NoOp::EngineNotRunning);
        }

        self.set_volume(0.0);
        self.play.set(PlayState::Stopped);
        self.start_offset.set(0.0);
        let voice = self.voice.borrow().clone();
        voice.stop();
        info!(resource = %self.resource, "track stopped");

        // The engine may already have reported the end from inside `voice.stop()`.
        if !self.ended_published.replace(true) {
            self.events
                .publish(TrackTopic::Ended, &TrackEvent::Ended(EndReason::Stopped));
        }
        Transition::Applied
    }

    // Voices are one-shot, so every cycle after the first gets a new one.
    fn rearm_voice(&self, buffer: DecodedBuffer) -> Rc<dyn Voice> {
        let engine = &self.ctx.engine;
        let voice = engine.create_voice(self.looping);
        voice.set_buffer(buffer);
        engine.connect(voice.id(), self.gain.id());
        *self.voice.borrow_mut() = voice.clone();
        debug!(resource = %self.resource, voice = voice.id().0, "acquired fresh voice");
        voice
    }

    fn voice_ended(&self, cycle: u64) {
        if cycle != self.cycle.get() {
            debug!(resource = %self.resource, cycle, "ignoring end of a previous cycle");
            return;
        }
        if self.ended_published.replace(true) {
            return;
        }
        let reason = match self.play.get() {
            PlayState::Playing => {
                self.play.set(PlayState::Stopped);
                self.start_offset.set(0.0);
                EndReason::Finished
            }
            PlayState::Stopped => EndReason::Stopped,
        };
        info!(resource = %self.resource, ?reason, "track ended");
        self.events.publish(TrackTopic::Ended, &TrackEvent::Ended(reason));
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        if self.play.get() == PlayState::Playing {
            self.voice.get_mut().stop();
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("resource", &self.resource)
            .field("looping", &self.looping)
            .field("load_state", &self.load_state())
            .field("play_state", &self.play.get())
            .finish()
    }
}

fn resolved(result: Result<(), LoadError>) -> LoadFuture {
    future::ready(result).boxed_local().shared()
}
