//! Scripted engine and loader used by the unit tests.
//!
//! The engine records every voice/gain interaction and only reports a voice
//! end when a test asks it to, so tests decide exactly when playback
//! "finishes". The loader hands out fetches that stay pending until resolved.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::future::{self, FutureExt, LocalBoxFuture};

use crate::engine::{
    AudioEngine, DecodedBuffer, GainControl, NodeId, PlaybackContext, ResourceLoader, ResourceRef,
    RunState, Voice,
};
use crate::error::LoadError;
use crate::track::{Track, TrackOptions};

pub(crate) fn tone() -> DecodedBuffer {
    DecodedBuffer::new(2, 8_000, vec![0.25; 1_600])
}

pub(crate) struct ScriptedVoice {
    id: NodeId,
    pub looping: bool,
    pub buffer: RefCell<Option<DecodedBuffer>>,
    pub starts: RefCell<Vec<f64>>,
    pub stops: Cell<usize>,
    end_on_stop: bool,
    on_ended: RefCell<Option<Box<dyn FnMut()>>>,
}

impl ScriptedVoice {
    /// Run the end callback as the engine would.
    pub fn fire_ended(&self) {
        let callback = self.on_ended.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback();
            let mut slot = self.on_ended.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }
}

impl Voice for ScriptedVoice {
    fn id(&self) -> NodeId {
        self.id
    }

    fn set_buffer(&self, buffer: DecodedBuffer) {
        *self.buffer.borrow_mut() = Some(buffer);
    }

    fn start(&self, at: f64) {
        self.starts.borrow_mut().push(at);
    }

    fn stop(&self) {
        self.stops.set(self.stops.get() + 1);
        if self.end_on_stop {
            self.fire_ended();
        }
    }

    fn on_ended(&self, callback: Box<dyn FnMut()>) {
        *self.on_ended.borrow_mut() = Some(callback);
    }
}

pub(crate) struct ScriptedGain {
    id: NodeId,
    pub ramps: RefCell<Vec<(f32, f64, f64)>>,
}

impl ScriptedGain {
    pub fn last_target(&self) -> Option<f32> {
        self.ramps.borrow().last().map(|r| r.0)
    }
}

impl GainControl for ScriptedGain {
    fn id(&self) -> NodeId {
        self.id
    }

    fn ramp_to(&self, value: f32, at: f64, time_constant: f64) {
        self.ramps.borrow_mut().push((value, at, time_constant));
    }
}

pub(crate) struct ScriptedEngine {
    clock: Cell<f64>,
    run_state: Cell<RunState>,
    next_id: Cell<u64>,
    end_on_stop: Cell<bool>,
    pub voices: RefCell<Vec<Rc<ScriptedVoice>>>,
    pub gains: RefCell<Vec<Rc<ScriptedGain>>>,
    pub connections: RefCell<Vec<(NodeId, NodeId)>>,
}

impl ScriptedEngine {
    pub const OUTPUT: NodeId = NodeId(u64::MAX);

    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            clock: Cell::new(10.0),
            run_state: Cell::new(RunState::Running),
            next_id: Cell::new(0),
            end_on_stop: Cell::new(false),
            voices: RefCell::new(Vec::new()),
            gains: RefCell::new(Vec::new()),
            connections: RefCell::new(Vec::new()),
        })
    }

    pub fn advance(&self, seconds: f64) {
        self.clock.set(self.clock.get() + seconds);
    }

    pub fn set_run_state(&self, state: RunState) {
        self.run_state.set(state);
    }

    /// Make voices report their end synchronously from inside `stop()`.
    pub fn end_voices_on_stop(&self, yes: bool) {
        self.end_on_stop.set(yes);
    }

    pub fn voice(&self, id: NodeId) -> Rc<ScriptedVoice> {
        self.voices
            .borrow()
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .expect("unknown voice")
    }

    /// Voices routed into `gain`, oldest first.
    pub fn voices_on(&self, gain: NodeId) -> Vec<Rc<ScriptedVoice>> {
        let routed: Vec<NodeId> = self
            .connections
            .borrow()
            .iter()
            .filter(|(_, to)| *to == gain)
            .map(|(from, _)| *from)
            .collect();
        routed.into_iter().map(|id| self.voice(id)).collect()
    }

    pub fn total_starts(&self) -> usize {
        self.voices.borrow().iter().map(|v| v.starts.borrow().len()).sum()
    }

    fn alloc(&self) -> NodeId {
        let id = NodeId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        id
    }
}

impl AudioEngine for ScriptedEngine {
    fn create_voice(&self, looping: bool) -> Rc<dyn Voice> {
        let voice = Rc::new(ScriptedVoice {
            id: self.alloc(),
            looping,
            buffer: RefCell::new(None),
            starts: RefCell::new(Vec::new()),
            stops: Cell::new(0),
            end_on_stop: self.end_on_stop.get(),
            on_ended: RefCell::new(None),
        });
        self.voices.borrow_mut().push(voice.clone());
        voice
    }

    fn create_gain(&self) -> Rc<dyn GainControl> {
        let gain = Rc::new(ScriptedGain {
            id: self.alloc(),
            ramps: RefCell::new(Vec::new()),
        });
        self.gains.borrow_mut().push(gain.clone());
        gain
    }

    fn connect(&self, from: NodeId, to: NodeId) {
        self.connections.borrow_mut().push((from, to));
    }

    fn output(&self) -> NodeId {
        Self::OUTPUT
    }

    fn clock_now(&self) -> f64 {
        self.clock.get()
    }

    fn run_state(&self) -> RunState {
        self.run_state.get()
    }
}

type Reply = oneshot::Sender<Result<DecodedBuffer, LoadError>>;

#[derive(Default)]
pub(crate) struct ScriptedLoader {
    pub fetches: RefCell<Vec<ResourceRef>>,
    pending: RefCell<Vec<(ResourceRef, Reply)>>,
    immediate: Cell<bool>,
}

impl ScriptedLoader {
    /// Resolve every fetch immediately with [`tone`].
    pub fn resolve_immediately(&self, yes: bool) {
        self.immediate.set(yes);
    }

    pub fn fetch_count(&self, resource: &str) -> usize {
        self.fetches
            .borrow()
            .iter()
            .filter(|r| r.as_str() == resource)
            .count()
    }

    pub fn resolve(&self, resource: &str) {
        self.reply(resource, Ok(tone()));
    }

    pub fn fail(&self, resource: &str) {
        let error = LoadError::Decode {
            resource: ResourceRef::from(resource),
            reason: "not audio".to_string(),
        };
        self.reply(resource, Err(error));
    }

    fn reply(&self, resource: &str, result: Result<DecodedBuffer, LoadError>) {
        let reply = {
            let mut pending = self.pending.borrow_mut();
            let pos = pending
                .iter()
                .position(|(r, _)| r.as_str() == resource)
                .expect("no pending fetch for resource");
            pending.remove(pos).1
        };
        let _ = reply.send(result);
    }
}

impl ResourceLoader for ScriptedLoader {
    fn fetch_and_decode(
        &self,
        resource: &ResourceRef,
    ) -> LocalBoxFuture<'static, Result<DecodedBuffer, LoadError>> {
        self.fetches.borrow_mut().push(resource.clone());
        if self.immediate.get() {
            return future::ready(Ok(tone())).boxed_local();
        }
        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().push((resource.clone(), tx));
        let resource = resource.clone();
        async move {
            rx.await.unwrap_or_else(|_| {
                Err(LoadError::Fetch {
                    resource,
                    reason: "loader went away".to_string(),
                })
            })
        }
        .boxed_local()
    }
}

pub(crate) struct Harness {
    pub pool: LocalPool,
    pub engine: Rc<ScriptedEngine>,
    pub loader: Rc<ScriptedLoader>,
    pub ctx: PlaybackContext,
}

impl Harness {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let engine = ScriptedEngine::new();
        let loader = Rc::new(ScriptedLoader::default());
        let ctx = PlaybackContext::new(engine.clone(), loader.clone(), Rc::new(pool.spawner()));
        Self {
            pool,
            engine,
            loader,
            ctx,
        }
    }

    pub fn track(&self, resource: &str) -> Rc<Track> {
        Track::new(resource, TrackOptions::default(), &self.ctx)
    }

    pub fn run(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Load `track` to completion.
    pub fn load(&mut self, track: &Track) {
        drop(track.load());
        self.run();
        self.loader.resolve(track.resource().as_str());
        self.run();
    }

    /// The voice currently bound to `track` (the most recently acquired one).
    pub fn voice_of(&self, track: &Track) -> Rc<ScriptedVoice> {
        self.engine
            .voices_on(track.gain_id())
            .pop()
            .expect("track has no voice")
    }

    pub fn gain_of(&self, track: &Track) -> Rc<ScriptedGain> {
        self.engine
            .gains
            .borrow()
            .iter()
            .find(|g| g.id == track.gain_id())
            .cloned()
            .expect("track has no gain")
    }
}
