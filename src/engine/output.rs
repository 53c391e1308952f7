//! [`AudioEngine`] over `rodio`.
//!
//! rodio mixes on its own thread, but the routing graph here lives on the
//! caller's thread. [`RodioEngine::pump`] is the engine's tick: it starts
//! voices whose scheduled time has come, moves gains along their ramps and
//! reports voices whose sink has drained. End callbacks therefore always run
//! from `pump`, never from rodio's thread.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source};
use tracing::{debug, warn};

use super::{AudioEngine, DecodedBuffer, GainControl, NodeId, RunState, Voice};
use crate::error::EngineError;

const OUTPUT: NodeId = NodeId(0);

struct Graph {
    stream: OutputStream,
    epoch: Instant,
    run_state: Cell<RunState>,
    next_id: Cell<u64>,
    voices: RefCell<Vec<Weak<RodioVoice>>>,
    gains: RefCell<HashMap<NodeId, Weak<RodioGain>>>,
}

impl Graph {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn alloc(&self) -> NodeId {
        let id = NodeId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        id
    }

    fn live_voices(&self) -> Vec<Rc<RodioVoice>> {
        let mut voices = self.voices.borrow_mut();
        voices.retain(|v| v.strong_count() > 0);
        voices.iter().filter_map(Weak::upgrade).collect()
    }

    fn live_gains(&self) -> Vec<Rc<RodioGain>> {
        let mut gains = self.gains.borrow_mut();
        gains.retain(|_, g| g.strong_count() > 0);
        gains.values().filter_map(Weak::upgrade).collect()
    }
}

pub struct RodioEngine {
    graph: Rc<Graph>,
}

impl RodioEngine {
    /// Open the default output device.
    pub fn open() -> Result<Self, EngineError> {
        let mut stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| EngineError::Output(e.to_string()))?;
        // rodio logs to stderr when the stream is dropped.
        stream.log_on_drop(false);

        Ok(Self {
            graph: Rc::new(Graph {
                stream,
                epoch: Instant::now(),
                run_state: Cell::new(RunState::Running),
                next_id: Cell::new(OUTPUT.0 + 1),
                voices: RefCell::new(Vec::new()),
                gains: RefCell::new(HashMap::new()),
            }),
        })
    }

    /// Advance the graph to the current clock.
    pub fn pump(&self) {
        if self.graph.run_state.get() != RunState::Running {
            return;
        }
        let now = self.graph.now();
        for gain in self.graph.live_gains() {
            gain.advance(now);
        }

        let mut ended = Vec::new();
        for voice in self.graph.live_voices() {
            if voice.tick(now) {
                ended.push(voice);
            }
        }
        for voice in ended {
            voice.report_end();
        }
    }

    pub fn suspend(&self) {
        if self.graph.run_state.replace(RunState::Suspended) == RunState::Running {
            self.for_each_sink(Sink::pause);
        }
    }

    pub fn resume(&self) {
        if self.graph.run_state.get() == RunState::Suspended {
            self.graph.run_state.set(RunState::Running);
            self.for_each_sink(Sink::play);
        }
    }

    pub fn close(&self) {
        self.graph.run_state.set(RunState::Closed);
        self.for_each_sink(Sink::stop);
    }

    fn for_each_sink(&self, f: impl Fn(&Sink)) {
        for voice in self.graph.live_voices() {
            if let Some(sink) = voice.sink.borrow().as_ref() {
                f(sink);
            }
        }
    }

    fn find_voice(&self, id: NodeId) -> Option<Rc<RodioVoice>> {
        self.graph.live_voices().into_iter().find(|v| v.id == id)
    }

    fn find_gain(&self, id: NodeId) -> Option<Rc<RodioGain>> {
        self.graph.gains.borrow().get(&id).and_then(Weak::upgrade)
    }
}

impl AudioEngine for RodioEngine {
    fn create_voice(&self, looping: bool) -> Rc<dyn Voice> {
        let voice = Rc::new(RodioVoice {
            id: self.graph.alloc(),
            looping,
            graph: Rc::downgrade(&self.graph),
            buffer: RefCell::new(None),
            route: RefCell::new(Route::Unrouted),
            sink: RefCell::new(None),
            phase: Cell::new(Phase::Idle),
            on_ended: RefCell::new(None),
        });
        self.graph.voices.borrow_mut().push(Rc::downgrade(&voice));
        voice
    }

    fn create_gain(&self) -> Rc<dyn GainControl> {
        let now = self.graph.now();
        let gain = Rc::new(RodioGain {
            id: self.graph.alloc(),
            value: Cell::new(1.0),
            target: Cell::new(1.0),
            ramp_from: Cell::new(now),
            time_constant: Cell::new(0.0),
            last_tick: Cell::new(now),
            routed: Cell::new(false),
        });
        self.graph
            .gains
            .borrow_mut()
            .insert(gain.id, Rc::downgrade(&gain));
        gain
    }

    fn connect(&self, from: NodeId, to: NodeId) {
        if let Some(voice) = self.find_voice(from) {
            let route = if to == OUTPUT {
                Route::Output
            } else if let Some(gain) = self.find_gain(to) {
                Route::Gain(Rc::downgrade(&gain))
            } else {
                warn!(from = from.0, to = to.0, "voice connected to an unknown node");
                return;
            };
            *voice.route.borrow_mut() = route;
        } else if let Some(gain) = self.find_gain(from) {
            if to == OUTPUT {
                gain.routed.set(true);
            } else {
                warn!(from = from.0, to = to.0, "gain chaining is not supported");
            }
        } else {
            warn!(from = from.0, "connect from an unknown node");
        }
    }

    fn output(&self) -> NodeId {
        OUTPUT
    }

    fn clock_now(&self) -> f64 {
        self.graph.now()
    }

    fn run_state(&self) -> RunState {
        self.graph.run_state.get()
    }
}

struct RodioGain {
    id: NodeId,
    value: Cell<f32>,
    target: Cell<f32>,
    ramp_from: Cell<f64>,
    time_constant: Cell<f64>,
    last_tick: Cell<f64>,
    routed: Cell<bool>,
}

impl RodioGain {
    // Exponential approach to the target, as a set-target-at-time curve does.
    fn advance(&self, now: f64) {
        if now < self.ramp_from.get() {
            return;
        }
        let since = self.last_tick.get().max(self.ramp_from.get());
        let dt = (now - since).max(0.0);
        let tc = self.time_constant.get();
        let value = self.value.get();
        let target = self.target.get();
        let next = if tc <= 0.0 {
            target
        } else {
            value + (target - value) * (1.0 - (-dt / tc).exp()) as f32
        };
        self.value.set(next);
        self.last_tick.set(now);
    }

    fn effective(&self) -> f32 {
        if self.routed.get() { self.value.get() } else { 0.0 }
    }
}

impl GainControl for RodioGain {
    fn id(&self) -> NodeId {
        self.id
    }

    fn ramp_to(&self, value: f32, at: f64, time_constant: f64) {
        self.target.set(value);
        self.ramp_from.set(at);
        self.time_constant.set(time_constant.max(0.0));
        self.last_tick.set(at);
        if time_constant <= 0.0 {
            self.value.set(value);
        }
    }
}

enum Route {
    Unrouted,
    Gain(Weak<RodioGain>),
    Output,
}

#[derive(Debug, Copy, Clone, PartialEq)]
enum Phase {
    Idle,
    Scheduled(f64),
    Playing,
    // Stopped or drained; the end is reported on the next pump.
    Ending,
    Done,
}

struct RodioVoice {
    id: NodeId,
    looping: bool,
    graph: Weak<Graph>,
    buffer: RefCell<Option<DecodedBuffer>>,
    route: RefCell<Route>,
    sink: RefCell<Option<Sink>>,
    phase: Cell<Phase>,
    on_ended: RefCell<Option<Box<dyn FnMut()>>>,
}

impl RodioVoice {
    fn volume(&self) -> f32 {
        match &*self.route.borrow() {
            Route::Unrouted => 0.0,
            Route::Output => 1.0,
            Route::Gain(gain) => gain.upgrade().map_or(0.0, |g| g.effective()),
        }
    }

    fn begin(&self) {
        let Some(graph) = self.graph.upgrade() else {
            self.phase.set(Phase::Ending);
            return;
        };
        let Some(buffer) = self.buffer.borrow().clone() else {
            warn!(voice = self.id.0, "voice started without a buffer");
            self.phase.set(Phase::Ending);
            return;
        };
        let (Ok(channels), Ok(sample_rate)) = (
            rodio::ChannelCount::try_from(buffer.channels()),
            rodio::SampleRate::try_from(buffer.sample_rate()),
        ) else {
            warn!(voice = self.id.0, "buffer format not playable");
            self.phase.set(Phase::Ending);
            return;
        };

        let source = SamplesBuffer::new(channels, sample_rate, buffer.samples().to_vec());
        let sink = Sink::connect_new(graph.stream.mixer());
        if self.looping {
            sink.append(source.repeat_infinite());
        } else {
            sink.append(source);
        }
        sink.set_volume(self.volume());
        if graph.run_state.get() != RunState::Running {
            sink.pause();
        }
        *self.sink.borrow_mut() = Some(sink);
        self.phase.set(Phase::Playing);
        debug!(voice = self.id.0, looping = self.looping, "voice playing");
    }

    /// Returns true when the voice's end should be reported now.
    fn tick(&self, now: f64) -> bool {
        match self.phase.get() {
            Phase::Scheduled(at) if now >= at => {
                self.begin();
                false
            }
            Phase::Playing => {
                let drained = match self.sink.borrow().as_ref() {
                    Some(sink) => {
                        sink.set_volume(self.volume());
                        !self.looping && sink.empty()
                    }
                    None => true,
                };
                if drained {
                    self.phase.set(Phase::Ending);
                }
                false
            }
            Phase::Ending => true,
            _ => false,
        }
    }

    fn report_end(&self) {
        self.phase.set(Phase::Done);
        self.sink.borrow_mut().take();
        let callback = self.on_ended.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback();
        }
    }
}

impl Voice for RodioVoice {
    fn id(&self) -> NodeId {
        self.id
    }

    fn set_buffer(&self, buffer: DecodedBuffer) {
        *self.buffer.borrow_mut() = Some(buffer);
    }

    fn start(&self, at: f64) {
        if self.phase.get() != Phase::Idle {
            warn!(voice = self.id.0, "voice already used, start ignored");
            return;
        }
        let now = self.graph.upgrade().map_or(at, |g| g.now());
        if at <= now {
            self.begin();
        } else {
            self.phase.set(Phase::Scheduled(at));
        }
    }

    fn stop(&self) {
        match self.phase.get() {
            Phase::Scheduled(_) | Phase::Playing => {
                if let Some(sink) = self.sink.borrow().as_ref() {
                    sink.stop();
                }
                self.phase.set(Phase::Ending);
            }
            Phase::Idle => debug!(voice = self.id.0, "stop on a voice that never started"),
            Phase::Ending | Phase::Done => {}
        }
    }

    fn on_ended(&self, callback: Box<dyn FnMut()>) {
        *self.on_ended.borrow_mut() = Some(callback);
    }
}
