//! Ordered playlist with a single playback head.
//!
//! The list subscribes to every track's `Ended` topic once, at construction,
//! and advances the head when the track it started finishes on its own, even
//! if a shuffle has since moved that track away from the head. It only drives
//! tracks through their public operations and events.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::{self, FutureExt, LocalBoxFuture};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::error::TrackListError;
use crate::events::{CancelToken, EventBus, SubscribeOptions, SubscriptionId, handler};
use crate::track::{EndReason, NoOp, Track, TrackEvent, TrackTopic, Transition};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ListTopic {
    HeadMoved,
    Shuffled,
    /// The track at the last index finished on its own.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent {
    HeadMoved { from: usize, to: usize },
    Shuffled,
    Exhausted,
}

// A start waiting for its track to load.
struct PendingStart {
    track: Weak<Track>,
    token: CancelToken,
    subscriptions: [SubscriptionId; 2],
}

pub struct TrackList {
    tracks: RefCell<Vec<Rc<Track>>>,
    head: Cell<usize>,
    pending_start: RefCell<Option<PendingStart>>,
    // The track this list last started; it may sit off the head after a shuffle.
    playing: RefCell<Option<Weak<Track>>>,
    wiring: Vec<(Weak<Track>, SubscriptionId)>,
    events: EventBus<ListTopic, ListEvent>,
    me: Weak<TrackList>,
}

impl TrackList {
    pub fn new(tracks: Vec<Rc<Track>>) -> Rc<Self> {
        Rc::new_cyclic(|me: &Weak<TrackList>| {
            let wiring = tracks
                .iter()
                .map(|track| {
                    let list = me.clone();
                    let ended = Rc::downgrade(track);
                    let id = track.events().subscribe(
                        TrackTopic::Ended,
                        handler(move |event: &TrackEvent| {
                            if let (Some(list), Some(track)) = (list.upgrade(), ended.upgrade()) {
                                list.on_track_ended(&track, event);
                            }
                            Ok(())
                        }),
                        SubscribeOptions::default(),
                    );
                    (Rc::downgrade(track), id)
                })
                .collect();

            Self {
                tracks: RefCell::new(tracks),
                head: Cell::new(0),
                pending_start: RefCell::new(None),
                playing: RefCell::new(None),
                wiring,
                events: EventBus::new(),
                me: me.clone(),
            }
        })
    }

    pub fn events(&self) -> &EventBus<ListTopic, ListEvent> {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.tracks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.borrow().is_empty()
    }

    /// Playback head, or `None` for an empty list.
    pub fn head(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.head.get())
    }

    /// Tracks in their current order.
    pub fn tracks(&self) -> Vec<Rc<Track>> {
        self.tracks.borrow().clone()
    }

    pub fn current_track(&self) -> Option<Rc<Track>> {
        self.tracks.borrow().get(self.head.get()).cloned()
    }

    /// Resolve with the track at `index` once it is loaded.
    ///
    /// Starts the load if needed; an already-loaded track resolves at once
    /// without touching the loader. Out-of-range indices fail immediately.
    pub fn load(&self, index: usize) -> LocalBoxFuture<'static, Result<Rc<Track>, TrackListError>> {
        let track = self.tracks.borrow().get(index).cloned();
        match track {
            Some(track) => {
                let pending = track.load();
                async move { pending.await.map(|()| track).map_err(TrackListError::from) }
                    .boxed_local()
            }
            None => {
                let len = self.len();
                warn!(index, len, "load requested for a track outside the list");
                future::ready(Err(TrackListError::InvalidIndex { index, len })).boxed_local()
            }
        }
    }

    /// Play the current track, loading it first when necessary.
    pub fn start(&self) -> Transition {
        let Some(track) = self.current_track() else {
            debug!("start ignored: list is empty");
            return Transition::Ignored(NoOp::Empty);
        };
        self.cancel_pending_start();
        let stray = self
            .playing_track()
            .filter(|previous| !Rc::ptr_eq(previous, &track));
        if let Some(previous) = stray {
            debug!(resource = %previous.resource(), "stopping the track left playing off the head");
            if previous.stop() != Transition::Ignored(NoOp::EngineNotRunning) {
                self.playing.borrow_mut().take();
            }
        }

        if track.is_loaded() {
            let transition = track.start();
            if !matches!(transition, Transition::Ignored(NoOp::NotLoaded)) {
                self.set_playing(&track);
            }
            return transition;
        }

        let token = CancelToken::new();
        let list = self.me.clone();
        let target = Rc::downgrade(&track);
        let on_loaded = token.clone();
        let loaded = track.events().subscribe(
            TrackTopic::Loaded,
            handler(move |_: &TrackEvent| {
                on_loaded.cancel();
                if let (Some(list), Some(track)) = (list.upgrade(), target.upgrade()) {
                    list.start_after_load(&track);
                }
                Ok(())
            }),
            SubscribeOptions::once().with_cancel(token.clone()),
        );
        let on_failed = token.clone();
        let failed = track.events().subscribe(
            TrackTopic::LoadFailed,
            handler(move |event: &TrackEvent| {
                on_failed.cancel();
                if let TrackEvent::LoadFailed(error) = event {
                    warn!(%error, "pending start abandoned");
                }
                Ok(())
            }),
            SubscribeOptions::once().with_cancel(token.clone()),
        );
        *self.pending_start.borrow_mut() = Some(PendingStart {
            track: Rc::downgrade(&track),
            token,
            subscriptions: [loaded, failed],
        });

        debug!(resource = %track.resource(), "start deferred until the track is loaded");
        drop(track.load());
        Transition::Deferred
    }

    /// Stop the track this list started, or the current track when the list
    /// has not started one.
    pub fn stop(&self) -> Transition {
        if self.cancel_pending_start() {
            debug!("pending start cancelled");
        }
        let target = self.playing_track().or_else(|| self.current_track());
        let Some(track) = target else {
            return Transition::Ignored(NoOp::Empty);
        };
        let transition = track.stop();
        if transition != Transition::Ignored(NoOp::EngineNotRunning) {
            self.playing.borrow_mut().take();
        }
        transition
    }

    /// Stop the playing track, move the head forward and start there.
    ///
    /// Refused with `EngineNotRunning` when the playing track cannot be halted.
    pub fn next(&self) -> Transition {
        let len = self.len();
        let from = self.head.get();
        if len == 0 {
            return Transition::Ignored(NoOp::Empty);
        }
        if from + 1 >= len {
            debug!(head = from, "next ignored: already at the last track");
            return Transition::Ignored(NoOp::AtEnd);
        }
        self.move_head(from, from + 1)
    }

    /// Stop the playing track, move the head back and start there.
    pub fn previous(&self) -> Transition {
        let from = self.head.get();
        if self.is_empty() {
            return Transition::Ignored(NoOp::Empty);
        }
        if from == 0 {
            debug!("previous ignored: already at the first track");
            return Transition::Ignored(NoOp::AtStart);
        }
        self.move_head(from, from - 1)
    }

    /// Randomly reorder the tracks in place. The head index is kept, so the
    /// track under it may change.
    pub fn shuffle(&self) {
        self.shuffle_with(&mut rand::rng());
    }

    /// Fisher-Yates shuffle (last index down to 1) driven by `rng`.
    pub fn shuffle_with<R: Rng + ?Sized>(&self, rng: &mut R) {
        self.tracks.borrow_mut().shuffle(rng);
        info!(tracks = self.len(), "track order shuffled");
        self.events.publish(ListTopic::Shuffled, &ListEvent::Shuffled);
    }

    fn move_head(&self, from: usize, to: usize) -> Transition {
        // A track that cannot be halted would keep sounding next to the new one.
        if self.stop() == Transition::Ignored(NoOp::EngineNotRunning) {
            warn!(head = from, "head not moved: engine is not running");
            return Transition::Ignored(NoOp::EngineNotRunning);
        }
        self.head.set(to);
        if let Some(track) = self.current_track() {
            info!(head = to, resource = %track.resource(), "playback head moved");
        }
        self.events
            .publish(ListTopic::HeadMoved, &ListEvent::HeadMoved { from, to });
        self.start();
        Transition::Applied
    }

    fn start_after_load(&self, track: &Rc<Track>) {
        self.cancel_pending_start();
        match self.current_track() {
            Some(current) if Rc::ptr_eq(&current, track) => {
                if track.start().is_applied() {
                    self.set_playing(track);
                }
            }
            _ => debug!(resource = %track.resource(), "loaded track is no longer current"),
        }
    }

    fn cancel_pending_start(&self) -> bool {
        let pending = self.pending_start.borrow_mut().take();
        let Some(pending) = pending else {
            return false;
        };
        pending.token.cancel();
        if let Some(track) = pending.track.upgrade() {
            for id in pending.subscriptions {
                track.events().unsubscribe_id(id);
            }
        }
        true
    }

    fn playing_track(&self) -> Option<Rc<Track>> {
        self.playing.borrow().as_ref().and_then(Weak::upgrade)
    }

    fn set_playing(&self, track: &Rc<Track>) {
        *self.playing.borrow_mut() = Some(Rc::downgrade(track));
    }

    fn on_track_ended(&self, track: &Rc<Track>, event: &TrackEvent) {
        if *event != TrackEvent::Ended(EndReason::Finished) {
            return;
        }
        let started_here = self
            .playing_track()
            .is_some_and(|playing| Rc::ptr_eq(&playing, track));
        if !started_here {
            debug!(resource = %track.resource(), "finished track was not started by the list");
            return;
        }
        self.playing.borrow_mut().take();
        if self.head.get() + 1 >= self.len() {
            info!("reached the end of the list");
            self.events.publish(ListTopic::Exhausted, &ListEvent::Exhausted);
        }
        self.next();
    }
}

impl Drop for TrackList {
    fn drop(&mut self) {
        self.cancel_pending_start();
        for (track, id) in &self.wiring {
            if let Some(track) = track.upgrade() {
                track.events().unsubscribe_id(*id);
            }
        }
    }
}

impl fmt::Debug for TrackList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackList")
            .field("tracks", &self.tracks.borrow())
            .field("head", &self.head())
            .finish()
    }
}
