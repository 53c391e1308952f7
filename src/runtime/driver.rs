use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use futures::executor::LocalPool;
use tracing::{info, warn};

use playhead::engine::RodioEngine;
use playhead::events::{SubscribeOptions, handler};
use playhead::track::LoadState;
use playhead::{ListEvent, ListTopic, NoOp, TrackList, Transition};

/// Run loads and pump the output until the list has played through.
pub fn drive(engine: &RodioEngine, pool: &mut LocalPool, list: &TrackList, tick: Duration) {
    let exhausted = Rc::new(Cell::new(false));
    let flag = exhausted.clone();
    list.events().subscribe(
        ListTopic::Exhausted,
        handler(move |_: &ListEvent| {
            flag.set(true);
            Ok(())
        }),
        SubscribeOptions::once(),
    );

    while !exhausted.get() {
        pool.run_until_stalled();
        engine.pump();

        // A track that cannot be loaded is skipped.
        let failed = list
            .current_track()
            .is_some_and(|track| track.load_state() == LoadState::Failed);
        if failed {
            match list.next() {
                Transition::Ignored(NoOp::AtEnd) => {
                    warn!("last track failed to load, nothing left to play");
                    break;
                }
                Transition::Ignored(reason) => {
                    warn!(?reason, "could not skip a failed track");
                    break;
                }
                _ => {}
            }
        }

        thread::sleep(tick);
    }
    info!("playback finished");
}
