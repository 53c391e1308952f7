use std::env;
use std::path::PathBuf;
use std::rc::Rc;

use futures::executor::LocalPool;
use tracing::{info, warn};

use playhead::engine::{FileLoader, PlaybackContext, RodioEngine};
use playhead::library::scan;
use playhead::{Track, TrackList};

mod driver;
mod settings;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = settings::load_settings();

    let dir = env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let resources = scan(&dir, &settings.library);
    if resources.is_empty() {
        warn!(dir = %dir.display(), "no audio files found");
        return Ok(());
    }
    info!(dir = %dir.display(), tracks = resources.len(), "library loaded");

    let engine = Rc::new(RodioEngine::open()?);
    let mut pool = LocalPool::new();
    let ctx = PlaybackContext::new(
        engine.clone(),
        Rc::new(FileLoader::new()),
        Rc::new(pool.spawner()),
    );

    let options = settings.playback.track_options();
    let tracks = resources
        .into_iter()
        .map(|resource| Track::new(resource, options, &ctx))
        .collect();
    let list = TrackList::new(tracks);
    if settings.playback.shuffle {
        list.shuffle();
    }

    list.start();
    driver::drive(&engine, &mut pool, &list, settings.engine.tick());
    engine.close();
    Ok(())
}
