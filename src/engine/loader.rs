//! [`ResourceLoader`] for local files.
//!
//! Reading and decoding happen on a short-lived worker thread; the result
//! comes back through a oneshot channel, so awaiting a load never blocks the
//! playback thread.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use rodio::{Decoder, Source};
use tracing::debug;

use super::{DecodedBuffer, ResourceLoader, ResourceRef};
use crate::error::LoadError;

#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceLoader for FileLoader {
    fn fetch_and_decode(
        &self,
        resource: &ResourceRef,
    ) -> LocalBoxFuture<'static, Result<DecodedBuffer, LoadError>> {
        let resource = resource.clone();
        let (tx, rx) = oneshot::channel();
        let job = resource.clone();
        let spawned = thread::Builder::new()
            .name("playhead-decode".to_string())
            .spawn(move || {
                let _ = tx.send(read_resource(&job));
            });

        async move {
            if let Err(e) = spawned {
                return Err(LoadError::Fetch {
                    resource,
                    reason: e.to_string(),
                });
            }
            rx.await.unwrap_or_else(|_| {
                Err(LoadError::Fetch {
                    resource,
                    reason: "decode worker exited without a result".to_string(),
                })
            })
        }
        .boxed_local()
    }
}

/// Map a resource ref onto a local path; `None` for non-file schemes.
pub(crate) fn local_path(resource: &ResourceRef) -> Option<PathBuf> {
    let raw = resource.as_str();
    if let Some(path) = raw.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if raw.contains("://") {
        return None;
    }
    Some(PathBuf::from(raw))
}

pub(crate) fn read_resource(resource: &ResourceRef) -> Result<DecodedBuffer, LoadError> {
    let path = local_path(resource).ok_or_else(|| LoadError::Fetch {
        resource: resource.clone(),
        reason: "unsupported scheme".to_string(),
    })?;
    decode_file(resource, &path)
}

fn decode_file(resource: &ResourceRef, path: &Path) -> Result<DecodedBuffer, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::Fetch {
        resource: resource.clone(),
        reason: e.to_string(),
    })?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| LoadError::Decode {
        resource: resource.clone(),
        reason: e.to_string(),
    })?;

    let channels = u16::from(decoder.channels());
    let sample_rate = u32::from(decoder.sample_rate());
    let samples: Vec<f32> = decoder.collect();
    if samples.is_empty() {
        return Err(LoadError::Decode {
            resource: resource.clone(),
            reason: "no audio samples".to_string(),
        });
    }

    let buffer = DecodedBuffer::new(channels, sample_rate, samples);
    debug!(
        %resource,
        channels,
        sample_rate,
        seconds = buffer.duration().as_secs_f64(),
        "decoded resource"
    );
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use futures::executor::block_on;
    use tempfile::tempdir;

    use super::*;

    // 16-bit mono PCM WAV with `frames` samples of a small square wave.
    fn wav_bytes(sample_rate: u32, frames: u32) -> Vec<u8> {
        let data_len = frames * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..frames {
            let s: i16 = if i % 20 < 10 { 8_000 } else { -8_000 };
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn local_path_handles_plain_paths_and_file_urls() {
        assert_eq!(
            local_path(&ResourceRef::from("/music/a.ogg")),
            Some(PathBuf::from("/music/a.ogg"))
        );
        assert_eq!(
            local_path(&ResourceRef::from("file:///music/a.ogg")),
            Some(PathBuf::from("/music/a.ogg"))
        );
        assert_eq!(local_path(&ResourceRef::from("https://host/a.ogg")), None);
    }

    #[test]
    fn missing_file_is_a_fetch_error() {
        let dir = tempdir().unwrap();
        let missing = ResourceRef::from(dir.path().join("nope.wav").as_path());

        let outcome = block_on(FileLoader::new().fetch_and_decode(&missing));

        assert!(matches!(outcome, Err(LoadError::Fetch { .. })));
    }

    #[test]
    fn remote_urls_are_rejected_as_fetch_errors() {
        let remote = ResourceRef::from("https://example.invalid/a.ogg");
        assert!(matches!(
            read_resource(&remote),
            Err(LoadError::Fetch { .. })
        ));
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        fs::write(&path, b"definitely not audio").unwrap();

        let outcome = block_on(FileLoader::new().fetch_and_decode(&ResourceRef::from(path.as_path())));

        assert!(matches!(outcome, Err(LoadError::Decode { .. })));
    }

    #[test]
    fn wav_file_decodes_to_pcm() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        fs::write(&path, wav_bytes(8_000, 400)).unwrap();

        let buffer = block_on(FileLoader::new().fetch_and_decode(&ResourceRef::from(path.as_path())))
            .expect("wav decodes");

        assert_eq!(buffer.channels(), 1);
        assert_eq!(buffer.sample_rate(), 8_000);
        assert_eq!(buffer.frames(), 400);
    }
}
