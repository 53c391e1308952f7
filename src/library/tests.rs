use std::fs;
use std::path::Path;

use tempfile::tempdir;

use super::scan::{is_audio_file, scan};
use crate::config::LibrarySettings;

fn file_names(found: &[crate::engine::ResourceRef]) -> Vec<String> {
    found
        .iter()
        .map(|r| {
            Path::new(r.as_str())
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

#[test]
fn is_audio_file_matches_configured_extensions_case_insensitive() {
    let settings = LibrarySettings::default();
    assert!(is_audio_file(Path::new("/tmp/a.mp3"), &settings));
    assert!(is_audio_file(Path::new("/tmp/a.MP3"), &settings));
    assert!(is_audio_file(Path::new("/tmp/a.flac"), &settings));
    assert!(is_audio_file(Path::new("/tmp/a.wav"), &settings));
    assert!(is_audio_file(Path::new("/tmp/a.ogg"), &settings));
    assert!(!is_audio_file(Path::new("/tmp/a.txt"), &settings));
    assert!(!is_audio_file(Path::new("/tmp/a"), &settings));
}

#[test]
fn is_audio_file_tolerates_dotted_and_padded_extensions() {
    let settings = LibrarySettings {
        extensions: vec![" .OPUS ".to_string(), "".to_string()],
        ..LibrarySettings::default()
    };
    assert!(is_audio_file(Path::new("/tmp/a.opus"), &settings));
    assert!(!is_audio_file(Path::new("/tmp/a.mp3"), &settings));
}

#[test]
fn scan_filters_non_audio_and_sorts_case_insensitive() {
    let dir = tempdir().unwrap();

    fs::write(dir.path().join("b.MP3"), b"not a real mp3").unwrap();
    fs::write(dir.path().join("A.ogg"), b"not a real ogg").unwrap();
    fs::write(dir.path().join("c.txt"), b"ignore me").unwrap();

    let found = scan(dir.path(), &LibrarySettings::default());
    assert_eq!(file_names(&found), vec!["A.ogg", "b.MP3"]);
}

#[test]
fn scan_respects_include_hidden_false() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(".hidden.mp3"), b"not real").unwrap();
    fs::write(dir.path().join("visible.mp3"), b"not real").unwrap();

    let settings = LibrarySettings {
        include_hidden: false,
        ..LibrarySettings::default()
    };
    let found = scan(dir.path(), &settings);

    assert_eq!(file_names(&found), vec!["visible.mp3"]);
}

#[test]
fn scan_respects_recursive_false() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("root.mp3"), b"not real").unwrap();
    let sub = dir.path().join("sub");
    fs::create_dir_all(&sub).unwrap();
    fs::write(sub.join("child.mp3"), b"not real").unwrap();

    let settings = LibrarySettings {
        recursive: false,
        ..LibrarySettings::default()
    };
    let found = scan(dir.path(), &settings);
    assert_eq!(file_names(&found), vec!["root.mp3"]);
}

#[test]
fn scan_respects_max_depth() {
    let dir = tempdir().unwrap();
    let d1 = dir.path().join("d1");
    let d2 = d1.join("d2");
    fs::create_dir_all(&d2).unwrap();
    fs::write(dir.path().join("root.mp3"), b"not real").unwrap();
    fs::write(d1.join("one.mp3"), b"not real").unwrap();
    fs::write(d2.join("two.mp3"), b"not real").unwrap();

    // WalkDir depth counts root as 0, so max_depth=2 reaches d1/* but not d1/d2/*.
    let settings = LibrarySettings {
        max_depth: Some(2),
        ..LibrarySettings::default()
    };
    let names = file_names(&scan(dir.path(), &settings));

    assert!(names.contains(&"root.mp3".to_string()));
    assert!(names.contains(&"one.mp3".to_string()));
    assert!(!names.contains(&"two.mp3".to_string()));
}
