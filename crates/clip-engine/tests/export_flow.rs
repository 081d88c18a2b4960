//! Source files on disk through batch export and packing.

use std::path::{Path, PathBuf};

use clip_engine::{ClipEngine, EngineConfig, TransformConfig, Warning};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn track_chunk(events: &[&[u8]]) -> Vec<u8> {
    let body: Vec<u8> = events.iter().flat_map(|e| e.iter().copied()).collect();
    let mut chunk = b"MTrk".to_vec();
    chunk.extend_from_slice(&(body.len() as u32).to_be_bytes());
    chunk.extend_from_slice(&body);
    chunk
}

fn smf_bytes(format: u16, ppqn: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = b"MThd".to_vec();
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&format.to_be_bytes());
    buf.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    buf.extend_from_slice(&ppqn.to_be_bytes());
    for track in tracks {
        buf.extend_from_slice(track);
    }
    buf
}

/// 96 PPQN, two bars: E minor arpeggio, one note per beat.
fn bass_line() -> Vec<u8> {
    let mut events: Vec<Vec<u8>> = Vec::new();
    for pitch in [40u8, 43, 47, 43, 40, 43, 47, 52] {
        events.push(vec![0x00, 0x90, pitch, 100]);
        events.push(vec![0x50, 0x80, pitch, 0]);
        events.push(vec![0x10, 0xB0, 64, 0]);
    }
    events.push(vec![0x00, 0xFF, 0x2F, 0x00]);
    let refs: Vec<&[u8]> = events.iter().map(|e| e.as_slice()).collect();
    smf_bytes(0, 96, &[track_chunk(&refs)])
}

/// 480 PPQN format 1, one bar of an A minor triad.
fn keys() -> Vec<u8> {
    let tempo = track_chunk(&[
        &[0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20],
        &[0x00, 0xFF, 0x2F, 0x00],
    ]);
    let notes = track_chunk(&[
        &[0x00, 0x90, 57, 90],
        &[0x00, 60, 80],
        &[0x00, 64, 70],
        &[0x8F, 0x00, 57, 0],
        &[0x00, 60, 0],
        &[0x00, 64, 0],
        &[0x00, 0xFF, 0x2F, 0x00],
    ]);
    smf_bytes(1, 480, &[tempo, notes])
}

fn write_source(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn batch_export_skips_broken_files() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let sources = vec![
        write_source(src.path(), "Emin bass.mid", &bass_line()),
        write_source(src.path(), "broken.mid", b"MThd\x00\x00"),
        write_source(src.path(), "Amin keys.mid", &keys()),
    ];

    let engine = ClipEngine::default();
    let config = TransformConfig {
        normalize_to_c: true,
        max_bars: Some(1),
        ..Default::default()
    };
    let report = engine.export_batch(&sources, &config, out.path()).unwrap();

    assert_eq!(report.written.len(), 2);
    assert_eq!(
        names_in(out.path()),
        vec![
            "Amin keys - C Minor max1bar Poly OrgRoot=A.mid".to_string(),
            "Emin bass - C Minor max1bar Mono OrgRoot=E.mid".to_string(),
        ]
    );

    let skipped: Vec<&Warning> = report
        .warnings
        .iter()
        .filter(|w| matches!(w, Warning::SkippedFile { .. }))
        .collect();
    assert_eq!(skipped.len(), 1);
    assert!(matches!(skipped[0], Warning::SkippedFile { file, .. } if file.ends_with("broken.mid")));
}

#[test]
fn exported_file_is_forced_to_default_resolution() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let source = write_source(src.path(), "Emin bass.mid", &bass_line());

    let engine = ClipEngine::default();
    let report = engine
        .export_batch(&[source], &TransformConfig::default(), out.path())
        .unwrap();

    let bytes = std::fs::read(&report.written[0]).unwrap();
    let (clip, _) = clip_midi::decode_clip(&bytes).unwrap();
    assert_eq!(clip.ppqn(), 480);
    assert_eq!(clip.length_ticks, 2 * 1920);
    let starts: Vec<u64> = clip.notes.iter().map(|n| n.start_tick).collect();
    assert_eq!(starts, vec![0, 480, 960, 1440, 1920, 2400, 2880, 3360]);
}

#[test]
fn repeated_export_does_not_overwrite() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let source = write_source(src.path(), "Amin keys.mid", &keys());

    let engine = ClipEngine::default();
    let config = TransformConfig::default();
    engine.export_batch(&[source.clone()], &config, out.path()).unwrap();
    engine.export_batch(&[source], &config, out.path()).unwrap();

    assert_eq!(
        names_in(out.path()),
        vec!["Amin keys - Poly (2).mid".to_string(), "Amin keys - Poly.mid".to_string()]
    );
}

#[test]
fn pack_to_dir_writes_named_pack() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let sources = vec![
        write_source(src.path(), "Emin bass.mid", &bass_line()),
        write_source(src.path(), "Amin keys.mid", &keys()),
    ];

    let engine = ClipEngine::new(EngineConfig {
        parallel_jobs: 2,
        ..Default::default()
    });
    let path = engine
        .pack_to_dir(&sources, &TransformConfig::default(), None, out.path())
        .unwrap();

    assert_eq!(
        path.file_name().unwrap(),
        "PACK4_Emin bass_Mono_OrgRoot=E+Amin keys_Poly_OrgRoot=A.mid"
    );

    let bytes = std::fs::read(&path).unwrap();
    let smf = midly::Smf::parse(&bytes).unwrap();
    assert_eq!(smf.tracks.len(), 3);
    assert!(matches!(
        smf.header.timing,
        midly::Timing::Metrical(ticks) if ticks.as_int() == 480
    ));
}

#[test]
fn pack_to_dir_rejects_five_sources() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let sources: Vec<PathBuf> = (0..5)
        .map(|i| write_source(src.path(), &format!("clip{i}.mid"), &keys()))
        .collect();

    let engine = ClipEngine::default();
    let result = engine.pack_to_dir(&sources, &TransformConfig::default(), None, out.path());
    assert!(matches!(result, Err(clip_engine::Error::TooManyTracks { given: 5 })));
    assert!(names_in(out.path()).is_empty());
}
