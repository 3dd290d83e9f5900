//! End-to-end tests through the public session API

use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use soundpak::codec::pcm16_to_bytes;
use soundpak::formats::common::write_file;
use soundpak::formats::gen4::alias::{Strides, interleave};
use soundpak::formats::gen4::streams::{StrEntry, build_streams};
use soundpak::formats::whd::{Placement, WhdRecord, build_whd};
use soundpak::prelude::*;

fn config(dir: &TempDir) -> ToolConfig {
    ToolConfig::default().with_cache_dir(dir.path().join("cache"))
}

/// Independent WAV fixture
fn hound_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

fn whd_record(path: &str, placement: Placement, offset: u32, size: u32) -> (String, WhdRecord) {
    (
        path.to_string(),
        WhdRecord {
            path_offset: 0,
            format: AudioFormat::Pcm16,
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            block_align: 2,
            samples_per_block: 1,
            data_size: size,
            data_size_uncompressed: size,
            placement,
            data_offset: offset,
            unknown: 0,
            path: String::new(),
        },
    )
}

/// Two shared streams with padding between them plus one scene stream
fn write_gen23(root: &Path) {
    let mut streams = pcm16_to_bytes(&[100, 200, 300, 400]);
    streams.extend_from_slice(&[0xEE; 4]);
    streams.extend_from_slice(&pcm16_to_bytes(&[-5, -6]));

    let whd = build_whd(vec![
        whd_record("Sfx\\A.wav", Placement::Streams, 0, 8),
        whd_record("Sfx\\B.wav", Placement::Streams, 12, 4),
        whd_record("Scene\\C.wav", Placement::Scene, 0, 6),
    ]);
    write_file(&root.join("streams.wav"), &streams).unwrap();
    write_file(&root.join("level1").join("intro.whd"), &whd.to_bytes().unwrap()).unwrap();
    write_file(
        &root.join("level1").join("intro.wav"),
        &pcm16_to_bytes(&[9, 9, 9]),
    )
    .unwrap();
}

fn load(session: &mut ArchiveSession, source: &Path, generation: Generation) -> OperationOutcome {
    session
        .begin_load(source, generation, UnsavedChanges::Cancel)
        .unwrap();
    session.wait().unwrap()
}

fn changed_files(session: &ArchiveSession) -> Vec<String> {
    session
        .state()
        .unwrap()
        .archive
        .files
        .values()
        .filter(|f| !f.original)
        .map(|f| f.path.clone())
        .collect()
}

#[test]
fn test_gen1_size_mismatch_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("sfx.idx"),
        "100 Jan 01 12:00 a.wav\n50 Jan 01 12:00 b.wav\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("sfx.dat"), vec![0u8; 140]).unwrap();

    let mut session = ArchiveSession::new(config(&dir));
    session
        .begin_load(&dir.path().join("sfx.idx"), Generation::Gen1, UnsavedChanges::Cancel)
        .unwrap();
    let err = session.wait().unwrap_err();
    assert!(matches!(
        err,
        Error::BlobSizeMismatch {
            declared: 150,
            actual: 140
        }
    ));
    assert_eq!(err.kind(), ErrorKind::MalformedContainer);
    assert!(!session.is_loaded());
}

#[test]
fn test_gen23_import_save_reload_reports_one_change() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sound");
    write_gen23(&source);
    let mut session = ArchiveSession::new(config(&dir));

    let OperationOutcome::Loaded { files, .. } = load(&mut session, &source, Generation::Gen23)
    else {
        panic!("expected a load");
    };
    assert_eq!(files, 3);
    assert!(changed_files(&session).is_empty());

    let replacement = dir.path().join("B.wav");
    hound_wav(&replacement, 22050, 1, &[1000, 2000, 3000]);
    session
        .begin_import(vec![replacement], None, ImportPolicy::Transcode)
        .unwrap();
    let OperationOutcome::Imported(report) = session.wait().unwrap() else {
        panic!("expected an import report");
    };
    assert_eq!(report.success_count, 1);
    assert!(session.is_dirty());
    assert_eq!(changed_files(&session), vec!["sfx/b.wav"]);

    let patched = dir.path().join("patched");
    session.begin_save(&patched).unwrap();
    assert!(matches!(
        session.wait().unwrap(),
        OperationOutcome::Saved { .. }
    ));
    // The session continues on the saved copy with clean flags
    assert!(!session.is_dirty());
    assert_eq!(changed_files(&session), vec!["sfx/b.wav"]);

    let mut fresh = ArchiveSession::new(config(&dir));
    load(&mut fresh, &patched, Generation::Gen23);
    assert_eq!(changed_files(&fresh), vec!["sfx/b.wav"]);
    let state = fresh.state().unwrap();
    assert_eq!(
        state.file("sfx/b.wav").unwrap().payload(),
        pcm16_to_bytes(&[1000, 2000, 3000]).as_slice()
    );
    assert_eq!(
        state.file("sfx/a.wav").unwrap().payload(),
        pcm16_to_bytes(&[100, 200, 300, 400]).as_slice()
    );
}

#[test]
fn test_identical_import_stays_clean() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sound");
    write_gen23(&source);
    let mut session = ArchiveSession::new(config(&dir));
    load(&mut session, &source, Generation::Gen23);

    session.begin_regenerate_baseline().unwrap();
    assert!(matches!(
        session.wait().unwrap(),
        OperationOutcome::BaselineRegenerated { files: 3, warning: None }
    ));
    let tree = session.tree().unwrap();
    assert!(tree.is_original());

    // Same audio, resolved against a directory mirroring the archive
    let mirror = dir.path().join("mirror");
    std::fs::create_dir_all(mirror.join("sfx")).unwrap();
    let replacement = mirror.join("sfx").join("a.wav");
    hound_wav(&replacement, 22050, 1, &[100, 200, 300, 400]);

    session
        .begin_import(vec![replacement], Some(mirror), ImportPolicy::Transcode)
        .unwrap();
    let OperationOutcome::Imported(report) = session.wait().unwrap() else {
        panic!("expected an import report");
    };
    assert_eq!(report.success_count, 1);
    assert!(!session.is_dirty());
    assert!(changed_files(&session).is_empty());
}

#[test]
fn test_missing_counterpart_does_not_abort_batch() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sound");
    write_gen23(&source);
    let mut session = ArchiveSession::new(config(&dir));
    load(&mut session, &source, Generation::Gen23);

    let stray = dir.path().join("unrelated.wav");
    hound_wav(&stray, 22050, 1, &[1, 2]);
    let good = dir.path().join("c.ogg");
    // A .ogg file name stands in for the .wav entry
    hound_wav(&good, 22050, 1, &[4, 5, 6]);

    session
        .begin_import(vec![stray, good], None, ImportPolicy::Direct)
        .unwrap();
    let OperationOutcome::Imported(report) = session.wait().unwrap() else {
        panic!("expected an import report");
    };
    assert_eq!(report.success_count, 1);
    assert_eq!(report.fail_count, 1);
    assert!(report.results[0].starts_with("Failed"));
    assert_eq!(changed_files(&session), vec!["scene/c.wav"]);
}

fn entry(path: &str, rate: u32, channels: u16, size: u32, order: u16) -> StrEntry {
    StrEntry {
        id: 7,
        data_offset: 0,
        data_size: size,
        region_size: 0,
        path_offset: 0,
        format: AudioFormat::Pcm16,
        channels,
        sample_rate: rate,
        block_align: channels * 2,
        alias_order: order,
        samples_per_block: 1,
        data_size_uncompressed: size,
        path: path.to_string(),
    }
}

/// Standalone voice line with a lip page and an alias group referenced from a scene
fn write_gen4(root: &Path) -> Vec<u8> {
    let mut lip_bytes = b"LIP ".to_vec();
    lip_bytes.extend_from_slice(&12u32.to_le_bytes());
    lip_bytes.extend_from_slice(&[1, 2, 3, 4]);
    let lip = LipData {
        bytes: lip_bytes,
        segment_size: 0,
    };
    let line_region = lip
        .join(&pcm16_to_bytes(&[11, 12, 13, 14]), "vo/line.wav")
        .unwrap();
    let group_region = interleave(
        &pcm16_to_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]),
        &pcm16_to_bytes(&[-1, -2]),
        Strides { a: 8, b: 2 },
    );

    let streams = build_streams(
        vec![
            entry("vo/line.wav", 22050, 1, 8, 0),
            entry("amb/wind", 0, 0, 0, 0),
            entry("amb/wind_near.wav", 44100, 2, 16, 1),
            entry("amb/wind_far.wav", 22050, 1, 4, 2),
        ],
        &[line_region, group_region],
        &[0, 1, 1, 1],
    );
    let group_offset = u32::try_from(streams.entries[1].data_offset).unwrap();
    let bytes = streams.to_bytes().unwrap();
    write_file(&root.join("streams.str"), &bytes).unwrap();

    let whd = build_whd(vec![
        whd_record("scene/door.wav", Placement::Scene, 0, 4),
        whd_record("amb/wind", Placement::Streams, group_offset, 0),
    ]);
    write_file(&root.join("town.whd"), &whd.to_bytes().unwrap()).unwrap();
    write_file(&root.join("town.wav"), &pcm16_to_bytes(&[3, 3])).unwrap();
    bytes
}

#[test]
fn test_gen4_export_and_alias_import() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sound");
    write_gen4(&source);
    assert_eq!(detect_generation(&source), Some(Generation::Gen4));

    let mut session = ArchiveSession::new(config(&dir));
    let OperationOutcome::Loaded { files, .. } = load(&mut session, &source, Generation::Gen4)
    else {
        panic!("expected a load");
    };
    assert_eq!(files, 4);

    let exported = dir.path().join("export");
    session
        .begin_export(&exported, None, ExportPolicy::Native)
        .unwrap();
    let OperationOutcome::Exported(report) = session.wait().unwrap() else {
        panic!("expected an export report");
    };
    assert_eq!(report.success_count, 4);
    assert!(exported.join("vo").join("line.lip").is_file());
    assert!(!exported.join("amb").join("wind_far.lip").exists());

    // Stereo replacement for the mono far sub stream gets folded down
    let far: PathBuf = dir.path().join("wind_far.wav");
    hound_wav(&far, 22050, 2, &[-10, -4, -20, -16]);
    session
        .begin_import(vec![far], None, ImportPolicy::Direct)
        .unwrap();
    let OperationOutcome::Imported(report) = session.wait().unwrap() else {
        panic!("expected an import report");
    };
    assert_eq!(report.success_count, 1);

    let patched = dir.path().join("patched");
    session.begin_save(&patched).unwrap();
    session.wait().unwrap();

    let mut fresh = ArchiveSession::new(config(&dir));
    load(&mut fresh, &patched, Generation::Gen4);
    assert_eq!(changed_files(&fresh), vec!["amb/wind_far.wav"]);
    let state = fresh.state().unwrap();
    assert_eq!(
        state.file("amb/wind_far.wav").unwrap().payload(),
        pcm16_to_bytes(&[-7, -18]).as_slice()
    );
    assert_eq!(
        state.file("amb/wind_near.wav").unwrap().payload(),
        pcm16_to_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]).as_slice()
    );
    assert!(state.lip_data("vo/line.wav").is_some());
}

#[test]
fn test_unchanged_gen4_round_trip_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sound");
    let original = write_gen4(&source);

    let mut session = ArchiveSession::new(config(&dir));
    load(&mut session, &source, Generation::Gen4);
    let patched = dir.path().join("copy");
    session.begin_save(&patched).unwrap();
    let OperationOutcome::Saved { blob_hash, .. } = session.wait().unwrap() else {
        panic!("expected a save");
    };

    assert_eq!(std::fs::read(patched.join("streams.str")).unwrap(), original);
    assert_eq!(session.state().unwrap().archive.blob_hash, blob_hash);
    assert!(changed_files(&session).is_empty());
}

/// Two lip pages as stored: `LIP ` header, length, then filler that never forms a null run
fn two_page_lip() -> LipData {
    let len: u32 = 0xFF0 + 100;
    let mut bytes = b"LIP ".to_vec();
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend((8..len).map(|i| (i % 251) as u8 | 1));
    LipData {
        bytes,
        segment_size: 0x2000,
    }
}

fn rain_near() -> Vec<i16> {
    (0..2048).map(|i| (i % 300) as i16 + 1).collect()
}

fn rain_far() -> Vec<i16> {
    (0..512).map(|i| -((i % 200) as i16) - 1).collect()
}

/// An alias group whose region opens with lip data spread over 0x2000-byte segments
fn write_gen4_lip_group(root: &Path) -> Vec<u8> {
    let audio = interleave(
        &pcm16_to_bytes(&rain_near()),
        &pcm16_to_bytes(&rain_far()),
        Strides { a: 8, b: 2 },
    );
    let region = two_page_lip().join(&audio, "amb/rain").unwrap();
    assert_eq!(region.len(), 0x3400);

    let streams = build_streams(
        vec![
            entry("amb/rain", 0, 0, 0, 0),
            entry("amb/rain_near.wav", 44100, 2, 0x1000, 1),
            entry("amb/rain_far.wav", 22050, 1, 0x400, 2),
        ],
        &[region],
        &[0, 0, 0],
    );
    let group_offset = u32::try_from(streams.entries[0].data_offset).unwrap();
    let bytes = streams.to_bytes().unwrap();
    write_file(&root.join("streams.str"), &bytes).unwrap();

    let whd = build_whd(vec![
        whd_record("scene/drip.wav", Placement::Scene, 0, 4),
        whd_record("amb/rain", Placement::Streams, group_offset, 0),
    ]);
    write_file(&root.join("yard.whd"), &whd.to_bytes().unwrap()).unwrap();
    write_file(&root.join("yard.wav"), &pcm16_to_bytes(&[5, 5])).unwrap();
    bytes
}

#[test]
fn test_gen4_lip_carrying_alias_group_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sound");
    let original = write_gen4_lip_group(&source);
    let lip = two_page_lip();

    let mut session = ArchiveSession::new(config(&dir));
    let OperationOutcome::Loaded { files, .. } = load(&mut session, &source, Generation::Gen4)
    else {
        panic!("expected a load");
    };
    assert_eq!(files, 3);
    let state = session.state().unwrap();
    assert_eq!(state.lip_data("amb/rain_far.wav"), Some(&lip));
    assert_eq!(
        state.file("amb/rain_near.wav").unwrap().payload(),
        pcm16_to_bytes(&rain_near()).as_slice()
    );
    assert_eq!(
        state.file("amb/rain_far.wav").unwrap().payload(),
        pcm16_to_bytes(&rain_far()).as_slice()
    );

    let copy = dir.path().join("copy");
    session.begin_save(&copy).unwrap();
    session.wait().unwrap();
    assert_eq!(std::fs::read(copy.join("streams.str")).unwrap(), original);

    let exported = dir.path().join("export");
    session
        .begin_export(&exported, None, ExportPolicy::Native)
        .unwrap();
    let OperationOutcome::Exported(report) = session.wait().unwrap() else {
        panic!("expected an export report");
    };
    assert_eq!(report.success_count, 3);
    for name in ["rain_near.lip", "rain_far.lip"] {
        assert_eq!(
            std::fs::read(exported.join("amb").join(name)).unwrap(),
            lip.bytes
        );
    }
    assert!(!exported.join("scene").join("drip.lip").exists());

    // Same-length replacement for sub1 keeps the segment layout
    let replacement = dir.path().join("rain_near.wav");
    let louder: Vec<i16> = rain_near().iter().map(|s| s * 2).collect();
    hound_wav(&replacement, 44100, 2, &louder);
    session
        .begin_import(vec![replacement], None, ImportPolicy::Transcode)
        .unwrap();
    session.wait().unwrap();
    let patched = dir.path().join("patched");
    session.begin_save(&patched).unwrap();
    session.wait().unwrap();

    let mut fresh = ArchiveSession::new(config(&dir));
    load(&mut fresh, &patched, Generation::Gen4);
    assert_eq!(changed_files(&fresh), vec!["amb/rain_near.wav"]);
    let state = fresh.state().unwrap();
    assert_eq!(state.lip_data("amb/rain_near.wav"), Some(&lip));
    assert_eq!(
        state.file("amb/rain_near.wav").unwrap().payload(),
        pcm16_to_bytes(&louder).as_slice()
    );
    assert_eq!(
        state.file("amb/rain_far.wav").unwrap().payload(),
        pcm16_to_bytes(&rain_far()).as_slice()
    );
}
