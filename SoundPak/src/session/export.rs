//! Writing archive entries out as standalone files

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{decode_to_pcm16, pcm16_to_bytes, resample_sample_rate, wrap_container};
use crate::error::Result;
use crate::formats::common::{join_archive_path, write_file};
use crate::formats::{Generation, LipData};
use crate::model::{AudioFile, AudioFormat, AudioRecord};

/// Sample rates every common player handles
pub const STANDARD_RATES: [u32; 4] = [11025, 22050, 44100, 48000];

/// What an exported file looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPolicy {
    /// The stored stream in its own container, untouched
    #[default]
    Native,
    /// PCM16 WAV at a standard rate; Vorbis at a standard rate is kept
    Playable,
}

/// Files produced for one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub path: PathBuf,
    /// `.lip` side file, when the entry carries lip data
    pub lip: Option<PathBuf>,
}

/// Closest entry of [`STANDARD_RATES`]; ties go to the lower rate
#[must_use]
pub fn nearest_standard_rate(rate: u32) -> u32 {
    STANDARD_RATES
        .into_iter()
        .min_by_key(|standard| standard.abs_diff(rate))
        .unwrap_or(rate)
}

/// Produce the file name (relative, archive separators) and bytes for `file`
pub fn render_export(
    file: &AudioFile,
    generation: Generation,
    policy: ExportPolicy,
) -> Result<(String, Vec<u8>)> {
    let record = &file.record;
    match policy {
        ExportPolicy::Native => {
            let bytes = if generation == Generation::Gen1 {
                file.data.clone()
            } else {
                wrap_container(record, file.payload())?
            };
            Ok((file.display_path.clone(), bytes))
        }
        ExportPolicy::Playable => {
            if record.format == AudioFormat::Vorbis
                && STANDARD_RATES.contains(&record.sample_rate)
            {
                return Ok((
                    with_format_extension(&file.display_path, AudioFormat::Vorbis),
                    file.payload().to_vec(),
                ));
            }

            let mut decoded = *record;
            let mut samples = decode_to_pcm16(record, file.payload())?;
            let target = nearest_standard_rate(record.sample_rate);
            resample_sample_rate(&mut decoded, &mut samples, target)?;

            let frames = samples.len() / usize::from(decoded.channels);
            let wav = AudioRecord::pcm16(target, decoded.channels, frames);
            debug!(
                "Playable export of {}: {} Hz -> {} Hz PCM16",
                file.path, record.sample_rate, target
            );
            Ok((
                with_format_extension(&file.display_path, AudioFormat::Pcm16),
                wrap_container(&wav, &pcm16_to_bytes(&samples))?,
            ))
        }
    }
}

/// Write `file` below `dest`, plus its `.lip` side file when `lip` is given
pub fn export_file(
    file: &AudioFile,
    generation: Generation,
    policy: ExportPolicy,
    dest: &Path,
    lip: Option<&LipData>,
) -> Result<ExportedFile> {
    let (name, bytes) = render_export(file, generation, policy)?;
    let path = join_archive_path(dest, &name);
    write_file(&path, &bytes)?;

    let lip = match lip {
        Some(lip) => {
            let lip_path = path.with_extension("lip");
            write_file(&lip_path, &lip.bytes)?;
            Some(lip_path)
        }
        None => None,
    };
    Ok(ExportedFile { path, lip })
}

/// Make `name` end in the extension of `format`, swapping `.wav`/`.ogg`
fn with_format_extension(name: &str, format: AudioFormat) -> String {
    let wanted = format.extension();
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(&format!(".{wanted}")) {
        name.to_string()
    } else if lower.ends_with(".wav") || lower.ends_with(".ogg") {
        format!("{}.{wanted}", &name[..name.len() - 4])
    } else {
        format!("{name}.{wanted}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{bytes_to_pcm16, detect_header};
    use crate::model::HashMode;

    fn pcm_file(path: &str, rate: u32, samples: &[i16]) -> AudioFile {
        let data = pcm16_to_bytes(samples);
        let len = data.len();
        AudioFile::new(
            path,
            AudioRecord::pcm16(rate, 1, samples.len()),
            data,
            0..len,
            HashMode::Canonical,
        )
    }

    #[test]
    fn test_nearest_standard_rate() {
        assert_eq!(nearest_standard_rate(8000), 11025);
        assert_eq!(nearest_standard_rate(22050), 22050);
        assert_eq!(nearest_standard_rate(32000), 22050);
        assert_eq!(nearest_standard_rate(46000), 44100);
        assert_eq!(nearest_standard_rate(96000), 48000);
    }

    #[test]
    fn test_native_wraps_bare_payload() {
        let file = pcm_file("Sfx\\Door.wav", 22050, &[5, -5, 7, -7]);
        let (name, bytes) = render_export(&file, Generation::Gen23, ExportPolicy::Native).unwrap();
        assert_eq!(name, "Sfx\\Door.wav");

        let header = detect_header(&bytes).unwrap();
        assert_eq!(header.record.sample_rate, 22050);
        assert_eq!(bytes_to_pcm16(header.payload(&bytes)), vec![5, -5, 7, -7]);
    }

    #[test]
    fn test_playable_vorbis_is_kept() {
        let data = b"OggS stand-in".to_vec();
        let len = data.len();
        let record = AudioRecord {
            format: AudioFormat::Vorbis,
            data_size: len as u32,
            ..AudioRecord::pcm16(44100, 2, 0)
        };
        let file = AudioFile::new("music/theme.wav", record, data.clone(), 0..len, HashMode::Direct);

        let (name, bytes) = render_export(&file, Generation::Gen4, ExportPolicy::Playable).unwrap();
        assert_eq!(name, "music/theme.ogg");
        assert_eq!(bytes, data);
    }

    #[test]
    fn test_playable_resamples_to_standard_rate() {
        let samples: Vec<i16> = (0..800).map(|i| ((i % 40) * 100) as i16).collect();
        let file = pcm_file("voice/line.ogg", 8000, &samples);

        let (name, bytes) = render_export(&file, Generation::Gen23, ExportPolicy::Playable).unwrap();
        assert_eq!(name, "voice/line.wav");
        let header = detect_header(&bytes).unwrap();
        assert_eq!(header.record.sample_rate, 11025);
        assert_eq!(header.record.format, AudioFormat::Pcm16);
        assert_eq!(header.record.frame_count(), 1103);
    }

    #[test]
    fn test_export_writes_lip_side_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = pcm_file("vo/a/hello.wav", 22050, &[1, 2, 3]);
        let lip = LipData {
            bytes: b"LIP \x0c\0\0\0data".to_vec(),
            segment_size: 0x1000,
        };

        let exported =
            export_file(&file, Generation::Gen4, ExportPolicy::Native, dir.path(), Some(&lip))
                .unwrap();
        assert_eq!(exported.path, dir.path().join("vo").join("a").join("hello.wav"));
        assert!(exported.path.is_file());
        let lip_path = exported.lip.unwrap();
        assert_eq!(lip_path, dir.path().join("vo").join("a").join("hello.lip"));
        assert_eq!(std::fs::read(lip_path).unwrap(), lip.bytes);
    }
}
