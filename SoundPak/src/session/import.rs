//! Replacing archive entries with external files

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::header::{ADPCM_HEADER_SIZE, PCM_HEADER_SIZE};
use crate::codec::{
    AdpcmSettings, EncodedStream, decode_to_pcm16, detect_header, encode_from_pcm16,
    resample_channels, resample_sample_rate, wrap_container,
};
use crate::error::{Error, Result};
use crate::formats::Generation;
use crate::model::{AudioFile, AudioFormat, AudioRecord, HashMode, analyze};
use crate::utils::{normalize_archive_path, normalize_path, swap_audio_extension};

/// How imported bytes become archive content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPolicy {
    /// Store the file's stream as-is
    Direct,
    /// Decode, match the entry's channels and rate, re-encode to its format
    #[default]
    Transcode,
}

/// Per-entry constraints that override the requested policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportTarget {
    pub generation: Generation,
    /// Alias sub streams must keep their exact layout
    pub alias_member: bool,
}

/// New content for an entry, ready to be swapped in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub record: AudioRecord,
    pub data: Vec<u8>,
    pub payload: Range<usize>,
}

/// Find the archive entry an external file replaces.
///
/// With an `import_root`, the file's path below it is the archive path.
/// Without one, the file name has to match exactly one entry. Either way a
/// `.wav` file may stand in for an `.ogg` entry and vice versa.
pub fn resolve_target(
    files: &BTreeMap<String, AudioFile>,
    external: &Path,
    import_root: Option<&Path>,
) -> Result<String> {
    let missing = || Error::MissingCounterpart {
        path: external.to_path_buf(),
    };

    let wanted = match import_root {
        Some(root) => normalize_path(external.strip_prefix(root).map_err(|_| missing())?),
        None => external
            .file_name()
            .map(|name| normalize_archive_path(&name.to_string_lossy()))
            .ok_or_else(missing)?,
    };

    let mut candidates = vec![wanted.clone()];
    candidates.extend(swap_audio_extension(&wanted));

    for candidate in candidates {
        if import_root.is_some() {
            if files.contains_key(&candidate) {
                return Ok(candidate);
            }
            continue;
        }

        let suffix = format!("/{candidate}");
        let mut matches = files
            .keys()
            .filter(|key| **key == candidate || key.ends_with(&suffix));
        if let Some(first) = matches.next() {
            if let Some(second) = matches.next() {
                return Err(Error::InvalidPath(format!(
                    "{} matches both {first} and {second}; import from a directory mirroring the archive",
                    external.display()
                )));
            }
            return Ok(first.clone());
        }
    }
    Err(missing())
}

/// Turn an external file into replacement content for `file`.
///
/// Nothing is modified here; a failure leaves the entry untouched.
pub fn prepare_import(
    file: &AudioFile,
    bytes: &[u8],
    policy: ImportPolicy,
    target: ImportTarget,
    mode: HashMode,
    adpcm: &AdpcmSettings,
) -> Result<Replacement> {
    let header = detect_header(bytes).ok_or_else(|| {
        Error::UndetectedStream(format!("{} is not a recognized audio file", file.display_path))
    })?;

    if policy == ImportPolicy::Direct && !target.alias_member {
        let (data, payload) = if target.generation == Generation::Gen1 {
            (bytes.to_vec(), header.data.clone())
        } else {
            let payload = header.payload(bytes).to_vec();
            let len = payload.len();
            (payload, 0..len)
        };
        let record = analyze(header.record, &data[payload.clone()], mode);
        debug!("Direct import into {} as {}", file.path, record.format.as_str());
        return Ok(Replacement {
            record,
            data,
            payload,
        });
    }

    let stream = transcode(&header.record, header.payload(bytes), &file.record, adpcm)?;
    let (data, payload) = if target.generation == Generation::Gen1 {
        let start = match stream.record.format {
            AudioFormat::Pcm16 => PCM_HEADER_SIZE,
            AudioFormat::ImaAdpcm => ADPCM_HEADER_SIZE,
            AudioFormat::Vorbis | AudioFormat::UnknownDecodable => 0,
        };
        let len = stream.payload.len();
        (wrap_container(&stream.record, &stream.payload)?, start..start + len)
    } else {
        let len = stream.payload.len();
        (stream.payload, 0..len)
    };
    let record = analyze(stream.record, &data[payload.clone()], mode);
    debug!(
        "Transcoded import into {}: {} Hz x{} {}",
        file.path,
        record.sample_rate,
        record.channels,
        record.format.as_str()
    );
    Ok(Replacement {
        record,
        data,
        payload,
    })
}

/// Decode `source`, conform it to `original`'s channels and rate, and encode to its format
pub fn transcode(
    source: &AudioRecord,
    payload: &[u8],
    original: &AudioRecord,
    adpcm: &AdpcmSettings,
) -> Result<EncodedStream> {
    let mut record = *source;
    let mut samples = decode_to_pcm16(source, payload)?;
    resample_channels(&mut record, &mut samples, original.channels)?;
    resample_sample_rate(&mut record, &mut samples, original.sample_rate)?;

    let format = match original.format {
        AudioFormat::UnknownDecodable => AudioFormat::Pcm16,
        other => other,
    };
    let mut settings = *adpcm;
    if format == AudioFormat::ImaAdpcm && original.block_align > 0 {
        settings.block_size = Some(original.block_align);
    }
    encode_from_pcm16(format, original, &samples, &settings)
}
