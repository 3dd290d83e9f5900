//! IMA ADPCM (Microsoft block layout) encoder and decoder
//!
//! Each block starts with one 4-byte header per channel (`i16` predictor,
//! `u8` step index, `u8` reserved). The header predictor is the first sample
//! of the block. The rest of the block holds groups of 4 bytes per channel,
//! 8 nibbles each, low nibble first.
//!
//! The encoder searches a few samples ahead for the nibble sequence with the
//! smallest squared error and can shape its quantization noise with
//! first-order error feedback.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

const INDEX_TABLE: [i32; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Sample rate above which adaptive noise shaping is enabled by default
pub const NOISE_SHAPING_THRESHOLD: u32 = 64_000;

/// Default search depth of the encoder
pub const DEFAULT_LOOKAHEAD: u32 = 3;

/// Noise shaping mode of the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseShaping {
    #[default]
    Off,
    /// Fixed full-weight error feedback
    Static,
    /// Error feedback weighted by the signal's high-frequency content
    Dynamic,
}

/// Tunables of the ADPCM encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdpcmSettings {
    /// Block size in bytes; derived from the sample rate when `None`
    pub block_size: Option<u16>,
    /// Number of samples the nibble search looks ahead
    pub lookahead: u32,
    /// Noise shaping; adaptive above 64 kHz when `None`
    pub noise_shaping: Option<NoiseShaping>,
}

impl Default for AdpcmSettings {
    fn default() -> Self {
        Self {
            block_size: None,
            lookahead: DEFAULT_LOOKAHEAD,
            noise_shaping: None,
        }
    }
}

impl AdpcmSettings {
    fn shaping_for(&self, sample_rate: u32) -> NoiseShaping {
        self.noise_shaping.unwrap_or(if sample_rate > NOISE_SHAPING_THRESHOLD {
            NoiseShaping::Dynamic
        } else {
            NoiseShaping::Off
        })
    }
}

/// Result of [`encode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAdpcm {
    pub data: Vec<u8>,
    pub block_align: u16,
    pub samples_per_block: u32,
}

/// Default block size: `256 * channels * max(1, rate / 11000)`, rounded down to a power of two
#[must_use]
pub fn default_block_size(sample_rate: u32, channels: u16) -> u16 {
    let size = 256 * u32::from(channels) * (sample_rate / 11000).max(1);
    let rounded = 1u32 << (31 - size.leading_zeros());
    rounded.min(0x8000) as u16
}

/// Frames held by one full block
#[must_use]
pub fn samples_per_block(block_align: u16, channels: u16) -> u32 {
    let header = 4 * u32::from(channels);
    let block = u32::from(block_align);
    if channels == 0 || block < header {
        return 0;
    }
    (block - header) * 8 / header + 1
}

/// Frames held by `data_size` bytes of blocks, counting a trailing partial block
#[must_use]
pub fn frames_in(data_size: usize, block_align: u16, channels: u16) -> usize {
    let block = usize::from(block_align);
    if block == 0 || channels == 0 {
        return 0;
    }
    let full = data_size / block;
    let rest = data_size % block;
    full * samples_per_block(block_align, channels) as usize
        + partial_block_frames(rest, channels)
}

fn partial_block_frames(bytes: usize, channels: u16) -> usize {
    let header = 4 * usize::from(channels);
    if bytes < header {
        return 0;
    }
    1 + (bytes - header) / header * 8
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    predictor: i32,
    index: i32,
}

impl ChannelState {
    /// Apply one nibble, returning the reconstructed sample
    fn step(&mut self, nibble: u8) -> i32 {
        let step = STEP_TABLE[self.index as usize];
        let mut diff = step >> 3;
        if nibble & 1 != 0 {
            diff += step >> 2;
        }
        if nibble & 2 != 0 {
            diff += step >> 1;
        }
        if nibble & 4 != 0 {
            diff += step;
        }
        if nibble & 8 != 0 {
            self.predictor -= diff;
        } else {
            self.predictor += diff;
        }
        self.predictor = self.predictor.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
        self.index = (self.index + INDEX_TABLE[usize::from(nibble & 0x0F)]).clamp(0, 88);
        self.predictor
    }

    /// Nibble that best approximates `sample` in a single step
    fn ideal_nibble(&self, sample: i32) -> u8 {
        let step = STEP_TABLE[self.index as usize];
        let delta = sample - self.predictor;
        let magnitude = ((delta.abs() << 2) / step).min(7) as u8;
        if delta < 0 { magnitude | 8 } else { magnitude }
    }
}

/// Decode IMA ADPCM blocks to interleaved PCM16.
///
/// A trailing partial block is decoded as far as its bytes reach.
pub fn decode(data: &[u8], channels: u16, block_align: u16) -> Result<Vec<i16>> {
    if !(1..=2).contains(&channels) {
        return Err(Error::DecodeFailed(format!("{channels} channels in ADPCM stream")));
    }
    let ch = usize::from(channels);
    let header = 4 * ch;
    if usize::from(block_align) < header {
        return Err(Error::DecodeFailed(format!("block align {block_align} is too small")));
    }

    let mut out = Vec::with_capacity(frames_in(data.len(), block_align, channels) * ch);
    for block in data.chunks(usize::from(block_align)) {
        if block.len() < header {
            break;
        }
        decode_block(block, ch, &mut out);
    }
    Ok(out)
}

fn decode_block(block: &[u8], ch: usize, out: &mut Vec<i16>) {
    let mut states = [ChannelState::default(); 2];
    for (c, state) in states.iter_mut().enumerate().take(ch) {
        let h = &block[c * 4..c * 4 + 4];
        state.predictor = i32::from(i16::from_le_bytes([h[0], h[1]]));
        state.index = i32::from(h[2]).min(88);
    }
    for state in states.iter().take(ch) {
        out.push(state.predictor as i16);
    }

    let groups = (block.len() - 4 * ch) / (4 * ch);
    let group_start = out.len();
    out.resize(group_start + groups * 8 * ch, 0);
    let body = &block[4 * ch..];
    for g in 0..groups {
        for (c, state) in states.iter_mut().enumerate().take(ch) {
            let bytes = &body[(g * ch + c) * 4..(g * ch + c) * 4 + 4];
            for (i, byte) in bytes.iter().enumerate() {
                let base = group_start + (g * 8 + i * 2) * ch + c;
                out[base] = state.step(byte & 0x0F) as i16;
                out[base + ch] = state.step(byte >> 4) as i16;
            }
        }
    }
}

/// Error feedback state for one channel
#[derive(Debug, Clone, Copy)]
struct Shaper {
    mode: NoiseShaping,
    error: i32,
    weight: f64,
    previous: i32,
    high_energy: f64,
    total_energy: f64,
}

impl Shaper {
    fn new(mode: NoiseShaping) -> Self {
        Self {
            mode,
            error: 0,
            weight: if mode == NoiseShaping::Static { 1.0 } else { 0.0 },
            previous: 0,
            high_energy: 0.0,
            total_energy: 0.0,
        }
    }

    fn target(&self, sample: i32) -> i32 {
        if self.mode == NoiseShaping::Off {
            return sample;
        }
        let shaped = f64::from(sample) - f64::from(self.error) * self.weight;
        (shaped.round() as i32).clamp(i32::from(i16::MIN), i32::from(i16::MAX))
    }

    fn update(&mut self, sample: i32, target: i32, decoded: i32) {
        if self.mode == NoiseShaping::Off {
            return;
        }
        self.error = decoded - target;
        if self.mode == NoiseShaping::Dynamic {
            let high = f64::from(sample - self.previous);
            let level = f64::from(sample);
            self.high_energy = self.high_energy * 0.995 + high * high * 0.005;
            self.total_energy = self.total_energy * 0.995 + level * level * 0.005;
            self.weight = (self.high_energy / (self.total_energy + 1.0)).clamp(0.0, 1.0);
        }
        self.previous = sample;
    }
}

/// Candidate nibbles around the ideal one, ideal first
fn candidates(ideal: u8) -> impl Iterator<Item = u8> {
    let sign = ideal & 8;
    let magnitude = ideal & 7;
    let lower = magnitude.checked_sub(1).map(|m| m | sign);
    let upper = (magnitude < 7).then_some((magnitude + 1) | sign);
    std::iter::once(ideal).chain(lower).chain(upper)
}

/// Smallest squared error reachable from `state` over `samples[..depth]`
fn search_error(state: ChannelState, samples: &[i32], depth: u32) -> i64 {
    let Some((&sample, rest)) = samples.split_first() else {
        return 0;
    };
    if depth == 0 {
        return 0;
    }
    candidates(state.ideal_nibble(sample))
        .map(|nibble| {
            let mut next = state;
            let err = i64::from(next.step(nibble) - sample);
            err * err + search_error(next, rest, depth - 1)
        })
        .min()
        .unwrap_or(0)
}

fn choose_nibble(state: ChannelState, target: i32, ahead: &[i32], lookahead: u32) -> u8 {
    let ideal = state.ideal_nibble(target);
    if lookahead == 0 {
        return ideal;
    }
    let mut best = (i64::MAX, ideal);
    for nibble in candidates(ideal) {
        let mut next = state;
        let err = i64::from(next.step(nibble) - target);
        let total = err * err + search_error(next, ahead, lookahead);
        if total < best.0 {
            best = (total, nibble);
        }
    }
    best.1
}

fn initial_index(samples: &[i16], ch: usize, c: usize) -> i32 {
    let frames = (samples.len() / ch).min(16);
    if frames < 2 {
        return 0;
    }
    let avg = (1..frames)
        .map(|f| (i32::from(samples[f * ch + c]) - i32::from(samples[(f - 1) * ch + c])).abs())
        .sum::<i32>()
        / (frames as i32 - 1);
    STEP_TABLE.iter().position(|&s| s >= avg).unwrap_or(88) as i32
}

/// Encode interleaved PCM16 into IMA ADPCM blocks.
///
/// The final block is padded by repeating the last frame so every block has the same size.
pub fn encode(samples: &[i16], channels: u16, sample_rate: u32, settings: &AdpcmSettings) -> Result<EncodedAdpcm> {
    if !(1..=2).contains(&channels) {
        return Err(Error::EncodeFailed(format!("{channels} channels in ADPCM stream")));
    }
    let ch = usize::from(channels);
    if samples.is_empty() || samples.len() % ch != 0 {
        return Err(Error::EncodeFailed(format!(
            "{} samples do not form whole {ch}-channel frames",
            samples.len()
        )));
    }

    let block_align = settings
        .block_size
        .unwrap_or_else(|| default_block_size(sample_rate, channels));
    let spb = samples_per_block(block_align, channels) as usize;
    if spb < 2 || (usize::from(block_align) - 4 * ch) % (4 * ch) != 0 {
        return Err(Error::EncodeFailed(format!(
            "block size {block_align} does not hold whole {ch}-channel groups"
        )));
    }

    let shaping = settings.shaping_for(sample_rate);
    let frames = samples.len() / ch;
    let blocks = frames.div_ceil(spb);
    debug!(
        "ADPCM encode: {} frames, {} blocks of {} bytes, lookahead {}, shaping {:?}",
        frames, blocks, block_align, settings.lookahead, shaping
    );

    // Planar, padded copy of the input
    let padded_frames = blocks * spb;
    let planar: Vec<Vec<i32>> = (0..ch)
        .map(|c| {
            let last = i32::from(samples[(frames - 1) * ch + c]);
            (0..padded_frames)
                .map(|f| if f < frames { i32::from(samples[f * ch + c]) } else { last })
                .collect()
        })
        .collect();

    let mut states: Vec<ChannelState> = (0..ch)
        .map(|c| ChannelState {
            predictor: 0,
            index: initial_index(samples, ch, c),
        })
        .collect();
    let mut shapers = vec![Shaper::new(shaping); ch];
    let lookahead = settings.lookahead as usize;

    let mut data = Vec::with_capacity(blocks * usize::from(block_align));
    let mut nibbles = vec![0u8; spb - 1];
    for block in 0..blocks {
        let start = block * spb;
        for (c, state) in states.iter_mut().enumerate() {
            state.predictor = planar[c][start];
            data.extend_from_slice(&(state.predictor as i16).to_le_bytes());
            data.push(state.index as u8);
            data.push(0);
        }

        let body_start = data.len();
        data.resize(body_start + usize::from(block_align) - 4 * ch, 0);
        for c in 0..ch {
            let line = &planar[c][start..start + spb];
            for i in 1..spb {
                let target = shapers[c].target(line[i]);
                let ahead_end = (i + 1 + lookahead).min(spb);
                let nibble = choose_nibble(states[c], target, &line[i + 1..ahead_end], settings.lookahead);
                let decoded = states[c].step(nibble);
                shapers[c].update(line[i], target, decoded);
                nibbles[i - 1] = nibble;
            }
            for (g, group) in nibbles.chunks(8).enumerate() {
                let offset = body_start + (g * ch + c) * 4;
                for (i, pair) in group.chunks(2).enumerate() {
                    data[offset + i] = pair[0] | (pair.get(1).copied().unwrap_or(0) << 4);
                }
            }
        }
    }

    Ok(EncodedAdpcm {
        data,
        block_align,
        samples_per_block: spb as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, channels: usize) -> Vec<i16> {
        (0..frames)
            .flat_map(|f| {
                let v = ((f as f64 * 0.05).sin() * 12000.0) as i16;
                std::iter::repeat_n(v, channels)
            })
            .collect()
    }

    #[test]
    fn test_default_block_size() {
        assert_eq!(default_block_size(22050, 1), 512);
        assert_eq!(default_block_size(44100, 2), 2048);
        assert_eq!(default_block_size(8000, 1), 256);
        // 256 * 2 * 3 = 1536 rounds down to 1024
        assert_eq!(default_block_size(33000, 2), 1024);
    }

    #[test]
    fn test_samples_per_block() {
        assert_eq!(samples_per_block(256, 1), 505);
        assert_eq!(samples_per_block(512, 2), 505);
        assert_eq!(samples_per_block(2048, 2), 2041);
    }

    #[test]
    fn test_encode_decode_tracks_signal() {
        let input = sine(3000, 2);
        let encoded = encode(&input, 2, 22050, &AdpcmSettings::default()).unwrap();
        assert_eq!(encoded.data.len() % usize::from(encoded.block_align), 0);

        let decoded = decode(&encoded.data, 2, encoded.block_align).unwrap();
        assert!(decoded.len() >= input.len());
        let max_err = input
            .iter()
            .zip(&decoded)
            .map(|(a, b)| (i32::from(*a) - i32::from(*b)).abs())
            .max()
            .unwrap();
        assert!(max_err < 1500, "max error {max_err}");
    }

    #[test]
    fn test_block_headers_hold_first_sample() {
        let input = sine(1200, 1);
        let settings = AdpcmSettings {
            block_size: Some(256),
            ..AdpcmSettings::default()
        };
        let encoded = encode(&input, 1, 11025, &settings).unwrap();
        let decoded = decode(&encoded.data, 1, 256).unwrap();
        for block in 0..input.len() / 505 {
            assert_eq!(decoded[block * 505], input[block * 505]);
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let input = sine(4000, 1);
        let settings = AdpcmSettings {
            noise_shaping: Some(NoiseShaping::Dynamic),
            ..AdpcmSettings::default()
        };
        let a = encode(&input, 1, 96000, &settings).unwrap();
        let b = encode(&input, 1, 96000, &settings).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_lookahead_never_worse_than_greedy() {
        let input = sine(2000, 1);
        let error = |lookahead| {
            let settings = AdpcmSettings {
                lookahead,
                noise_shaping: Some(NoiseShaping::Off),
                ..AdpcmSettings::default()
            };
            let enc = encode(&input, 1, 22050, &settings).unwrap();
            let dec = decode(&enc.data, 1, enc.block_align).unwrap();
            input
                .iter()
                .zip(&dec)
                .map(|(a, b)| {
                    let d = i64::from(*a) - i64::from(*b);
                    d * d
                })
                .sum::<i64>()
        };
        assert!(error(3) <= error(0) * 3 / 2);
    }

    #[test]
    fn test_frames_in_partial_block() {
        // One full mono block of 256 bytes plus 4 header bytes and 4 data bytes
        assert_eq!(frames_in(264, 256, 1), 505 + 9);
    }

    #[test]
    fn test_rejects_bad_channels() {
        assert!(encode(&[0; 6], 3, 22050, &AdpcmSettings::default()).is_err());
        assert!(decode(&[0; 16], 0, 256).is_err());
    }
}
