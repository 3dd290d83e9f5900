//! Distance-based alias groups
//!
//! Two PCM16 renditions of one sound share a single audio region. The
//! region alternates `stride_a` bytes of the higher quality stream (sub1)
//! with `stride_b` bytes of the lower one (sub2) until both are exhausted.

use crate::error::{Error, Result};
use crate::model::{AudioFormat, AudioRecord};

/// Interleave strides of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strides {
    pub a: usize,
    pub b: usize,
}

/// Compute the strides for `sub1` over `sub2`, validating the pair
pub fn strides(sub1: &AudioRecord, sub2: &AudioRecord, offset: u64) -> Result<Strides> {
    let invalid = |reason: String| Error::InvalidAliasGroup { offset, reason };

    if sub1.format != AudioFormat::Pcm16 || sub2.format != AudioFormat::Pcm16 {
        return Err(invalid(format!(
            "sub streams must be PCM16, found {} and {}",
            sub1.format.as_str(),
            sub2.format.as_str()
        )));
    }
    if sub2.sample_rate == 0 || sub2.channels == 0 {
        return Err(invalid("sub2 has no samples per second or channels".to_string()));
    }
    if sub1.sample_rate < sub2.sample_rate
        || sub1.sample_rate % sub2.sample_rate != 0
        || sub1.channels < sub2.channels
        || sub1.channels % sub2.channels != 0
    {
        return Err(invalid(format!(
            "{} Hz x{} is not a multiple of {} Hz x{}",
            sub1.sample_rate, sub1.channels, sub2.sample_rate, sub2.channels
        )));
    }

    let rate_ratio = (sub1.sample_rate / sub2.sample_rate) as usize;
    let channel_ratio = usize::from(sub1.channels / sub2.channels);
    Ok(Strides {
        a: rate_ratio * channel_ratio * 2,
        b: usize::from(sub2.channels) * 2,
    })
}

/// Split an audio region into the sub1 and sub2 streams
pub fn deinterleave(
    region: &[u8],
    size1: usize,
    size2: usize,
    strides: Strides,
    offset: u64,
) -> Result<(Vec<u8>, Vec<u8>)> {
    if size1 + size2 != region.len() {
        return Err(Error::InvalidAliasGroup {
            offset,
            reason: format!(
                "sub sizes {size1} + {size2} do not cover the {} byte region",
                region.len()
            ),
        });
    }

    let mut sub1 = Vec::with_capacity(size1);
    let mut sub2 = Vec::with_capacity(size2);
    let mut cursor = 0;
    while sub1.len() < size1 || sub2.len() < size2 {
        let take = strides.a.min(size1 - sub1.len());
        sub1.extend_from_slice(&region[cursor..cursor + take]);
        cursor += take;

        let take = strides.b.min(size2 - sub2.len());
        sub2.extend_from_slice(&region[cursor..cursor + take]);
        cursor += take;
    }
    Ok((sub1, sub2))
}

/// Inverse of [`deinterleave`]
#[must_use]
pub fn interleave(sub1: &[u8], sub2: &[u8], strides: Strides) -> Vec<u8> {
    let mut out = Vec::with_capacity(sub1.len() + sub2.len());
    let (mut a, mut b) = (sub1, sub2);
    while !a.is_empty() || !b.is_empty() {
        let (head, tail) = a.split_at(strides.a.min(a.len()));
        out.extend_from_slice(head);
        a = tail;

        let (head, tail) = b.split_at(strides.b.min(b.len()));
        out.extend_from_slice(head);
        b = tail;
    }
    out
}
