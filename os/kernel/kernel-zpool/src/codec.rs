//! # Page codecs
//!
//! Two encodings are stored in a pool:
//!
//! - the **zero page** marker, four zero bytes standing for a page of zeros;
//! - a byte-oriented **run-length** code with `0xFF` as escape:
//!
//! ```text
//!   FF len val   run of `len` (3..=255) copies of `val`
//!   FF 00 FF     a literal 0xFF
//!   b            any other byte, copied as is
//! ```

use crate::ZpoolError;
use alloc::vec::Vec;
use kernel_info::compression::ZERO_PAGE_MARKER_LEN;
use kernel_memory_addresses::PAGE_BYTES;

const ESCAPE: u8 = 0xFF;
const MIN_RUN: usize = 3;
const MAX_RUN: usize = u8::MAX as usize;

/// Compression algorithm selector of a pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// No coder; only zero pages are admitted.
    None,
    RunLength,
    Zstd,
    Lzo,
    Deflate,
}

impl Algorithm {
    /// Whether pools may be created with this algorithm.
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::None | Self::RunLength)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::RunLength => "rle",
            Self::Zstd => "zstd",
            Self::Lzo => "lzo",
            Self::Deflate => "deflate",
        }
    }
}

pub(crate) fn is_zero_page(page: &[u8; PAGE_BYTES]) -> bool {
    page.iter().all(|&b| b == 0)
}

pub(crate) fn zero_marker() -> Vec<u8> {
    alloc::vec![0; ZERO_PAGE_MARKER_LEN]
}

/// Run-length encode `input`.
///
/// Returns `None` if the output would grow past `limit` bytes or would not
/// be smaller than the input.
pub(crate) fn rle_encode(input: &[u8], limit: usize) -> Option<Vec<u8>> {
    let limit = limit.min(input.len().saturating_sub(1));
    let mut out = Vec::with_capacity(limit);
    let mut pos = 0;

    while pos < input.len() {
        let byte = input[pos];
        let run = input[pos..]
            .iter()
            .take(MAX_RUN)
            .take_while(|&&b| b == byte)
            .count();

        if run >= MIN_RUN {
            #[allow(clippy::cast_possible_truncation)]
            out.extend_from_slice(&[ESCAPE, run as u8, byte]);
            pos += run;
        } else {
            if byte == ESCAPE {
                out.extend_from_slice(&[ESCAPE, 0, ESCAPE]);
            } else {
                out.push(byte);
            }
            pos += 1;
        }

        if out.len() > limit {
            return None;
        }
    }
    Some(out)
}

/// Decode a run-length stream into exactly one page.
pub(crate) fn rle_decode(input: &[u8], out: &mut [u8; PAGE_BYTES]) -> Result<(), ZpoolError> {
    let mut src = 0;
    let mut dst = 0;

    while src < input.len() {
        if input[src] != ESCAPE {
            *out.get_mut(dst).ok_or(ZpoolError::Corrupt)? = input[src];
            src += 1;
            dst += 1;
            continue;
        }

        let (&len, &value) = input
            .get(src + 1)
            .zip(input.get(src + 2))
            .ok_or(ZpoolError::Corrupt)?;
        let len = if len == 0 { 1 } else { usize::from(len) };
        out.get_mut(dst..dst + len)
            .ok_or(ZpoolError::Corrupt)?
            .fill(value);
        src += 3;
        dst += len;
    }

    if dst == PAGE_BYTES {
        Ok(())
    } else {
        Err(ZpoolError::Corrupt)
    }
}

/// Expand a zero-page marker.
pub(crate) fn zero_decode(input: &[u8], out: &mut [u8; PAGE_BYTES]) -> Result<(), ZpoolError> {
    if input.len() == ZERO_PAGE_MARKER_LEN && input.iter().all(|&b| b == 0) {
        out.fill(0);
        Ok(())
    } else {
        Err(ZpoolError::Corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::compression::MAX_COMPRESSION_SIZE;

    #[test]
    fn runs_and_escapes_use_the_documented_format() {
        let input = [7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 1, 0xFF, 2, 2];
        let out = rle_encode(&input, 64).expect("shrinks");
        assert_eq!(out, [0xFF, 10, 7, 1, 0xFF, 0, 0xFF, 2, 2]);
    }

    #[test]
    fn long_runs_are_capped_at_255() {
        let page = [0xAB; PAGE_BYTES];
        let out = rle_encode(&page, MAX_COMPRESSION_SIZE).expect("compressible");
        // 16 runs of 255 plus one of 16
        assert_eq!(out.len(), 17 * 3);
        assert_eq!(&out[..3], &[0xFF, 255, 0xAB]);
        assert_eq!(&out[out.len() - 3..], &[0xFF, 16, 0xAB]);

        let mut restored = [0; PAGE_BYTES];
        rle_decode(&out, &mut restored).expect("decode");
        assert_eq!(restored, page);
    }

    #[test]
    fn fails_past_the_size_limit() {
        let mut page = [0u8; PAGE_BYTES];
        for (b, v) in page.iter_mut().zip((0..=250u8).cycle()) {
            *b = v;
        }
        assert_eq!(rle_encode(&page, MAX_COMPRESSION_SIZE), None);
        // No byte saved is a failure too.
        assert_eq!(rle_encode(&[1, 2, 3], 64), None);
    }

    #[test]
    fn mixed_page_survives_decoding() {
        let mut page = [0u8; PAGE_BYTES];
        page[..100].fill(0xFF);
        page[100] = 0xFF;
        page[101] = 1;
        page[2000..2010].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 0xFF]);
        let out = rle_encode(&page, MAX_COMPRESSION_SIZE).expect("compressible");
        let mut restored = [0x55; PAGE_BYTES];
        rle_decode(&out, &mut restored).expect("decode");
        assert_eq!(restored[..], page[..]);
    }

    #[test]
    fn malformed_streams_are_corrupt() {
        let mut out = [0; PAGE_BYTES];
        assert_eq!(rle_decode(&[0xFF, 3], &mut out), Err(ZpoolError::Corrupt));
        assert_eq!(rle_decode(&[1, 2, 3], &mut out), Err(ZpoolError::Corrupt));
        let overflow: Vec<u8> = [0xFF, 255, 0].repeat(17);
        assert_eq!(rle_decode(&overflow, &mut out), Err(ZpoolError::Corrupt));
    }

    #[test]
    fn zero_marker_round_trip() {
        assert!(is_zero_page(&[0; PAGE_BYTES]));
        let mut out = [9; PAGE_BYTES];
        zero_decode(&zero_marker(), &mut out).expect("marker");
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(zero_decode(&[0, 0, 0], &mut out), Err(ZpoolError::Corrupt));
        assert_eq!(zero_decode(&[0, 0, 0, 1], &mut out), Err(ZpoolError::Corrupt));
    }
}
