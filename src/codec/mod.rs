//! Delta blob codec
//!
//! The codec owns the on-disk delta blob format and is the single source
//! of truth for it. A blob is a header carrying the tag (how many sequence
//! positions back the base lies; 0 = keyframe) followed by a copy/insert
//! op stream against the base, optionally passed through a zstd entropy
//! stage when that shrinks it.
//!
//! Everything here is pure computation over byte slices: no engine state,
//! no locks, no global allocator tricks. Encode-pool workers call these
//! functions directly from worker threads.
//!
//! Header layout (byte-order portable, parsed byte-at-a-time):
//!   byte 0, low nibble : tag 0..=14 directly, 15 = extended
//!   byte 0, bit 4      : payload is zstd-compressed
//!   extended tag       : LEB128 varint holding (tag - 15)
//!   zstd payloads      : LEB128 varint of the raw op-stream length, then
//!                        the compressed stream

mod delta;

use crate::constants::{KEYFRAME_TAG, MAX_COMPRESS_DEPTH};
use crate::core::error::CodecError;

/// Result alias local to the codec.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

const FLAG_ZSTD: u8 = 0x10;
const TAG_EXTENDED: u8 = 0x0f;

/// Entropy level handed to zstd; low enough to keep encode candidates cheap.
const ZSTD_LEVEL: i32 = 3;

/// Minimum payload size worth running through the entropy stage.
const ENTROPY_MIN_LEN: usize = 64;

/// Codec identification string, exposed through the version operator.
pub fn version() -> &'static str {
    "patchstore-delta/1 (block-match + zstd)"
}

/// Encode `new` as a delta blob against `base` under the given tag.
///
/// Tag 0 must be paired with an empty base and produces a self-contained
/// keyframe. The round-trip contract is
/// `decode(base, encode(tag, base, new, e)) == new` for every input.
pub fn encode(tag: u16, base: &[u8], new: &[u8], entropy: bool) -> CodecResult<Vec<u8>> {
    if u64::from(tag) > u64::from(MAX_COMPRESS_DEPTH) {
        return Err(CodecError::TagOutOfRange(u64::from(tag)));
    }
    let ops = if tag == KEYFRAME_TAG {
        delta::encode_ops(&[], new)
    } else {
        delta::encode_ops(base, new)
    };

    let mut header = Vec::with_capacity(4);
    let nibble = if tag < 15 { tag as u8 } else { TAG_EXTENDED };
    header.push(nibble);
    if nibble == TAG_EXTENDED {
        write_varint(&mut header, u64::from(tag) - 15);
    }

    if entropy && ops.len() >= ENTROPY_MIN_LEN {
        match zstd::bulk::compress(&ops, ZSTD_LEVEL) {
            Ok(compressed) => {
                // Varint raw length + compressed stream must actually win.
                let mut framed = Vec::with_capacity(compressed.len() + 4);
                write_varint(&mut framed, ops.len() as u64);
                framed.extend_from_slice(&compressed);
                if framed.len() < ops.len() {
                    header[0] |= FLAG_ZSTD;
                    header.extend_from_slice(&framed);
                    return Ok(header);
                }
            }
            Err(e) => {
                return Err(CodecError::EncodeFailed(format!("entropy stage: {e}")));
            }
        }
    }

    header.extend_from_slice(&ops);
    Ok(header)
}

/// Decode a delta blob against its base, reconstructing the full content.
///
/// Keyframes (tag 0) ignore the base. Fails with [`CodecError::CorruptedDelta`]
/// when the op stream references bytes outside the base or is truncated.
pub fn decode(base: &[u8], blob: &[u8]) -> CodecResult<Vec<u8>> {
    let parsed = parse_header(blob)?;
    let effective_base = if parsed.tag == KEYFRAME_TAG { &[][..] } else { base };

    if parsed.zstd {
        let (raw_len, consumed) = read_varint(parsed.payload)
            .ok_or_else(|| CodecError::CorruptedDelta("truncated entropy frame".into()))?;
        let raw_len = usize::try_from(raw_len)
            .map_err(|_| CodecError::CorruptedDelta("entropy frame length overflow".into()))?;
        let ops = zstd::bulk::decompress(&parsed.payload[consumed..], raw_len)
            .map_err(|e| CodecError::CorruptedDelta(format!("entropy stage: {e}")))?;
        delta::apply_ops(effective_base, &ops)
    } else {
        delta::apply_ops(effective_base, parsed.payload)
    }
}

/// Extract the tag from a delta blob without touching the payload.
pub fn tag_of(blob: &[u8]) -> CodecResult<u16> {
    Ok(parse_header(blob)?.tag)
}

struct ParsedHeader<'a> {
    tag: u16,
    zstd: bool,
    payload: &'a [u8],
}

fn parse_header(blob: &[u8]) -> CodecResult<ParsedHeader<'_>> {
    let first = *blob
        .first()
        .ok_or_else(|| CodecError::CorruptedHeader("empty blob".into()))?;
    if first & !(FLAG_ZSTD | TAG_EXTENDED) != 0 {
        return Err(CodecError::CorruptedHeader(format!(
            "unknown header flags {first:#04x}"
        )));
    }
    let zstd = first & FLAG_ZSTD != 0;
    let nibble = first & TAG_EXTENDED;
    let (tag, used) = if nibble == TAG_EXTENDED {
        let (ext, consumed) = read_varint(&blob[1..])
            .ok_or_else(|| CodecError::CorruptedHeader("truncated tag varint".into()))?;
        let tag = ext
            .checked_add(15)
            .filter(|t| *t <= u64::from(MAX_COMPRESS_DEPTH))
            .ok_or(CodecError::TagOutOfRange(ext.saturating_add(15)))?;
        (tag as u16, 1 + consumed)
    } else {
        (u16::from(nibble), 1)
    };
    Ok(ParsedHeader {
        tag,
        zstd,
        payload: &blob[used..],
    })
}

/// LEB128 varint write.
pub(crate) fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// LEB128 varint read; returns (value, bytes consumed).
pub(crate) fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut v: u64 = 0;
    for (i, byte) in buf.iter().enumerate().take(10) {
        v |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((v, i + 1));
        }
    }
    None
}
