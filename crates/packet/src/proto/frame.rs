//! Frame delimiting and payload decompression.
//!
//! A frame is `u32 BE total length (includes itself) + u16 BE type tag +
//! payload`. The tag's top bit flags zstd compression; the low 15 bits are
//! the message kind.

use std::io::Read;

use super::ProtocolError;

/// Length prefix plus type tag.
pub const FRAME_HEADER_LEN: usize = 6;

/// Resynchronization threshold: a declared length above this means the
/// stream is misaligned or corrupt, not that a huge frame is coming.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Hard ceiling on decompressed payload size.
pub const MAX_DECOMPRESSED_LEN: usize = 32 * 1024 * 1024;

const ZSTD_MAGIC: u32 = 0xFD2F_B528;
const ZSTD_SKIPPABLE_LO: u32 = 0x184D_2A50;
const ZSTD_SKIPPABLE_HI: u32 = 0x184D_2A5F;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Low 15 bits of the type tag.
    pub kind: u16,
    pub compressed: bool,
    /// Raw payload; decompression is the caller's decision because nested
    /// framing strips a sequence field first.
    pub payload: Vec<u8>,
}

/// Split whole frames off the front of the accumulated stream, compacting
/// leftovers to the start of the buffer.
///
/// An in-bounds but incomplete frame, or a length outside the sanity
/// bounds, halts extraction for this call without touching the remainder:
/// incomplete data is retried once more bytes arrive.
pub fn split_frames(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut consumed = 0usize;
    while buf.len() - consumed >= 4 {
        let head = &buf[consumed..];
        let total = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
        if total <= 4 || total > MAX_FRAME_LEN {
            break;
        }
        if total > head.len() {
            break;
        }
        frames.push(head[..total].to_vec());
        consumed += total;
    }
    if consumed > 0 {
        buf.drain(..consumed);
    }
    frames
}

/// Parse one whole frame's header. Does not decompress.
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(ProtocolError::FrameTooShort(bytes.len()));
    }
    let total = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if (total as usize) < FRAME_HEADER_LEN || total as usize > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameLengthOutOfBounds(total));
    }
    let tag = u16::from_be_bytes([bytes[4], bytes[5]]);
    Ok(Frame {
        kind: tag & 0x7FFF,
        compressed: tag & 0x8000 != 0,
        payload: bytes[FRAME_HEADER_LEN..].to_vec(),
    })
}

/// Encode a frame; the inverse of `parse_frame` + `split_frames`.
pub fn encode_frame(kind: u16, compressed: bool, payload: &[u8]) -> Vec<u8> {
    let total = (FRAME_HEADER_LEN + payload.len()) as u32;
    let tag = if compressed { kind | 0x8000 } else { kind };
    let mut out = Vec::with_capacity(total as usize);
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(&tag.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decompress when the compression bit was set, otherwise pass through.
pub fn maybe_decompress(compressed: bool, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if !compressed {
        return Ok(payload.to_vec());
    }
    decompress(payload)
}

/// Scan forward to the real zstd frame and inflate it, bounded.
///
/// The stream may open with skippable frames (and, given protocol drift,
/// arbitrary junk), so this scans rather than insisting on a magic prefix.
fn decompress(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut offset = 0usize;
    while offset + 4 <= payload.len() {
        let magic = u32::from_le_bytes([
            payload[offset],
            payload[offset + 1],
            payload[offset + 2],
            payload[offset + 3],
        ]);
        if magic == ZSTD_MAGIC {
            return bounded_decode(&payload[offset..]);
        }
        if (ZSTD_SKIPPABLE_LO..=ZSTD_SKIPPABLE_HI).contains(&magic) {
            if offset + 8 > payload.len() {
                break;
            }
            let skip = u32::from_le_bytes([
                payload[offset + 4],
                payload[offset + 5],
                payload[offset + 6],
                payload[offset + 7],
            ]) as usize;
            offset = offset.saturating_add(8).saturating_add(skip);
            continue;
        }
        offset += 1;
    }
    Err(ProtocolError::MissingZstdMagic)
}

fn bounded_decode(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let decoder = zstd::stream::read::Decoder::new(data)?;
    let mut out = Vec::new();
    decoder
        .take(MAX_DECOMPRESSED_LEN as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > MAX_DECOMPRESSED_LEN {
        return Err(ProtocolError::DecompressTooLarge {
            limit: MAX_DECOMPRESSED_LEN,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip_preserves_kind_flag_and_payload() {
        let encoded = encode_frame(2, false, b"payload");
        let frame = parse_frame(&encoded).unwrap();
        assert_eq!(frame.kind, 2);
        assert!(!frame.compressed);
        assert_eq!(frame.payload, b"payload");

        let encoded = encode_frame(0x7FFF, true, b"");
        let frame = parse_frame(&encoded).unwrap();
        assert_eq!(frame.kind, 0x7FFF);
        assert!(frame.compressed);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn split_extracts_back_to_back_frames_and_keeps_leftover() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode_frame(2, false, b"one"));
        buf.extend_from_slice(&encode_frame(6, false, b"two"));
        // Trailing partial frame: header promises more than is buffered.
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x20, 0x00]);

        let frames = split_frames(&mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(parse_frame(&frames[0]).unwrap().payload, b"one");
        assert_eq!(parse_frame(&frames[1]).unwrap().payload, b"two");
        assert_eq!(buf, &[0x00, 0x00, 0x00, 0x20, 0x00]);

        // Once the rest arrives the held-back frame comes out whole.
        buf.extend_from_slice(&[0u8; 0x1B]);
        let frames = split_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 0x20);
        assert!(buf.is_empty());
    }

    #[test]
    fn insane_length_halts_extraction_without_discarding() {
        let mut buf = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x01];
        let before = buf.clone();
        assert!(split_frames(&mut buf).is_empty());
        assert_eq!(buf, before);

        let mut tiny = vec![0x00, 0x00, 0x00, 0x03, 0xAA, 0xBB];
        assert!(split_frames(&mut tiny).is_empty());
        assert_eq!(tiny.len(), 6);
    }

    #[test]
    fn compressed_payload_round_trips() {
        let body: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let compressed = zstd::encode_all(body.as_slice(), 0).unwrap();
        let out = maybe_decompress(true, &compressed).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn skippable_frames_before_the_real_one_are_skipped() {
        let body = b"real content".to_vec();
        let mut payload = Vec::new();
        // Skippable frame: magic + size + that many junk bytes.
        payload.extend_from_slice(&0x184D_2A53u32.to_le_bytes());
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        payload.extend_from_slice(&zstd::encode_all(body.as_slice(), 0).unwrap());
        assert_eq!(maybe_decompress(true, &payload).unwrap(), body);
    }

    #[test]
    fn corrupt_compressed_payload_is_an_error_not_a_panic() {
        assert!(matches!(
            maybe_decompress(true, &[0x01, 0x02, 0x03]),
            Err(ProtocolError::MissingZstdMagic)
        ));

        let mut truncated = zstd::encode_all(&[0u8; 4096][..], 0).unwrap();
        truncated.truncate(truncated.len() / 2);
        assert!(maybe_decompress(true, &truncated).is_err());
    }

    #[test]
    fn decompression_output_is_bounded() {
        // ~33 MiB of zeros compresses to almost nothing but must still be
        // rejected on inflation.
        let huge = vec![0u8; MAX_DECOMPRESSED_LEN + 1024];
        let compressed = zstd::encode_all(huge.as_slice(), 3).unwrap();
        assert!(compressed.len() < 64 * 1024);
        assert!(matches!(
            maybe_decompress(true, &compressed),
            Err(ProtocolError::DecompressTooLarge { .. })
        ));
    }
}
