//! Raw DEFLATE decoding into a preallocated buffer

use flate2::{Decompress, FlushDecompress, Status};
use log::*;

/// Decompresses a raw DEFLATE stream (no zlib or gzip wrapper).
///
/// The output buffer is sized to `max(expected_size, 4 * compressed.len())`,
/// leaving room in case the header's size hint is wrong or zero,
/// but never more than `limit` bytes.
/// A stream that doesn't finish within that buffer is treated as corrupt.
///
/// Returns `None` if the stream can't be decoded or decodes to nothing;
/// callers decide whether an unreadable file is fatal.
pub fn inflate(compressed: &[u8], expected_size: usize, limit: usize) -> Option<Vec<u8>> {
    let capacity = expected_size
        .max(compressed.len().saturating_mul(4))
        .min(limit);
    let mut decompressed = Vec::with_capacity(capacity);
    let mut decoder = Decompress::new(false);

    match decoder.decompress_vec(compressed, &mut decompressed, FlushDecompress::Finish) {
        Ok(Status::StreamEnd) => {}
        Ok(status) => {
            debug!(
                "DEFLATE stream unfinished after {} bytes ({:?})",
                decompressed.len(),
                status
            );
            return None;
        }
        Err(e) => {
            debug!("Corrupt DEFLATE stream: {}", e);
            return None;
        }
    }

    if decompressed.is_empty() || decompressed.len() > limit {
        return None;
    }
    Some(decompressed)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Write;

    use flate2::write::DeflateEncoder;
    use flate2::Compression;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn inflates_with_exact_hint() {
        let text = b"hello hello hello hello hello hello".repeat(20);
        let compressed = deflate(&text);
        assert_eq!(inflate(&compressed, text.len(), usize::MAX), Some(text));
    }

    #[test]
    fn inflates_with_missing_hint() {
        // Barely compressible, so 4x the input is plenty.
        let mut state = 0x2545_F491u32;
        let text: Vec<u8> = (0..200)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect();
        let compressed = deflate(&text);
        assert_eq!(inflate(&compressed, 0, usize::MAX), Some(text));
    }

    #[test]
    fn under_allocation_fails() {
        // Very compressible: 4x the input isn't enough without a hint.
        let zeros = vec![0u8; 100_000];
        let compressed = deflate(&zeros);
        assert_eq!(inflate(&compressed, 0, usize::MAX), None);
        // And the limit wins over the hint.
        assert_eq!(inflate(&compressed, zeros.len(), 1000), None);
        assert_eq!(inflate(&compressed, zeros.len(), usize::MAX), Some(zeros));
    }

    #[test]
    fn garbage_and_empty() {
        assert_eq!(inflate(&[0xFF, 0xFF, 0xFF, 0xFF], 10, usize::MAX), None);
        assert_eq!(inflate(&deflate(b""), 0, usize::MAX), None);
    }
}
