//! MJPEG byte-stream segmentation.
//!
//! The capture process writes concatenated JPEG images to stdout with no
//! framing. `RawByteStream` accumulates whatever bytes have arrived and cuts
//! out complete `SOI .. EOI` segments; the segments are decoded into frames
//! outside the capture lock.

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on undecoded bytes held between passes.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

/// Undecoded bytes from the active capture process.
#[derive(Debug)]
pub struct RawByteStream {
    bytes: Vec<u8>,
    max_pending: usize,
    discarded: u64,
}

impl RawByteStream {
    pub fn new(max_pending: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(64 * 1024),
            max_pending: max_pending.max(JPEG_SOI.len()),
            discarded: 0,
        }
    }

    /// Append newly read bytes.
    ///
    /// If the accumulator outgrows its bound without yielding a segment, the
    /// backlog is dropped. The final byte is kept since it may be the first
    /// half of a marker split across reads.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.max_pending {
            let drain_len = self.bytes.len() - 1;
            self.bytes.drain(..drain_len);
            self.discarded += drain_len as u64;
            log::debug!(
                "raw byte stream exceeded {} bytes without a complete frame; dropped {} bytes",
                self.max_pending,
                drain_len
            );
        }
    }

    /// Cut out the next complete JPEG segment, markers included.
    ///
    /// Everything up to and including the end marker is consumed. When a start
    /// marker has no matching end marker yet, nothing is consumed.
    pub fn next_segment(&mut self) -> Option<Vec<u8>> {
        let start = find_marker(&self.bytes, &JPEG_SOI, 0)?;
        let eoi = find_marker(&self.bytes, &JPEG_EOI, start + JPEG_SOI.len())?;
        let end = eoi + JPEG_EOI.len();
        let segment = self.bytes[start..end].to_vec();
        self.bytes.drain(..end);
        Some(segment)
    }

    /// Cut out every complete segment currently buffered, oldest first.
    pub fn drain_segments(&mut self) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| self.next_segment()).collect()
    }

    /// Forget all pending bytes. Called whenever the capture process is replaced.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes dropped by the overflow bound since creation.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Default for RawByteStream {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_BYTES)
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(body: &[u8]) -> Vec<u8> {
        let mut bytes = JPEG_SOI.to_vec();
        bytes.extend_from_slice(body);
        bytes.extend_from_slice(&JPEG_EOI);
        bytes
    }

    #[test]
    fn extracts_segment_split_across_reads() {
        let jpeg = fake_jpeg(b"payload-bytes");
        let (head, tail) = jpeg.split_at(6);

        let mut stream = RawByteStream::default();
        stream.extend(b"garbage");
        stream.extend(head);
        assert!(stream.next_segment().is_none());
        assert_eq!(stream.len(), 7 + head.len());

        stream.extend(tail);
        stream.extend(b"trailer");
        assert_eq!(stream.next_segment().unwrap(), jpeg);
        assert_eq!(stream.as_bytes(), b"trailer");
        assert!(stream.next_segment().is_none());
    }

    #[test]
    fn marker_split_between_reads_is_found() {
        let jpeg = fake_jpeg(b"abc");
        let mut stream = RawByteStream::default();
        stream.extend(&jpeg[..jpeg.len() - 1]);
        assert!(stream.next_segment().is_none());
        stream.extend(&jpeg[jpeg.len() - 1..]);
        assert_eq!(stream.next_segment().unwrap(), jpeg);
        assert!(stream.is_empty());
    }

    #[test]
    fn end_marker_before_start_marker_is_ignored() {
        let jpeg = fake_jpeg(b"xyz");
        let mut stream = RawByteStream::default();
        stream.extend(&JPEG_EOI);
        stream.extend(&jpeg);
        assert_eq!(stream.next_segment().unwrap(), jpeg);
        assert!(stream.is_empty());
    }

    #[test]
    fn drains_every_complete_segment() {
        let first = fake_jpeg(b"one");
        let second = fake_jpeg(b"two");
        let mut stream = RawByteStream::default();
        stream.extend(&first);
        stream.extend(&second);
        stream.extend(&JPEG_SOI);

        assert_eq!(stream.drain_segments(), vec![first, second]);
        assert_eq!(stream.as_bytes(), &JPEG_SOI);
    }

    #[test]
    fn bounds_pending_bytes() {
        let mut stream = RawByteStream::new(16);
        stream.extend(&[0xAA; 15]);
        assert_eq!(stream.len(), 15);
        stream.extend(&[0xAA, 0xAA, 0xFF]);
        assert_eq!(stream.as_bytes(), &[0xFF]);
        assert_eq!(stream.discarded(), 17);
    }
}
