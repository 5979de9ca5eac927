//! Latest-frame buffer shared between the capture loop and stream clients.
//!
//! Holds exactly one frame (no history). The single writer replaces the frame
//! wholesale and wakes every waiter; each reader tracks the sequence number of
//! the last frame it was handed, so it never sees an older frame after a newer
//! one and never receives the same frame twice.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::watch;

/// One encoded frame plus its freshness token.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Wire-ready (JPEG) image bytes
    pub data: Bytes,
    /// Monotonic sequence number, starting at 1
    pub seq: u64,
}

/// Single most-recent-frame holder with wait-for-update semantics.
///
/// Cloning is cheap; all clones share the same underlying slot. Readers are
/// created with [`FrameBuffer::reader`] and are independent of each other.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    tx: watch::Sender<Option<Frame>>,
}

impl FrameBuffer {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Replace the stored frame and wake every waiting reader.
    pub fn write(&self, data: Bytes) {
        self.tx.send_modify(|slot| {
            let seq = slot.as_ref().map_or(0, |f| f.seq) + 1;
            *slot = Some(Frame { data, seq });
        });
    }

    /// Sequence number of the most recently written frame (0 before any write).
    #[must_use]
    pub fn latest_seq(&self) -> u64 {
        self.tx.borrow().as_ref().map_or(0, |f| f.seq)
    }

    /// Create an independent reader. New readers start at sequence zero, so
    /// they immediately observe the latest frame if one was already written.
    #[must_use]
    pub fn reader(&self) -> FrameReader {
        FrameReader {
            rx: self.tx.subscribe(),
            last_seq: 0,
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-client cursor into a [`FrameBuffer`].
#[derive(Debug)]
pub struct FrameReader {
    rx: watch::Receiver<Option<Frame>>,
    last_seq: u64,
}

impl FrameReader {
    /// Wait until a frame newer than the last one delivered to this reader is
    /// available, or until `timeout` elapses.
    ///
    /// Returns `Some(frame)` for a new frame, `None` on timeout. Returns
    /// `None` permanently once the writer side is gone.
    pub async fn next_frame(&mut self, timeout: Duration) -> Option<Frame> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(frame) = self.rx.borrow().as_ref() {
                if frame.seq > self.last_seq {
                    self.last_seq = frame.seq;
                    return Some(frame.clone());
                }
            }

            match tokio::time::timeout_at(deadline, self.rx.changed()).await {
                Ok(Ok(())) => {}
                // Writer dropped or deadline hit
                Ok(Err(_)) | Err(_) => return None,
            }
        }
    }

    /// Sequence number of the last frame delivered to this reader.
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Whether the writer side of the buffer still exists. A reader that timed
    /// out can use this to tell an idle capture loop from a torn-down one.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.rx.has_changed().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_times_out_without_frames() {
        let buffer = FrameBuffer::new();
        let mut reader = buffer.reader();
        assert!(reader
            .next_frame(Duration::from_millis(10))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_reader_sees_frame_written_before_subscribe() {
        let buffer = FrameBuffer::new();
        buffer.write(Bytes::from_static(b"early"));

        let mut reader = buffer.reader();
        let frame = reader.next_frame(Duration::from_millis(10)).await;
        assert_eq!(frame.map(|f| f.data), Some(Bytes::from_static(b"early")));
    }

    #[tokio::test]
    async fn test_reader_never_repeats_a_frame() {
        let buffer = FrameBuffer::new();
        buffer.write(Bytes::from_static(b"one"));

        let mut reader = buffer.reader();
        assert!(reader.next_frame(Duration::from_millis(10)).await.is_some());
        // Same frame again: only a newer seq may be delivered
        assert!(reader.next_frame(Duration::from_millis(10)).await.is_none());

        buffer.write(Bytes::from_static(b"two"));
        let frame = reader.next_frame(Duration::from_millis(10)).await;
        assert_eq!(frame.map(|f| f.seq), Some(2));
    }

    #[tokio::test]
    async fn test_freshness_is_monotonic_per_reader() {
        let buffer = FrameBuffer::new();
        let mut reader = buffer.reader();

        for i in 0..5u8 {
            buffer.write(Bytes::copy_from_slice(&[i]));
        }
        // Intermediate frames were replaced; only the latest is observable
        let frame = reader.next_frame(Duration::from_millis(10)).await;
        assert_eq!(frame.as_ref().map(|f| f.seq), Some(5));

        buffer.write(Bytes::from_static(b"later"));
        let next = reader.next_frame(Duration::from_millis(10)).await;
        assert!(next.map_or(false, |f| f.seq > 5));
    }

    #[tokio::test]
    async fn test_concurrent_readers_are_independent() {
        let buffer = FrameBuffer::new();
        let mut handles = Vec::new();

        for _ in 0..4 {
            let mut reader = buffer.reader();
            handles.push(tokio::spawn(async move {
                reader.next_frame(Duration::from_secs(1)).await
            }));
        }

        // One reader drops out early; the rest still get the frame
        let dropped = buffer.reader();
        drop(dropped);

        buffer.write(Bytes::from_static(b"fanout"));

        for handle in handles {
            let frame = handle.await.expect("reader task panicked");
            assert_eq!(frame.map(|f| f.data), Some(Bytes::from_static(b"fanout")));
        }
    }

    #[tokio::test]
    async fn test_is_live_tracks_writer_lifetime() {
        let buffer = FrameBuffer::new();
        let reader = buffer.reader();
        assert!(reader.is_live());
        drop(buffer);
        assert!(!reader.is_live());
    }

    #[tokio::test]
    async fn test_writer_drop_ends_waiting() {
        let buffer = FrameBuffer::new();
        let mut reader = buffer.reader();
        drop(buffer);
        assert!(reader.next_frame(Duration::from_secs(1)).await.is_none());
    }
}
