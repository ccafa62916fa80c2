//! Framing and chunked transfer
//!
//! Every message is a 4-byte little-endian length followed by that many
//! payload bytes. Payloads are written and read in fixed-size chunks so a
//! large image never needs more than one frame buffer, and so progress can
//! be reported while it moves.

use crate::clipboard::{ClipboardContent, ContentKind};
use crate::transport::protocol::{decode_payload, encode_payload};
use crate::transport::{Result, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Default chunk size for streaming (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Size of the length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Which way a transfer is going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We are sending
    Outbound,
    /// We are receiving
    Inbound,
}

/// Image transfer progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Transfer direction
    pub direction: Direction,

    /// Payload bytes moved so far
    pub bytes_transferred: u64,

    /// Payload size of the frame
    pub total_bytes: u64,
}

impl ProgressUpdate {
    fn new(direction: Direction, bytes_transferred: usize, total_bytes: usize) -> Self {
        Self {
            direction,
            bytes_transferred: bytes_transferred as u64,
            total_bytes: total_bytes as u64,
        }
    }

    /// Completion percentage, 0-100
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        (self.bytes_transferred.saturating_mul(100) / self.total_bytes).min(100) as u8
    }

    /// Whether the whole payload has moved
    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.total_bytes
    }
}

/// Writes framed clipboard content to a stream.
///
/// Holds the write half exclusively; callers serialize access so chunks of
/// two frames never interleave.
pub struct FrameWriter<W> {
    inner: W,
    chunk_size: usize,
    max_frame_size: usize,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a writer with the given chunk size and frame limit
    pub fn new(inner: W, chunk_size: usize, max_frame_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
            max_frame_size,
        }
    }

    /// Encode `content` and write it as one frame.
    ///
    /// For image content `on_progress` is called after every chunk. Returns
    /// the payload size.
    pub async fn write_content<F>(
        &mut self,
        content: &ClipboardContent,
        mut on_progress: F,
    ) -> Result<usize>
    where
        F: FnMut(ProgressUpdate),
    {
        let payload = encode_payload(content)?;
        let total = payload.len();
        if total > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: total as u64,
                max: self.max_frame_size,
            });
        }
        let length = u32::try_from(total).map_err(|_| TransportError::FrameTooLarge {
            size: total as u64,
            max: u32::MAX as usize,
        })?;

        self.inner.write_all(&length.to_le_bytes()).await?;

        let report = content.is_image();
        let mut sent = 0;
        for chunk in payload.chunks(self.chunk_size) {
            self.inner.write_all(chunk).await?;
            sent += chunk.len();
            if report {
                on_progress(ProgressUpdate::new(Direction::Outbound, sent, total));
            }
        }
        self.inner.flush().await?;

        debug!("Wrote {} frame of {} bytes", content.kind(), total);
        Ok(total)
    }

    /// Flush and close the write side
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Reads framed clipboard content from a stream
pub struct FrameReader<R> {
    inner: R,
    chunk_size: usize,
    max_frame_size: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a reader with the given chunk size and frame limit
    pub fn new(inner: R, chunk_size: usize, max_frame_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
            max_frame_size,
        }
    }

    /// Read the next frame and decode it.
    ///
    /// Errors split into two groups, see [`TransportError::is_session_fatal`]:
    /// a zero-length, malformed or empty frame is a protocol error after which
    /// the stream is still aligned on a frame boundary; a closed or failing
    /// stream, or an oversized frame, is fatal. A frame cut short never
    /// yields partial content.
    pub async fn read_content<F>(&mut self, mut on_progress: F) -> Result<ClipboardContent>
    where
        F: FnMut(ProgressUpdate),
    {
        let length = self.read_length().await?;
        if length == 0 {
            return Err(TransportError::protocol("zero-length frame"));
        }
        let total = length as usize;
        if total > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: u64::from(length),
                max: self.max_frame_size,
            });
        }

        let mut payload = vec![0u8; total];
        let mut received = 0;
        let mut is_image = false;
        while received < total {
            let want = self.chunk_size.min(total - received);
            let n = self
                .inner
                .read(&mut payload[received..received + want])
                .await?;
            if n == 0 {
                debug!("Stream closed after {} of {} payload bytes", received, total);
                return Err(TransportError::ConnectionClosed);
            }
            if received == 0 {
                is_image = payload[0] == ContentKind::Image as u8;
            }
            received += n;
            if is_image {
                on_progress(ProgressUpdate::new(Direction::Inbound, received, total));
            }
        }

        debug!("Read frame of {} bytes", total);
        decode_payload(&payload)
    }

    async fn read_length(&mut self) -> Result<u32> {
        let mut header = [0u8; LENGTH_PREFIX_LEN];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_LEN {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Err(TransportError::ConnectionClosed);
                }
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed inside a frame header",
                )));
            }
            filled += n;
        }
        Ok(u32::from_le_bytes(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::duplex;

    const MAX: usize = crate::MAX_FRAME_SIZE;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(payload);
        frame
    }

    #[tokio::test]
    async fn test_round_trip_all_variants() {
        let (a, b) = duplex(4096);
        let mut writer = FrameWriter::new(a, DEFAULT_CHUNK_SIZE, MAX);
        let mut reader = FrameReader::new(b, DEFAULT_CHUNK_SIZE, MAX);

        let samples = vec![
            ClipboardContent::text("hello"),
            ClipboardContent::image(vec![7u8; 10_000]),
            ClipboardContent::file_list(["C:\\docs\\a.txt", "C:\\docs\\b.txt"]),
        ];
        let expected = samples.clone();

        let send = tokio::spawn(async move {
            for content in &samples {
                writer.write_content(content, |_| {}).await.unwrap();
            }
        });

        for content in expected {
            let received = reader.read_content(|_| {}).await.unwrap();
            assert_eq!(received.identity_hash(), content.identity_hash());
        }
        send.await.unwrap();
    }

    #[tokio::test]
    async fn test_large_image_is_chunked_with_progress() {
        let image: Vec<u8> = (0..300 * 1024).map(|i| (i % 251) as u8).collect();
        let content = ClipboardContent::image(image.clone());

        let (a, b) = duplex(DEFAULT_CHUNK_SIZE);
        let mut writer = FrameWriter::new(a, DEFAULT_CHUNK_SIZE, MAX);
        let mut reader = FrameReader::new(b, DEFAULT_CHUNK_SIZE, MAX);

        let send = tokio::spawn(async move {
            let mut outbound = Vec::new();
            let total = writer
                .write_content(&content, |p| outbound.push(p))
                .await
                .unwrap();
            (total, outbound)
        });

        let mut inbound = Vec::new();
        let received = reader.read_content(|p| inbound.push(p)).await.unwrap();
        let (total, outbound) = send.await.unwrap();

        match received {
            ClipboardContent::Image { bytes } => assert!(&bytes[..] == image.as_slice()),
            other => panic!("expected image, got {:?}", other),
        }

        for updates in [&outbound, &inbound] {
            assert!(updates.len() > 1);
            assert!(updates
                .windows(2)
                .all(|w| w[0].bytes_transferred <= w[1].bytes_transferred));
            let last = updates.last().unwrap();
            assert_eq!(last.bytes_transferred, total as u64);
            assert_eq!(last.total_bytes, total as u64);
            assert!(last.is_complete());
        }
        assert_eq!(outbound.len(), total.div_ceil(DEFAULT_CHUNK_SIZE));
        assert!(outbound
            .iter()
            .all(|p| p.bytes_transferred as usize % DEFAULT_CHUNK_SIZE == 0
                || p.bytes_transferred as usize == total));
    }

    #[tokio::test]
    async fn test_text_reports_no_progress() {
        let (a, b) = duplex(1024);
        let mut writer = FrameWriter::new(a, 8, MAX);
        let mut reader = FrameReader::new(b, 8, MAX);

        let mut outbound = 0;
        writer
            .write_content(&ClipboardContent::text("a somewhat longer text"), |_| outbound += 1)
            .await
            .unwrap();
        let mut inbound = 0;
        reader.read_content(|_| inbound += 1).await.unwrap();

        assert_eq!((outbound, inbound), (0, 0));
    }

    #[tokio::test]
    async fn test_partial_reads_are_reassembled() {
        let payload = encode_payload(&ClipboardContent::text("split across many reads")).unwrap();
        let frame = framed(&payload);

        let mut builder = tokio_test::io::Builder::new();
        builder.read(&frame[..2]).read(&frame[2..4]);
        for piece in frame[4..].chunks(3) {
            builder.read(piece);
        }
        let mut reader = FrameReader::new(builder.build(), DEFAULT_CHUNK_SIZE, MAX);

        let content = reader.read_content(|_| {}).await.unwrap();
        assert_eq!(content, ClipboardContent::text("split across many reads"));
    }

    #[tokio::test]
    async fn test_zero_length_frame_is_dropped_and_stream_stays_usable() {
        let payload = encode_payload(&ClipboardContent::text("after")).unwrap();
        let mut bytes = 0u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&framed(&payload));

        let mut reader = FrameReader::new(bytes.as_slice(), DEFAULT_CHUNK_SIZE, MAX);

        let err = reader.read_content(|_| {}).await.unwrap_err();
        assert!(!err.is_session_fatal());
        assert_eq!(
            reader.read_content(|_| {}).await.unwrap(),
            ClipboardContent::text("after")
        );
    }

    #[tokio::test]
    async fn test_close_after_prefix_is_fatal() {
        let mut bytes = 100u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[1, b'{']);

        let mut reader = FrameReader::new(bytes.as_slice(), DEFAULT_CHUNK_SIZE, MAX);
        let err = reader.read_content(|_| {}).await.unwrap_err();

        assert!(matches!(err, TransportError::ConnectionClosed));
        assert!(err.is_session_fatal());
    }

    #[tokio::test]
    async fn test_clean_eof_and_truncated_header() {
        let mut reader = FrameReader::new(&[][..], DEFAULT_CHUNK_SIZE, MAX);
        assert!(matches!(
            reader.read_content(|_| {}).await,
            Err(TransportError::ConnectionClosed)
        ));

        let mut reader = FrameReader::new(&[5u8, 0][..], DEFAULT_CHUNK_SIZE, MAX);
        assert!(matches!(
            reader.read_content(|_| {}).await,
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frames_are_refused_both_ways() {
        let bytes = 2048u32.to_le_bytes();
        let mut reader = FrameReader::new(&bytes[..], DEFAULT_CHUNK_SIZE, 1024);
        assert!(matches!(
            reader.read_content(|_| {}).await,
            Err(TransportError::FrameTooLarge { size: 2048, max: 1024 })
        ));

        let mut sink = Vec::new();
        let mut writer = FrameWriter::new(&mut sink, DEFAULT_CHUNK_SIZE, 1024);
        let result = writer
            .write_content(&ClipboardContent::image(vec![0; 4096]), |_| {})
            .await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_progress_percent() {
        let p = ProgressUpdate::new(Direction::Inbound, 50, 200);
        assert_eq!(p.percent(), 25);
        assert!(!p.is_complete());
        assert_eq!(ProgressUpdate::new(Direction::Outbound, 200, 200).percent(), 100);
    }
}
