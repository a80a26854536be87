// Frame reader for the Coze `text/event-stream` response.
//
// Framing:
//   event: conversation.message.delta\n
//   data: {"role":"assistant",...}\n
//   \n
//
// Rules:
// - `event:` sets the frame's event name (trimmed, last one wins).
// - `data:` appends its trimmed remainder; a frame may carry several.
// - Any other non-empty line (keep-alives, `:` comments, `id:`) is dropped.
// - Empty line is the frame boundary.
// - At end of stream a pending frame is flushed as if a blank line followed.
//   A transport error is not an end of stream: the unfinished frame is dropped.

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::types::Frame;

/// Boxed stream of frames, as handed to the dispatcher.
pub(crate) type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Parse a byte stream into frames.
pub(crate) fn parse_frame_stream<S, E>(byte_stream: S) -> FrameStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send + 'static,
    E: std::fmt::Display,
{
    Box::pin(FrameReader::new(byte_stream))
}

struct FrameReader<S> {
    inner: S,
    buffer: BytesMut,
    current: Frame,
    pending: VecDeque<Frame>,
    finished: bool,
}

impl<S> FrameReader<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            current: Frame::default(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            self.complete_frame();
            return;
        }

        if let Some(name) = line.strip_prefix("event:") {
            self.current.event_name = name.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            self.current.data_lines.push(data.trim().to_string());
        }
    }

    fn complete_frame(&mut self) {
        if !self.current.is_empty() {
            self.pending.push_back(std::mem::take(&mut self.current));
        }
    }

    /// Split complete lines off the buffer. Decoding waits for the newline so
    /// multi-byte characters split across chunks survive.
    fn process_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(newline_pos + 1);
            let text = String::from_utf8_lossy(&raw[..newline_pos]);
            let line = text.trim_end_matches('\r').to_string();
            self.process_line(&line);
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let raw = self.buffer.split();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches('\r').to_string();
            self.process_line(&line);
        }
        self.complete_frame();
    }

    fn next_pending(&mut self) -> Option<Frame> {
        self.pending.pop_front()
    }
}

impl<S, E> Stream for FrameReader<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if let Some(frame) = this.next_pending() {
            return Poll::Ready(Some(Ok(frame)));
        }
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.process_bytes(&bytes);
                    if let Some(frame) = this.next_pending() {
                        return Poll::Ready(Some(Ok(frame)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    this.current = Frame::default();
                    return Poll::Ready(Some(Err(anyhow::anyhow!("event stream error: {}", e))));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.flush();
                    return Poll::Ready(this.next_pending().map(Ok));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio_stream::StreamExt;

    fn chunks(items: Vec<&str>) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Unpin + Send + 'static {
        let owned: Vec<_> = items
            .into_iter()
            .map(|s| Ok(Bytes::from(s.to_string())))
            .collect();
        stream::iter(owned)
    }

    async fn collect_frames(items: Vec<&str>) -> Vec<Frame> {
        parse_frame_stream(chunks(items))
            .map(|f| f.unwrap())
            .collect()
            .await
    }

    fn frame(event: &str, data: &[&str]) -> Frame {
        Frame {
            event_name: event.to_string(),
            data_lines: data.iter().map(|s| s.to_string()).collect(),
        }
    }

    const SAMPLE: &str = "event: conversation.chat.created\n\
        data: {\"conversation_id\":\"abc123\"}\n\
        \n\
        : keep-alive\n\
        event:conversation.message.delta\n\
        data: {\"role\":\"assistant\",\n\
        data:  \"type\":\"answer\",\"content\":\"Xin chào\"}\n\
        \n\
        event: done\n\
        data: \"[DONE]\"\n\
        \n";

    #[tokio::test]
    async fn test_parse_simple_frame() {
        let frames = collect_frames(vec!["event: message\ndata: {\"text\":\"hello\"}\n\n"]).await;
        assert_eq!(frames, vec![frame("message", &["{\"text\":\"hello\"}"])]);
    }

    #[tokio::test]
    async fn test_multiline_data() {
        let frames = collect_frames(vec!["event: e\ndata: line1\ndata: line2\n\n"]).await;
        assert_eq!(frames[0].data_lines, vec!["line1", "line2"]);
        assert_eq!(frames[0].payload(), "line1\nline2");
    }

    #[tokio::test]
    async fn test_unknown_lines_ignored() {
        let frames =
            collect_frames(vec![": comment\nid: 7\nretry: 100\nevent: test\ndata: hi\n\n"]).await;
        assert_eq!(frames, vec![frame("test", &["hi"])]);
    }

    #[tokio::test]
    async fn test_crlf_line_endings() {
        let frames = collect_frames(vec!["event: test\r\ndata: hi\r\n\r\n"]).await;
        assert_eq!(frames, vec![frame("test", &["hi"])]);
    }

    #[tokio::test]
    async fn test_flush_at_end_of_stream() {
        let frames = collect_frames(vec!["event: a\ndata: 1\n\nevent: b\ndata: 2"]).await;
        assert_eq!(frames, vec![frame("a", &["1"]), frame("b", &["2"])]);
    }

    #[tokio::test]
    async fn test_consecutive_blank_lines_yield_no_empty_frames() {
        let frames = collect_frames(vec!["\n\nevent: a\ndata: 1\n\n\n\n"]).await;
        assert_eq!(frames, vec![frame("a", &["1"])]);
    }

    #[tokio::test]
    async fn test_chunked_delivery_matches_whole() {
        let whole = collect_frames(vec![SAMPLE]).await;
        assert_eq!(whole.len(), 3);

        // Every single split point, including inside the multi-byte "à".
        let bytes = SAMPLE.as_bytes();
        for split in 1..bytes.len() {
            let parts: Vec<std::result::Result<Bytes, Infallible>> = vec![
                Ok(Bytes::copy_from_slice(&bytes[..split])),
                Ok(Bytes::copy_from_slice(&bytes[split..])),
            ];
            let frames: Vec<Frame> = parse_frame_stream(stream::iter(parts))
                .map(|f| f.unwrap())
                .collect()
                .await;
            assert_eq!(frames, whole, "split at byte {split}");
        }
    }

    #[tokio::test]
    async fn test_line_by_line_delivery_matches_whole() {
        let whole = collect_frames(vec![SAMPLE]).await;
        let lines: Vec<&str> = SAMPLE.split_inclusive('\n').collect();
        assert_eq!(collect_frames(lines).await, whole);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let items: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"event: a\ndata: 1\n\n")),
            Err("connection reset".to_string()),
        ];
        let mut frames = parse_frame_stream(stream::iter(items));
        assert_eq!(frames.next().await.unwrap().unwrap(), frame("a", &["1"]));
        let err = frames.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_drops_unfinished_frame() {
        let items: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"event: a\ndata: 1\n")),
            Err("reset".to_string()),
        ];
        let mut frames = parse_frame_stream(stream::iter(items));
        assert!(frames.next().await.unwrap().is_err());
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_later_event_line_replaces_earlier() {
        let frames = collect_frames(vec!["event: first\nevent: second\ndata: x\n\n"]).await;
        assert_eq!(frames, vec![frame("second", &["x"])]);
    }

    #[tokio::test]
    async fn test_drop_releases_source() {
        struct Guard(Arc<AtomicBool>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let guard = Guard(released.clone());
        let source = stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(
            b"event: a\ndata: 1\n\n",
        ))])
        .chain(stream::pending())
        .map(move |item| {
            let _held = &guard;
            item
        });

        let mut frames = parse_frame_stream(source);
        assert_eq!(frames.next().await.unwrap().unwrap(), frame("a", &["1"]));
        assert!(!released.load(Ordering::SeqCst));
        drop(frames);
        assert!(released.load(Ordering::SeqCst));
    }
}
