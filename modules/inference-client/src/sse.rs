/// Incremental server-sent-events line framing over raw response bytes.
///
/// Chunk boundaries from the network do not align with event boundaries, so
/// bytes accumulate in an internal buffer and complete `data:` payloads are
/// drained as they become available.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk; returns the `data:` payloads of every event
    /// completed by this chunk, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                // [DONE] terminators and empty keep-alives carry no payload
                if !data.is_empty() && data != "[DONE]" {
                    out.push(data.to_string());
                }
            }
            // "event:" lines and comments are redundant with the tagged
            // payload type; ignored.
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_event_in_one_chunk() {
        let mut sse = SseBuffer::new();
        let out = sse.push("event: content_block_delta\ndata: {\"a\":1}\n\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut sse = SseBuffer::new();
        assert!(sse.push("data: {\"te").is_empty());
        let out = sse.push("xt\":\"hi\"}\n");
        assert_eq!(out, vec!["{\"text\":\"hi\"}".to_string()]);
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut sse = SseBuffer::new();
        let out = sse.push("data: 1\n\ndata: 2\n\n");
        assert_eq!(out, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn done_marker_and_comments_skipped() {
        let mut sse = SseBuffer::new();
        let out = sse.push(": keep-alive\ndata: [DONE]\ndata: real\n");
        assert_eq!(out, vec!["real".to_string()]);
    }

    #[test]
    fn crlf_line_endings() {
        let mut sse = SseBuffer::new();
        let out = sse.push("data: {\"x\":2}\r\n\r\n");
        assert_eq!(out, vec!["{\"x\":2}".to_string()]);
    }
}
