use bytes::{BufMut, Bytes, BytesMut};

use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Renders the status line, headers in insertion order, a blank line, then
/// the body. A JSON body wins over the text body. No framing headers are
/// added.
pub fn serialize_response(resp: &Response) -> Bytes {
    let json = resp.json_body.as_ref().map(|json| json.to_string());
    let body = json.as_deref().or(resp.body.as_deref()).unwrap_or_default();

    let mut buf = BytesMut::with_capacity(128 + body.len());

    // Status line
    buf.put_slice(
        format!(
            "{} {} {}\r\n",
            HTTP_VERSION, resp.status_code, resp.status_message
        )
        .as_bytes(),
    );

    for (k, v) in &resp.headers {
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.put_slice(body.as_bytes());

    buf.freeze()
}

/// Tracks how much of a serialized response has reached the peer.
#[derive(Debug)]
pub struct ResponseWriter {
    buffer: Bytes,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response),
            written: 0,
        }
    }

    pub fn remaining(&self) -> &[u8] {
        &self.buffer[self.written..]
    }

    pub fn advance(&mut self, n: usize) {
        self.written = (self.written + n).min(self.buffer.len());
    }

    pub fn is_done(&self) -> bool {
        self.written == self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_wins_over_text() {
        let mut res = Response::new();
        res.body = Some("text".to_string());
        res.json_body = Some(serde_json::json!({"a": 1}));

        let out = serialize_response(&res);
        assert!(out.ends_with(b"\r\n\r\n{\"a\":1}"));
    }

    #[test]
    fn writer_tracks_progress() {
        let mut writer = ResponseWriter::new(&Response::new());
        let total = writer.len();

        writer.advance(5);
        assert_eq!(writer.remaining().len(), total - 5);
        assert!(!writer.is_done());

        writer.advance(total);
        assert!(writer.is_done());
        assert!(writer.remaining().is_empty());
    }
}
