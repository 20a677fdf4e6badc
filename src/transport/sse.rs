//! Server-sent-event framing for streamed synthesis responses.

use crate::BoxStream;
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;

const DELIMITER: &str = "\n\n";
const DONE_SIGNAL: &str = "[DONE]";

/// Decode an SSE byte stream into one JSON value per `data:` frame.
///
/// - frames are split on a blank line (`\r\n` is normalized first)
/// - `event:`/`id:` lines and `:` comments are ignored
/// - non-JSON frames are skipped; `[DONE]` ends the stream
pub fn decode_sse(input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
    let stream = stream::unfold((input, String::new()), |(mut input, mut buf)| async move {
        loop {
            if let Some(idx) = buf.find(DELIMITER) {
                let frame = buf[..idx].to_string();
                buf = buf[idx + DELIMITER.len()..].to_string();

                match parse_frame(&frame) {
                    Frame::Done => return None,
                    Frame::Data(v) => return Some((Ok(v), (input, buf))),
                    Frame::Skip => continue,
                }
            }

            match input.next().await {
                Some(Ok(bytes)) => {
                    buf.push_str(&String::from_utf8_lossy(&bytes).replace("\r\n", "\n"));
                }
                Some(Err(e)) => return Some((Err(e), (input, buf))),
                None => {
                    // EOF: the last frame may lack its trailing blank line
                    return match parse_frame(&buf) {
                        Frame::Data(v) => Some((Ok(v), (input, String::new()))),
                        _ => None,
                    };
                }
            }
        }
    });

    Box::pin(stream)
}

enum Frame {
    Data(Value),
    Done,
    Skip,
}

fn parse_frame(frame: &str) -> Frame {
    let mut data = String::new();
    for line in frame.lines() {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        }
    }

    let data = data.trim();
    if data.is_empty() {
        return Frame::Skip;
    }
    if data == DONE_SIGNAL {
        return Frame::Done;
    }
    match serde_json::from_str(data) {
        Ok(v) => Frame::Data(v),
        Err(_) => Frame::Skip,
    }
}
