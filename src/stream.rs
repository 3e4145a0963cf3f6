//! Line-oriented reader for `data: ` event streams.
//!
//! Bytes arrive in arbitrary chunks. [`Utf8Decoder`] carries partial code
//! points over to the next chunk, [`LineBuffer`] holds the unterminated tail
//! line, and [`EventReader`] turns complete lines into [`StreamEvent`]s.

use futures::{Stream, StreamExt};

use crate::error::{ChatError, ChatResult};
use crate::protocol::{DATA_PREFIX, StreamEvent};

/// Incremental UTF-8 decoder.
///
/// Invalid sequences decode to U+FFFD; an incomplete sequence at the end of a
/// chunk is kept until the next one.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8], out: &mut String) {
        let joined;
        let mut bytes: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(chunk);
            joined = std::mem::take(&mut self.pending);
            &joined
        };

        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[len..];
                        }
                        None => {
                            self.pending = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flushes a dangling partial sequence at end of input.
    pub fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            self.pending.clear();
            out.push(char::REPLACEMENT_CHARACTER);
        }
    }
}

/// Splits decoded text on `\n`, keeping the incomplete last line buffered.
#[derive(Debug, Default)]
pub struct LineBuffer {
    decoder: Utf8Decoder,
    buffer: String,
}

impl LineBuffer {
    pub fn push<F>(&mut self, chunk: &[u8], mut on_line: F)
    where
        F: FnMut(&str),
    {
        self.decoder.decode(chunk, &mut self.buffer);

        let Some(end) = self.buffer.rfind('\n') else {
            return;
        };
        for line in self.buffer[..end].split('\n') {
            on_line(trim_cr(line));
        }
        self.buffer.drain(..=end);
    }

    /// Emits whatever is left once the source is exhausted.
    pub fn finish<F>(&mut self, mut on_line: F)
    where
        F: FnMut(&str),
    {
        self.decoder.finish(&mut self.buffer);
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            on_line(trim_cr(&rest));
        }
    }
}

fn trim_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

/// Decodes one stream line. Non-data lines and unparseable payloads yield `None`.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let event = StreamEvent::from_payload(payload);
    if event.is_none() {
        tracing::debug!(payload, "discarding unparseable stream line");
    }
    event
}

#[derive(Debug, Default)]
pub struct EventReader {
    lines: LineBuffer,
}

impl EventReader {
    pub fn feed(&mut self, chunk: &[u8], events: &mut Vec<StreamEvent>) {
        self.lines.push(chunk, |line| events.extend(parse_line(line)));
    }

    pub fn finish(&mut self, events: &mut Vec<StreamEvent>) {
        self.lines.finish(|line| events.extend(parse_line(line)));
    }
}

/// Drives `stream` to exhaustion, handing each event to `on_event` in order.
///
/// An `error` event stops the loop and is returned as [`ChatError::Server`];
/// nothing after it is delivered.
pub async fn read_events<S, B, E, F>(stream: S, mut on_event: F) -> ChatResult<()>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ChatError>,
    F: FnMut(StreamEvent),
{
    let mut stream = std::pin::pin!(stream);
    let mut reader = EventReader::default();
    let mut events = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::<ChatError>::into)?;
        reader.feed(chunk.as_ref(), &mut events);
        dispatch(&mut events, &mut on_event)?;
    }

    reader.finish(&mut events);
    dispatch(&mut events, &mut on_event)
}

fn dispatch<F>(events: &mut Vec<StreamEvent>, on_event: &mut F) -> ChatResult<()>
where
    F: FnMut(StreamEvent),
{
    for event in events.drain(..) {
        if let StreamEvent::Error(message) = event {
            return Err(ChatError::Server(message));
        }
        on_event(event);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    const SAMPLE: &str = concat!(
        ": keep-alive\n\n",
        "data: {\"tool\":\"allabolag\"}\n\n",
        "data: {\"text\":\"Bolaget på Södermalm \"}\n\n",
        "event: ping\n",
        "data: {\"text\":\"växer 🚀 snabbt.\"}\n\n",
        "data: [DONE]\n\n",
    );

    fn read_chunks(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut reader = EventReader::default();
        let mut events = Vec::new();
        for chunk in chunks {
            reader.feed(chunk, &mut events);
        }
        reader.finish(&mut events);
        events
    }

    #[test]
    fn reads_events_from_single_chunk() {
        let events = read_chunks(&[SAMPLE.as_bytes()]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Tool("allabolag".to_string()),
                StreamEvent::Text("Bolaget på Södermalm ".to_string()),
                StreamEvent::Text("växer 🚀 snabbt.".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn any_two_way_split_gives_same_events() {
        let bytes = SAMPLE.as_bytes();
        let whole = read_chunks(&[bytes]);
        for at in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(at);
            assert_eq!(read_chunks(&[head, tail]), whole, "split at byte {}", at);
        }
    }

    #[test]
    fn byte_at_a_time_gives_same_events() {
        let bytes = SAMPLE.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(read_chunks(&chunks), read_chunks(&[bytes]));
    }

    #[test]
    fn malformed_line_does_not_disturb_later_events() {
        let events = read_chunks(&[b"data: {not json\ndata: {\"text\":\"ok\"}\n"]);
        assert_eq!(events, vec![StreamEvent::Text("ok".to_string())]);
    }

    #[test]
    fn crlf_lines_are_accepted() {
        let events = read_chunks(&[b"data: [DONE]\r\n\r\ndata: {\"text\":\"a\"}\r\n"]);
        assert_eq!(
            events,
            vec![StreamEvent::Done, StreamEvent::Text("a".to_string())]
        );
    }

    #[test]
    fn unterminated_tail_is_read_at_end_of_stream() {
        let events = read_chunks(&[b"data: {\"text\":\"sista\"}"]);
        assert_eq!(events, vec![StreamEvent::Text("sista".to_string())]);
    }

    #[test]
    fn decoder_holds_partial_code_points() {
        let mut decoder = Utf8Decoder::default();
        let mut out = String::new();
        let bytes = "ö".as_bytes();
        decoder.decode(&bytes[..1], &mut out);
        assert_eq!(out, "");
        decoder.decode(&bytes[1..], &mut out);
        assert_eq!(out, "ö");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        let mut out = String::new();
        decoder.decode(b"a\xffb", &mut out);
        decoder.decode(&"é".as_bytes()[..1], &mut out);
        decoder.finish(&mut out);
        assert_eq!(out, "a\u{FFFD}b\u{FFFD}");
    }

    #[tokio::test]
    async fn read_events_stops_at_error_event() {
        let chunks = vec![
            Ok::<_, ChatError>(b"data: {\"text\":\"del\"}\n".to_vec()),
            Ok(b"data: {\"error\":\"rate_limited\"}\ndata: {\"text\":\"aldrig\"}\n".to_vec()),
        ];

        let mut seen = Vec::new();
        let result = read_events(stream::iter(chunks), |event| seen.push(event)).await;

        assert!(matches!(result, Err(ChatError::Server(ref m)) if m == "rate_limited"));
        assert_eq!(seen, vec![StreamEvent::Text("del".to_string())]);
    }

    #[tokio::test]
    async fn read_events_propagates_chunk_errors() {
        let chunks = vec![
            Ok(b"data: {\"text\":\"a\"}\n".to_vec()),
            Err(ChatError::Server("connection reset".to_string())),
        ];

        let mut seen = Vec::new();
        let result = read_events(stream::iter(chunks), |event| seen.push(event)).await;

        assert!(result.is_err());
        assert_eq!(seen, vec![StreamEvent::Text("a".to_string())]);
    }
}
