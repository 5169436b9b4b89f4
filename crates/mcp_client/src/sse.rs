use serde_json::Value;
use tracing::debug;

use crate::events::ServerEvent;

/// Incremental parser for SSE text streams.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ServerEvent> {
        let chunk = String::from_utf8_lossy(bytes);
        self.buffer.extend(chunk.chars().filter(|ch| *ch != '\r'));
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            let (event_name, payload) = split_frame(&frame);
            let Some(payload) = payload else {
                continue;
            };
            if payload.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(&payload) {
                Ok(value) => {
                    if let Some(event) = ServerEvent::from_value(value, event_name.as_deref()) {
                        events.push(event);
                    }
                }
                Err(error) => debug!(%error, "skipping non-JSON event payload"),
            }
        }

        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<ServerEvent> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

fn split_frame(frame: &str) -> (Option<String>, Option<String>) {
    let mut event_name = None;
    let mut data_lines = Vec::new();

    for line in frame.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event_name = Some(name.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        }
    }

    let payload = if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    };
    (event_name, payload)
}
