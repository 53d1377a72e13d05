use bytes::{Bytes, BytesMut};

/// One server-sent event, with the original wire bytes retained.
///
/// The streaming pipeline observes events but forwards the exact bytes the provider sent
/// (passthrough-parsing); `raw` is what goes back out when an event is replayed.
#[derive(Debug, Clone)]
pub struct SseFrame {
	pub raw: Bytes,
	pub event: Option<String>,
	pub data: String,
}

/// Incremental SSE parser. Push chunks in as they arrive; complete frames come out.
#[derive(Default)]
pub struct SseParser {
	buffer: BytesMut,
}

impl SseParser {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
		self.buffer.extend_from_slice(chunk);
		let mut frames = Vec::new();
		while let Some(end) = find_frame_end(&self.buffer) {
			let raw = self.buffer.split_to(end).freeze();
			if let Some(frame) = parse_frame(raw) {
				frames.push(frame);
			}
		}
		frames
	}
}

/// Find the end (inclusive of the blank-line delimiter) of the first complete frame.
fn find_frame_end(buf: &[u8]) -> Option<usize> {
	let mut i = 0;
	while i + 1 < buf.len() {
		if buf[i] == b'\n' {
			if buf[i + 1] == b'\n' {
				return Some(i + 2);
			}
			if i + 2 < buf.len() && buf[i + 1] == b'\r' && buf[i + 2] == b'\n' {
				return Some(i + 3);
			}
		}
		i += 1;
	}
	None
}

fn parse_frame(raw: Bytes) -> Option<SseFrame> {
	let text = std::str::from_utf8(&raw).ok()?;
	let mut event = None;
	let mut data_lines: Vec<&str> = Vec::new();
	for line in text.lines() {
		if let Some(v) = line.strip_prefix("event:") {
			event = Some(v.trim_start().to_string());
		} else if let Some(v) = line.strip_prefix("data:") {
			data_lines.push(v.strip_prefix(' ').unwrap_or(v));
		}
		// id/retry/comment lines are retained in `raw` but not interpreted
	}
	if event.is_none() && data_lines.is_empty() {
		return None;
	}
	let data = data_lines.join("\n");
	Some(SseFrame { raw, event, data })
}

pub fn data_frame(json: &[u8]) -> Bytes {
	let mut out = Vec::with_capacity(json.len() + 8);
	out.extend_from_slice(b"data: ");
	out.extend_from_slice(json);
	out.extend_from_slice(b"\n\n");
	Bytes::from(out)
}

pub fn event_frame(event: &str, json: &[u8]) -> Bytes {
	let mut out = Vec::with_capacity(event.len() + json.len() + 16);
	out.extend_from_slice(b"event: ");
	out.extend_from_slice(event.as_bytes());
	out.extend_from_slice(b"\ndata: ");
	out.extend_from_slice(json);
	out.extend_from_slice(b"\n\n");
	Bytes::from(out)
}

pub fn done_frame() -> Bytes {
	Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_split_frames() {
		let mut p = SseParser::new();
		assert!(p.push(b"data: {\"a\"").is_empty());
		let frames = p.push(b":1}\n\ndata: [DONE]\n\n");
		assert_eq!(frames.len(), 2);
		assert_eq!(frames[0].data, "{\"a\":1}");
		assert_eq!(frames[0].raw.as_ref(), b"data: {\"a\":1}\n\n");
		assert_eq!(frames[1].data, "[DONE]");
	}

	#[test]
	fn parses_named_events() {
		let mut p = SseParser::new();
		let frames = p.push(b"event: message_start\ndata: {}\n\n");
		assert_eq!(frames.len(), 1);
		assert_eq!(frames[0].event.as_deref(), Some("message_start"));
		assert_eq!(frames[0].data, "{}");
	}

	#[test]
	fn multi_line_data_joined() {
		let mut p = SseParser::new();
		let frames = p.push(b"data: a\ndata: b\n\n");
		assert_eq!(frames[0].data, "a\nb");
	}

	#[test]
	fn crlf_delimiters() {
		let mut p = SseParser::new();
		let frames = p.push(b"data: x\n\r\n");
		assert_eq!(frames.len(), 1);
		assert_eq!(frames[0].data, "x");
	}

	#[test]
	fn frame_builders() {
		assert_eq!(data_frame(b"{}").as_ref(), b"data: {}\n\n");
		assert_eq!(
			event_frame("ping", b"{}").as_ref(),
			b"event: ping\ndata: {}\n\n"
		);
		assert_eq!(done_frame().as_ref(), b"data: [DONE]\n\n");
	}
}
