use aws_smithy_eventstream::frame::{DecodedFrame, MessageFrameDecoder, write_message_to};
pub use aws_smithy_types::event_stream::Message;
use aws_smithy_types::event_stream::{Header, HeaderValue};
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// Error type for EventStream encoding/decoding.
///
/// Wraps AWS Smithy's eventstream errors and satisfies the `tokio_util::codec::Decoder`
/// requirement of implementing `From<io::Error>`.
#[derive(Debug)]
pub enum EventStreamError {
	/// AWS EventStream protocol error (CRC mismatch, invalid headers, etc.)
	Protocol(aws_smithy_eventstream::error::Error),
	/// I/O error during decoding
	Io(std::io::Error),
}

impl std::fmt::Display for EventStreamError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Protocol(e) => write!(f, "{e}"),
			Self::Io(e) => write!(f, "{e}"),
		}
	}
}

impl std::error::Error for EventStreamError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Protocol(e) => Some(e),
			Self::Io(e) => Some(e),
		}
	}
}

impl From<std::io::Error> for EventStreamError {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<aws_smithy_eventstream::error::Error> for EventStreamError {
	fn from(err: aws_smithy_eventstream::error::Error) -> Self {
		Self::Protocol(err)
	}
}

/// A `tokio_util::codec::Decoder` wrapper around AWS Smithy's `MessageFrameDecoder`.
#[derive(Default)]
pub struct EventStreamCodec {
	inner: MessageFrameDecoder,
}

impl EventStreamCodec {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Decoder for EventStreamCodec {
	type Item = Message;
	type Error = EventStreamError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.inner.decode_frame(src)? {
			DecodedFrame::Complete(message) => Ok(Some(message)),
			DecodedFrame::Incomplete => Ok(None),
		}
	}
}

/// Splits a byte stream into whole event-stream frames without interpreting them.
///
/// The Bedrock stream adapter needs the exact frame bytes back for verbatim replay; a
/// decoder alone only yields the parsed message. Frames are length-prefixed (big-endian
/// u32 total length), so splitting is cheap.
#[derive(Default)]
pub struct FrameBuffer {
	buffer: BytesMut,
}

impl FrameBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
		self.buffer.extend_from_slice(chunk);
		let mut frames = Vec::new();
		loop {
			if self.buffer.len() < 4 {
				break;
			}
			let total = u32::from_be_bytes([
				self.buffer[0],
				self.buffer[1],
				self.buffer[2],
				self.buffer[3],
			]) as usize;
			if total < 16 || self.buffer.len() < total {
				break;
			}
			frames.push(self.buffer.split_to(total).freeze());
		}
		frames
	}
}

/// Decode a single complete frame into a message.
pub fn decode_frame(raw: &Bytes) -> Result<Message, EventStreamError> {
	let mut buf = raw.clone();
	match MessageFrameDecoder::new().decode_frame(&mut buf)? {
		DecodedFrame::Complete(message) => Ok(message),
		DecodedFrame::Incomplete => Err(EventStreamError::Io(std::io::Error::new(
			std::io::ErrorKind::UnexpectedEof,
			"truncated event stream frame",
		))),
	}
}

pub fn event_type(message: &Message) -> Option<&str> {
	message
		.headers()
		.iter()
		.find(|h| h.name().as_str() == ":event-type")
		.and_then(|h| match h.value() {
			HeaderValue::String(s) => Some(s.as_str()),
			_ => None,
		})
}

/// The 62-character padding alphabet Bedrock fills event bodies with.
const PADDING_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Bodies are padded up to roughly this size on the wire.
const PADDED_BODY_LEN: usize = 80;

/// Encode one event frame the way Bedrock's runtime does: headers `:event-type`,
/// `:content-type: application/json`, `:message-type: event`, and a JSON body carrying an
/// extra `p` field that pads the body to ~80 bytes. Native eventstream parsers expect the
/// padding; frames without it are not byte-compatible.
pub fn encode_event(
	event_type: &str,
	payload: &serde_json::Value,
) -> Result<Bytes, EventStreamError> {
	let mut body = match payload {
		serde_json::Value::Object(map) => map.clone(),
		other => {
			let mut map = serde_json::Map::new();
			map.insert("value".to_string(), other.clone());
			map
		},
	};
	body.insert("p".to_string(), serde_json::Value::String(String::new()));
	let base_len = serde_json::to_vec(&serde_json::Value::Object(body.clone()))
		.map(|v| v.len())
		.unwrap_or(PADDED_BODY_LEN);
	let pad = PADDED_BODY_LEN
		.saturating_sub(base_len)
		.min(PADDING_ALPHABET.len());
	body.insert(
		"p".to_string(),
		serde_json::Value::String(PADDING_ALPHABET[..pad].to_string()),
	);
	let body = serde_json::to_vec(&serde_json::Value::Object(body)).map_err(|e| {
		EventStreamError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
	})?;

	let message = Message::new(Bytes::from(body))
		.add_header(Header::new(
			":event-type",
			HeaderValue::String(event_type.to_string().into()),
		))
		.add_header(Header::new(
			":content-type",
			HeaderValue::String("application/json".into()),
		))
		.add_header(Header::new(
			":message-type",
			HeaderValue::String("event".into()),
		));
	let mut out = Vec::new();
	write_message_to(&message, &mut out)?;
	Ok(Bytes::from(out))
}

/// Decode an event body, stripping the `p` padding field.
pub fn decode_body(message: &Message) -> Result<serde_json::Value, EventStreamError> {
	let mut value: serde_json::Value = serde_json::from_slice(message.payload().chunk())
		.map_err(|e| {
			EventStreamError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
		})?;
	if let Some(map) = value.as_object_mut() {
		map.remove("p");
	}
	Ok(value)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encode_decode_round_trip() {
		let payload = serde_json::json!({"role": "assistant"});
		let raw = encode_event("messageStart", &payload).unwrap();

		let msg = decode_frame(&raw).unwrap();
		assert_eq!(event_type(&msg), Some("messageStart"));
		assert_eq!(decode_body(&msg).unwrap(), payload);
	}

	#[test]
	fn padding_reaches_target_length() {
		let payload = serde_json::json!({"delta": {"text": "hi"}, "contentBlockIndex": 0});
		let raw = encode_event("contentBlockDelta", &payload).unwrap();
		let msg = decode_frame(&raw).unwrap();
		let body: serde_json::Value = serde_json::from_slice(msg.payload().chunk()).unwrap();
		let p = body.get("p").and_then(|p| p.as_str()).unwrap();
		assert!(PADDING_ALPHABET.starts_with(p));
		assert_eq!(msg.payload().len(), PADDED_BODY_LEN);
	}

	#[test]
	fn padding_empty_when_body_already_large() {
		let long = "x".repeat(200);
		let payload = serde_json::json!({"delta": {"text": long}});
		let raw = encode_event("contentBlockDelta", &payload).unwrap();
		let msg = decode_frame(&raw).unwrap();
		let body: serde_json::Value = serde_json::from_slice(msg.payload().chunk()).unwrap();
		assert_eq!(body.get("p").and_then(|p| p.as_str()), Some(""));
	}

	#[test]
	fn frame_buffer_splits_on_boundaries() {
		let a = encode_event("messageStart", &serde_json::json!({"role":"assistant"})).unwrap();
		let b = encode_event("messageStop", &serde_json::json!({"stopReason":"end_turn"})).unwrap();
		let mut joined = a.to_vec();
		joined.extend_from_slice(&b);

		let mut fb = FrameBuffer::new();
		// Feed in awkward chunk sizes
		let (first, second) = joined.split_at(7);
		assert!(fb.push(first).is_empty());
		let frames = fb.push(second);
		assert_eq!(frames.len(), 2);
		assert_eq!(frames[0], a);
		assert_eq!(frames[1], b);
	}
}
