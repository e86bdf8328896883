//! Newline-delimited JSON codec.
//!
//! Every frame is a single JSON object terminated by `\n`. The decoder
//! buffers partial frames across reads and yields complete frames in
//! arrival order. A frame that fails to parse is consumed and reported
//! without disturbing the frames that follow it.

use crate::error::ProtocolError;
use crate::message::{Request, Response};
use crate::{DELIMITER, MAX_FRAME_SIZE};
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes messages into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a request into a frame.
    pub fn encode_request(request: &Request) -> Result<BytesMut, ProtocolError> {
        Self::encode_json(request)
    }

    /// Encodes a response into a frame.
    pub fn encode_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        Self::encode_json(response)
    }

    /// Encodes any JSON-serializable value into a frame.
    pub fn encode_json<T: Serialize>(value: &T) -> Result<BytesMut, ProtocolError> {
        let json = serde_json::to_vec(value)?;
        if json.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: json.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let mut buf = BytesMut::with_capacity(json.len() + 1);
        buf.put_slice(&json);
        buf.put_u8(DELIMITER);
        Ok(buf)
    }
}

/// Splits a byte stream into frames and decodes them.
pub struct LineDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
    /// Set after an oversized partial frame was dropped; bytes are skipped
    /// until the next delimiter.
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size,
            discarding: false,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// Returns `Ok(None)` when no complete frame is buffered. An `Err`
    /// means one frame was consumed and dropped; calling again continues
    /// with the next frame.
    pub fn decode_line<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == DELIMITER) else {
                if self.discarding {
                    self.buffer.clear();
                } else if self.buffer.len() > self.max_frame_size {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    self.discarding = true;
                    return Err(ProtocolError::FrameTooLarge {
                        size,
                        max: self.max_frame_size,
                    });
                }
                return Ok(None);
            };

            let frame = self.buffer.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }

            let line = &frame[..pos];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_frame_size {
                return Err(ProtocolError::FrameTooLarge {
                    size: line.len(),
                    max: self.max_frame_size,
                });
            }

            let json = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
            return Ok(Some(serde_json::from_str(json)?));
        }
    }

    /// Attempts to decode the next response from the buffer.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        self.decode_line()
    }

    /// Appends data and decodes every complete frame, in arrival order.
    ///
    /// Malformed frames appear as `Err` entries in place.
    pub fn feed<T: DeserializeOwned>(&mut self, data: &[u8]) -> Vec<Result<T, ProtocolError>> {
        self.extend(data);
        let mut out = Vec::new();
        loop {
            match self.decode_line() {
                Ok(Some(msg)) => out.push(Ok(msg)),
                Ok(None) => break,
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Method;
    use proptest::prelude::*;

    fn responses(decoded: Vec<Result<Response, ProtocolError>>) -> Vec<Response> {
        decoded.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_request_frame_is_one_line() {
        let request = Request::new("T1", Method::Get, "/feeds/42");
        let encoded = Encoder::encode_request(&request).unwrap();

        assert_eq!(encoded.last(), Some(&b'\n'));
        assert_eq!(encoded.iter().filter(|&&b| b == b'\n').count(), 1);

        let mut decoder = LineDecoder::new();
        decoder.extend(&encoded);
        let decoded: Request = decoder.decode_line().unwrap().unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_body_newlines_are_escaped() {
        let request =
            Request::new("T1", Method::Put, "/feeds/42").with_body(Some("a\nb\nc".to_string()));
        let encoded = Encoder::encode_request(&request).unwrap();
        assert_eq!(encoded.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_partial_frame_decoding() {
        let mut decoder = LineDecoder::new();

        decoder.extend(br#"{"token":"T1","sta"#);
        assert!(decoder.decode_response().unwrap().is_none());
        assert!(decoder.buffered() > 0);

        decoder.extend(b"tus\":200}\n");
        let decoded = decoder.decode_response().unwrap().unwrap();
        assert_eq!(decoded.token, "T1");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_feed_multiple_frames() {
        let mut decoder = LineDecoder::new();
        let out = responses(decoder.feed(
            b"{\"token\":\"A\",\"status\":200}\n{\"token\":\"B\",\"status\":201}\n{\"token\":\"C\"",
        ));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].token, "A");
        assert_eq!(out[1].token, "B");

        let out = responses(decoder.feed(b",\"status\":404}\n"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token, "C");
        assert_eq!(out[0].status, 404);
    }

    #[test]
    fn test_malformed_frame_does_not_corrupt_next() {
        let mut decoder = LineDecoder::new();
        let out: Vec<Result<Response, _>> = decoder.feed(
            b"{\"token\":\"A\",\"status\":200}\nnot json at all\n{\"token\":\"B\",\"status\":200}\n",
        );

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap().token, "A");
        assert!(matches!(out[1], Err(ProtocolError::Json(_))));
        assert_eq!(out[2].as_ref().unwrap().token, "B");
    }

    #[test]
    fn test_invalid_utf8_frame() {
        let mut decoder = LineDecoder::new();
        let out: Vec<Result<Response, _>> =
            decoder.feed(b"\xff\xfe\n{\"token\":\"A\",\"status\":200}\n");
        assert!(matches!(out[0], Err(ProtocolError::InvalidUtf8)));
        assert_eq!(out[1].as_ref().unwrap().token, "A");
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let mut decoder = LineDecoder::new();
        let out = responses(decoder.feed(b"\n\r\n{\"token\":\"A\",\"status\":200}\r\n"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token, "A");
    }

    #[test]
    fn test_oversized_frame_is_skipped() {
        let mut decoder = LineDecoder::with_max_frame_size(32);
        let mut data = vec![b'x'; 40];
        let out: Vec<Result<Response, _>> = decoder.feed(&data);
        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0],
            Err(ProtocolError::FrameTooLarge { size: 40, max: 32 })
        ));

        // The rest of the oversized frame is dropped up to its delimiter.
        data = b"yyyy\n{\"token\":\"A\",\"status\":200}\n".to_vec();
        let out = responses(decoder.feed(&data));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token, "A");
    }

    #[test]
    fn test_decoder_clear() {
        let mut decoder = LineDecoder::default();
        decoder.extend(b"partial");
        assert_eq!(decoder.buffered(), 7);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    fn arb_response() -> impl Strategy<Value = Response> {
        (
            "[a-zA-Z0-9-]{1,36}",
            prop_oneof![Just(200u16), Just(201), Just(404), Just(500)],
            proptest::option::of(".{0,64}"),
        )
            .prop_map(|(token, status, body)| {
                let response = Response::new(token, status);
                match body {
                    Some(body) => response.with_body(body),
                    None => response,
                }
            })
    }

    proptest! {
        #[test]
        fn prop_split_feed_matches_contiguous_feed(
            msgs in proptest::collection::vec(arb_response(), 1..8),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..12),
        ) {
            let mut stream = Vec::new();
            for msg in &msgs {
                stream.extend_from_slice(&Encoder::encode_response(msg).unwrap());
            }

            let mut whole = LineDecoder::new();
            let expected = responses(whole.feed(&stream));
            prop_assert_eq!(&expected, &msgs);

            let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(stream.len() + 1)).collect();
            offsets.push(0);
            offsets.push(stream.len());
            offsets.sort_unstable();
            offsets.dedup();

            let mut split = LineDecoder::new();
            let mut actual = Vec::new();
            for pair in offsets.windows(2) {
                actual.extend(responses(split.feed(&stream[pair[0]..pair[1]])));
            }
            prop_assert_eq!(actual, expected);
            prop_assert_eq!(split.buffered(), 0);
        }
    }
}
