//! Inbound line decoding for client connections
//!
//! Works like `LinesCodec` with a length cap, except that bytes which are not
//! valid UTF-8 are replaced with U+FFFD instead of failing the whole stream.
//! Outbound traffic is always valid UTF-8 and keeps using `LinesCodec`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodecError};

#[derive(Debug, Clone)]
pub struct ChatLineCodec {
    max_length: usize,
    /// Bytes of the current partial line already scanned for a newline
    next_index: usize,
}

impl ChatLineCodec {
    pub fn new_with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Decoder for ChatLineCodec {
    type Item = String;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len().min(self.max_length + 1);

        match src[self.next_index..read_to].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline = self.next_index + offset;
                self.next_index = 0;
                let line = src.split_to(newline + 1);
                Ok(Some(lossy_line(&line[..newline])))
            }
            None if src.len() > self.max_length => Err(LinesCodecError::MaxLineLengthExceeded),
            None => {
                self.next_index = read_to;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }

        // Last line without a trailing newline
        self.next_index = 0;
        let line = src.split_to(src.len());
        Ok(Some(lossy_line(&line)))
    }
}

fn lossy_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
