//! Push-Request Wire Codec
//!
//! A record's value is an encoded *push request*: a batch of trace entries
//! produced by the distributor, each pairing a trace id with opaque encoded
//! trace bytes. This module owns both directions of the framing.
//!
//! ## Frame Format
//!
//! ```text
//! ┌───────┬───────────┬─────────────────────────────────────────────┐
//! │ Magic │ Count     │ Entries                                     │
//! │ (1 B) │ (4 B, LE) │ per entry:                                  │
//! └───────┴───────────┴─────────────────────────────────────────────┘
//! ┌─────────────┬──────────┬──────────────┬───────────┐
//! │ Id Size     │ Trace Id │ Payload Size │ Payload   │
//! │ (4 B, LE)   │ (N B)    │ (4 B, LE)    │ (M B)     │
//! └─────────────┴──────────┴──────────────┴───────────┘
//! ```
//!
//! ## Decoder Reuse
//!
//! The consume loop decodes one record at a time on a hot path, so
//! [`Decoder`] keeps its entry vector alive between calls and hands out
//! zero-copy `Bytes` slices of the record value. Call [`Decoder::reset`]
//! after the decoded request has been pushed downstream.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Leading byte of every encoded push request.
pub const PUSH_MAGIC: u8 = 0x54;

/// A single trace entry inside a push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Trace identifier (opaque, typically 16 bytes)
    pub trace_id: Bytes,

    /// Encoded trace bytes
    pub payload: Bytes,
}

/// A decoded record payload: a batch of trace entries for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushRequest {
    pub entries: Vec<TraceEntry>,
}

/// Encode a push request into the record-value framing.
pub fn encode_push(req: &PushRequest) -> Bytes {
    let mut size = 1 + 4;
    for entry in &req.entries {
        size += 4 + entry.trace_id.len() + 4 + entry.payload.len();
    }

    let mut buf = BytesMut::with_capacity(size);
    buf.put_u8(PUSH_MAGIC);
    buf.put_u32_le(req.entries.len() as u32);
    for entry in &req.entries {
        buf.put_u32_le(entry.trace_id.len() as u32);
        buf.put_slice(&entry.trace_id);
        buf.put_u32_le(entry.payload.len() as u32);
        buf.put_slice(&entry.payload);
    }
    buf.freeze()
}

/// Streaming decoder for push requests.
///
/// Not thread-safe; each consume task owns its own decoder.
#[derive(Debug, Default)]
pub struct Decoder {
    req: PushRequest,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a record value. The returned request borrows the decoder's
    /// internal buffer and stays valid until the next `decode` or `reset`.
    /// Entries are zero-copy slices of `value`.
    pub fn decode(&mut self, value: &Bytes) -> Result<&PushRequest> {
        self.req.entries.clear();

        let mut cursor = Cursor::new(value);
        let magic = cursor.read_u8()?;
        if magic != PUSH_MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let count = cursor.read_u32_le()?;
        for _ in 0..count {
            let id_len = cursor.read_u32_le()? as usize;
            let trace_id = cursor.read_bytes(id_len)?;
            let payload_len = cursor.read_u32_le()? as usize;
            let payload = cursor.read_bytes(payload_len)?;
            self.req.entries.push(TraceEntry { trace_id, payload });
        }

        if !cursor.is_empty() {
            return Err(Error::InvalidFrame(format!(
                "{} trailing bytes after {} entries",
                cursor.remaining(),
                count
            )));
        }

        Ok(&self.req)
    }

    /// Release slices of the last decoded record value.
    pub fn reset(&mut self) {
        self.req.entries.clear();
    }
}

/// Bounds-checked reader over a record value.
struct Cursor<'a> {
    value: &'a Bytes,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(value: &'a Bytes) -> Self {
        Self { value, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.value.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn read_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(Error::InvalidFrame("truncated frame".to_string()));
        }
        let b = self.value[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(Error::InvalidFrame("truncated length field".to_string()));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.value[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(raw))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        if self.remaining() < len {
            return Err(Error::InvalidFrame(format!(
                "field of {} bytes exceeds remaining {}",
                len,
                self.remaining()
            )));
        }
        let out = self.value.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(entries: &[(&[u8], &[u8])]) -> PushRequest {
        PushRequest {
            entries: entries
                .iter()
                .map(|(id, payload)| TraceEntry {
                    trace_id: Bytes::copy_from_slice(id),
                    payload: Bytes::copy_from_slice(payload),
                })
                .collect(),
        }
    }

    #[test]
    fn test_roundtrip_single_entry() {
        let req = request(&[(b"trace-0123456789", b"span bytes")]);
        let encoded = encode_push(&req);

        let mut decoder = Decoder::new();
        let decoded = decoder.decode(&encoded).expect("decode");
        assert_eq!(*decoded, req);
    }

    #[test]
    fn test_roundtrip_many_entries() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..10)
            .map(|i| (format!("trace-{i:02}").into_bytes(), vec![i as u8; 32]))
            .collect();
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(id, p)| (id.as_slice(), p.as_slice()))
            .collect();
        let req = request(&borrowed);

        let encoded = encode_push(&req);
        let mut decoder = Decoder::new();
        let decoded = decoder.decode(&encoded).expect("decode");
        assert_eq!(decoded.entries.len(), 10);
        assert_eq!(*decoded, req);
    }

    #[test]
    fn test_roundtrip_empty_request() {
        let req = PushRequest::default();
        let encoded = encode_push(&req);
        assert_eq!(encoded.len(), 5); // magic + count

        let mut decoder = Decoder::new();
        let decoded = decoder.decode(&encoded).expect("decode");
        assert!(decoded.entries.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut encoded = BytesMut::new();
        encoded.put_u8(0x00);
        encoded.put_u32_le(0);

        let mut decoder = Decoder::new();
        let err = decoder.decode(&encoded.freeze()).unwrap_err();
        assert!(matches!(err, Error::InvalidMagic(0x00)));
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let req = request(&[(b"0123456789abcdef", b"payload")]);
        let encoded = encode_push(&req);
        let truncated = encoded.slice(..encoded.len() - 3);

        let mut decoder = Decoder::new();
        assert!(decoder.decode(&truncated).is_err());
    }

    #[test]
    fn test_decode_rejects_length_overrun() {
        let mut encoded = BytesMut::new();
        encoded.put_u8(PUSH_MAGIC);
        encoded.put_u32_le(1);
        encoded.put_u32_le(1000); // id length larger than the frame
        encoded.put_slice(b"short");

        let mut decoder = Decoder::new();
        assert!(decoder.decode(&encoded.freeze()).is_err());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let req = request(&[(b"id", b"payload")]);
        let mut raw = BytesMut::from(&encode_push(&req)[..]);
        raw.put_slice(b"junk");

        let mut decoder = Decoder::new();
        assert!(decoder.decode(&raw.freeze()).is_err());
    }

    #[test]
    fn test_decoder_reuse_clears_previous_entries() {
        let mut decoder = Decoder::new();

        let first = encode_push(&request(&[(b"a", b"1"), (b"b", b"2")]));
        assert_eq!(decoder.decode(&first).unwrap().entries.len(), 2);

        let second = encode_push(&request(&[(b"c", b"3")]));
        let decoded = decoder.decode(&second).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].trace_id, Bytes::from_static(b"c"));
    }

    #[test]
    fn test_reset_clears_entries() {
        let mut decoder = Decoder::new();
        let encoded = encode_push(&request(&[(b"a", b"1")]));
        decoder.decode(&encoded).unwrap();
        decoder.reset();
        assert!(decoder.req.entries.is_empty());
    }

    #[test]
    fn test_decode_is_zero_copy() {
        let req = request(&[(b"0123456789abcdef", b"payload-bytes")]);
        let encoded = encode_push(&req);

        let mut decoder = Decoder::new();
        let decoded = decoder.decode(&encoded).unwrap();
        // Slices share the backing allocation of the encoded value
        let payload = &decoded.entries[0].payload;
        let start = payload.as_ptr() as usize;
        let base = encoded.as_ptr() as usize;
        assert!(start >= base && start < base + encoded.len());
    }
}
