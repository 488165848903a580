//! Byte accumulation for request and response payloads.

use bytes::{Bytes, BytesMut};

/// One piece of a payload, written either as text or as raw bytes.
///
/// Text is kept as its UTF-8 encoding, so every chunk is a byte sequence
/// and whether the final payload reads as text is decided only once it is
/// assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk(Bytes);

impl Chunk {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk(bytes)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Chunk {
    fn from(bytes: &[u8]) -> Self {
        Chunk(Bytes::copy_from_slice(bytes))
    }
}

impl<const N: usize> From<&[u8; N]> for Chunk {
    fn from(bytes: &[u8; N]) -> Self {
        Chunk(Bytes::copy_from_slice(bytes))
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk(Bytes::from(text))
    }
}

impl From<&String> for Chunk {
    fn from(text: &String) -> Self {
        Chunk(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Chunk(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<Chunk> for Bytes {
    fn from(chunk: Chunk) -> Self {
        chunk.0
    }
}

/// Ordered list of chunks that concatenates into one payload.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    chunks: Vec<Bytes>,
    len: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk. Empty chunks are kept so the raw list mirrors the
    /// writer's calls.
    pub fn push(&mut self, chunk: impl Into<Chunk>) {
        let bytes = chunk.into().into_bytes();
        self.len += bytes.len();
        self.chunks.push(bytes);
    }

    /// Total number of payload bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The chunks in the order they were pushed.
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Exact concatenation of every chunk in push order.
    pub fn concat(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            chunks => {
                let mut buf = BytesMut::with_capacity(self.len);
                for chunk in chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }

    pub fn into_chunks(self) -> Vec<Bytes> {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_from_text_and_bytes() {
        assert_eq!(Chunk::from("ab").as_bytes(), b"ab");
        assert_eq!(Chunk::from(String::from("ab")).as_bytes(), b"ab");
        assert_eq!(Chunk::from(vec![0u8, 1]).as_bytes(), &[0, 1]);
        assert_eq!(Chunk::from(b"xy").as_bytes(), b"xy");
        assert_eq!(Chunk::from(Bytes::from_static(b"z")).len(), 1);
        assert!(Chunk::default().is_empty());
    }

    #[test]
    fn test_accumulator_empty() {
        let acc = Accumulator::new();
        assert!(acc.is_empty());
        assert_eq!(acc.len(), 0);
        assert!(acc.concat().is_empty());
        assert!(acc.chunks().is_empty());
    }

    #[test]
    fn test_accumulator_mixed_chunks() {
        let mut acc = Accumulator::new();
        acc.push("a");
        acc.push(Bytes::from_static(b"b"));
        acc.push(vec![b'c']);

        assert_eq!(acc.len(), 3);
        assert_eq!(acc.chunks().len(), 3);
        assert_eq!(&acc.concat()[..], b"abc");
    }

    #[test]
    fn test_accumulator_keeps_non_utf8_bytes() {
        let mut acc = Accumulator::new();
        acc.push("caf");
        acc.push(&[0xC3u8, 0xA9][..]);
        acc.push(vec![0xFFu8]);

        assert_eq!(&acc.concat()[..], &[b'c', b'a', b'f', 0xC3, 0xA9, 0xFF]);
    }

    #[test]
    fn test_accumulator_keeps_empty_chunks() {
        let mut acc = Accumulator::new();
        acc.push("");
        acc.push("x");

        assert_eq!(acc.chunks().len(), 2);
        assert_eq!(acc.len(), 1);
        assert_eq!(&acc.concat()[..], b"x");
    }

    #[test]
    fn test_accumulator_single_chunk_is_shared() {
        let original = Bytes::from_static(b"hello");
        let mut acc = Accumulator::new();
        acc.push(original.clone());

        let joined = acc.concat();
        assert_eq!(joined, original);
        assert_eq!(joined.as_ptr(), original.as_ptr());
    }
}
