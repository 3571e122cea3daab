//! Strings and byte buffers, stored as chains of fixed size chunks.
use crate::{Allocator, CellData, SpaceInner, Tag, Value};

/// Bytes per chunk, what is left of a payload after the length and the link.
pub const CHUNK_BYTES: usize = 39;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteChunk {
    pub len: u8,
    pub bytes: [u8; CHUNK_BYTES],
    /// following chunk, `NONE` on the last one
    pub next: Value,
}

/// Allocates the chunk chain back to front so every chunk can point at its successor.
fn store_chunks<A: Allocator>(alloc: &mut A, tag: Tag, bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::empty(tag);
    }
    let mut next = Value::NONE;
    for piece in bytes.chunks(CHUNK_BYTES).rev() {
        let mut chunk = ByteChunk {
            len: piece.len() as u8,
            bytes: [0; CHUNK_BYTES],
            next,
        };
        chunk.bytes[..piece.len()].copy_from_slice(piece);
        next = alloc.allocate_value(Tag::Internal, CellData::Chunk(chunk));
    }
    next.with_tag(tag)
}

fn for_each_chunk(space: &SpaceInner, mut current: Value, mut visit: impl FnMut(&[u8])) {
    while let Some(cell) = current.cell() {
        let CellData::Chunk(chunk) = space.cell(cell) else {
            panic!("{current:?} is not a byte chunk");
        };
        visit(&chunk.bytes[..chunk.len as usize]);
        current = chunk.next;
    }
}

fn chunk_len(space: &SpaceInner, value: Value) -> usize {
    let mut len = 0;
    for_each_chunk(space, value, |bytes| len += bytes.len());
    len
}

fn read_bytes(space: &SpaceInner, value: Value) -> Vec<u8> {
    let mut out = Vec::new();
    for_each_chunk(space, value, |bytes| out.extend_from_slice(bytes));
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteBuffer(Value);

impl ByteBuffer {
    pub fn from_bytes<A: Allocator>(alloc: &mut A, bytes: &[u8]) -> Self {
        Self(store_chunks(alloc, Tag::ByteBuffer, bytes))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::ByteBuffer).then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    pub fn len(self, space: &SpaceInner) -> usize {
        chunk_len(space, self.0)
    }

    pub fn is_empty(self) -> bool {
        self.0.cell().is_none()
    }

    /// Byte at `index`, `None` when out of range.
    pub fn byte_at(self, space: &SpaceInner, index: usize) -> Option<u8> {
        let mut remaining = index;
        let mut found = None;
        for_each_chunk(space, self.0, |bytes| {
            if found.is_some() {
                return;
            }
            if remaining < bytes.len() {
                found = Some(bytes[remaining]);
            } else {
                remaining -= bytes.len();
            }
        });
        found
    }

    pub fn to_bytes(self, space: &SpaceInner) -> Vec<u8> {
        read_bytes(space, self.0)
    }
}

/// UTF-8 text. Chunk boundaries may split a code point, only whole strings are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VMString(Value);

impl VMString {
    pub fn from_str<A: Allocator>(alloc: &mut A, text: &str) -> Self {
        Self(store_chunks(alloc, Tag::String, text.as_bytes()))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::String).then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    /// Length in bytes.
    pub fn len(self, space: &SpaceInner) -> usize {
        chunk_len(space, self.0)
    }

    pub fn is_empty(self) -> bool {
        self.0.cell().is_none()
    }

    pub fn to_string_lossy(self, space: &SpaceInner) -> String {
        String::from_utf8_lossy(&read_bytes(space, self.0)).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_space;

    #[test]
    fn buffers_span_several_chunks() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let bytes: Vec<u8> = (0..=200u8).collect();
        let buffer = ByteBuffer::from_bytes(&mut ctx, &bytes);
        assert_eq!(buffer.len(&ctx), 201);
        assert_eq!(buffer.to_bytes(&ctx), bytes);
        assert_eq!(buffer.byte_at(&ctx, 0), Some(0));
        assert_eq!(buffer.byte_at(&ctx, CHUNK_BYTES), Some(CHUNK_BYTES as u8));
        assert_eq!(buffer.byte_at(&ctx, 200), Some(200));
        assert_eq!(buffer.byte_at(&ctx, 201), None);
        assert_eq!(ctx.allocated(), 201usize.div_ceil(CHUNK_BYTES));
    }

    #[test]
    fn strings_round_trip_multibyte_text() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let text = "Grüße aus dem Speicher, ünd noch ein paar Zeichen: λ→∞";
        let string = VMString::from_str(&mut ctx, text);
        assert_eq!(string.len(&ctx), text.len());
        assert_eq!(string.to_string_lossy(&ctx), text);

        let empty = VMString::from_str(&mut ctx, "");
        assert!(empty.is_empty());
        assert_eq!(empty.to_string_lossy(&ctx), "");
    }
}
