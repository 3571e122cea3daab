//! Value: one machine word, either an embedded scalar or a handle to a cell.
//!
//! Layout (low bits first):
//! - bits 0..4: [`Tag`]
//! - embedded values: bits 4..8 hold the [`Embedded`] subtype, bits 8..64 the payload
//! - references: bits 4..36 hold the cell index, bits 36..64 the cell generation
//!
//! The all-zero word is [`Value::NONE`]. A reference tag with index 0 is the empty
//! tree of that kind, it never points at a cell.
use std::fmt;

pub const TAG_MASK: u64 = 0b1111;
const SUBTYPE_SHIFT: u32 = 4;
const SUBTYPE_MASK: u64 = 0b1111 << SUBTYPE_SHIFT;
const PAYLOAD_SHIFT: u32 = 8;
const INDEX_SHIFT: u32 = 4;
const INDEX_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_SHIFT: u32 = 36;
pub const GENERATION_MASK: u32 = (1 << 28) - 1;

pub const SMALL_INT_MIN: i64 = -(1 << 55);
pub const SMALL_INT_MAX: i64 = (1 << 55) - 1;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Embedded = 0,
    Object = 1,
    List = 2,
    SparseList = 3,
    Tuple = 4,
    ByteBuffer = 5,
    ExternalPointer = 6,
    Method = 7,
    String = 8,
    Set = 9,
    Dict = 10,
    ListIterator = 11,
    SparseListIterator = 12,
    TupleIterator = 13,
    TupleDictionary = 14,
    /// runtime plumbing: parent links, indirect tuple levels, chunk continuations, threads
    Internal = 15,
}

impl Tag {
    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        match bits & TAG_MASK {
            0 => Tag::Embedded,
            1 => Tag::Object,
            2 => Tag::List,
            3 => Tag::SparseList,
            4 => Tag::Tuple,
            5 => Tag::ByteBuffer,
            6 => Tag::ExternalPointer,
            7 => Tag::Method,
            8 => Tag::String,
            9 => Tag::Set,
            10 => Tag::Dict,
            11 => Tag::ListIterator,
            12 => Tag::SparseListIterator,
            13 => Tag::TupleIterator,
            14 => Tag::TupleDictionary,
            _ => Tag::Internal,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Embedded {
    None = 0,
    Boolean = 1,
    Integer = 2,
    Float = 3,
    Byte = 4,
    /// days since the unix epoch
    Date = 5,
    /// microseconds since the unix epoch
    Timestamp = 6,
    /// microseconds
    TimeDelta = 7,
    Char = 8,
}

impl Embedded {
    pub const fn from_bits(bits: u64) -> Option<Self> {
        let kind = match bits {
            0 => Embedded::None,
            1 => Embedded::Boolean,
            2 => Embedded::Integer,
            3 => Embedded::Float,
            4 => Embedded::Byte,
            5 => Embedded::Date,
            6 => Embedded::Timestamp,
            7 => Embedded::TimeDelta,
            8 => Embedded::Char,
            _ => return None,
        };
        Some(kind)
    }
}

/// Slab handle of a cell: index into the arena plus the generation the slot had
/// when the handle was created.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub index: u32,
    pub generation: u32,
}

impl CellRef {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation: generation & GENERATION_MASK,
        }
    }
}

/// A generic Value
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Value(u64);

impl Value {
    pub const NONE: Value = Value(0);
    pub const TRUE: Value = Value::embed(Embedded::Boolean, 1);
    pub const FALSE: Value = Value::embed(Embedded::Boolean, 0);

    #[inline(always)]
    const fn embed(kind: Embedded, payload: u64) -> Self {
        Self((payload << PAYLOAD_SHIFT) | ((kind as u64) << SUBTYPE_SHIFT))
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn tag(self) -> Tag {
        Tag::from_bits(self.0)
    }

    #[inline(always)]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn is_embedded(self) -> bool {
        self.0 & TAG_MASK == Tag::Embedded as u64
    }

    /// True if the word names a live cell. Empty trees and embedded scalars are not references.
    #[inline(always)]
    pub const fn is_reference(self) -> bool {
        !self.is_embedded() && self.cell_index() != 0
    }

    pub const fn embedded_kind(self) -> Option<Embedded> {
        if !self.is_embedded() {
            return None;
        }
        Embedded::from_bits((self.0 & SUBTYPE_MASK) >> SUBTYPE_SHIFT)
    }

    #[inline(always)]
    const fn is_kind(self, kind: Embedded) -> bool {
        self.0 & (TAG_MASK | SUBTYPE_MASK) == (kind as u64) << SUBTYPE_SHIFT
    }

    #[inline(always)]
    const fn payload(self) -> u64 {
        self.0 >> PAYLOAD_SHIFT
    }

    #[inline(always)]
    const fn signed_payload(self) -> i64 {
        (self.0 as i64) >> PAYLOAD_SHIFT
    }

    pub const fn from_bool(value: bool) -> Self {
        if value { Self::TRUE } else { Self::FALSE }
    }

    pub const fn as_bool(self) -> Option<bool> {
        if self.is_kind(Embedded::Boolean) {
            Some(self.payload() != 0)
        } else {
            None
        }
    }

    /// Small integer. Values outside the 56 bit range are a caller bug, see [`Value::try_from_i64`].
    #[inline]
    pub const fn from_i64(value: i64) -> Self {
        debug_assert!(value >= SMALL_INT_MIN && value <= SMALL_INT_MAX);
        Self::embed(Embedded::Integer, value.cast_unsigned())
    }

    pub const fn try_from_i64(value: i64) -> Option<Self> {
        if value >= SMALL_INT_MIN && value <= SMALL_INT_MAX {
            Some(Self::from_i64(value))
        } else {
            None
        }
    }

    #[inline]
    pub const fn as_i64(self) -> Option<i64> {
        if self.is_kind(Embedded::Integer) {
            Some(self.signed_payload())
        } else {
            None
        }
    }

    pub const fn from_f32(value: f32) -> Self {
        Self::embed(Embedded::Float, value.to_bits() as u64)
    }

    pub const fn as_f32(self) -> Option<f32> {
        if self.is_kind(Embedded::Float) {
            Some(f32::from_bits(self.payload() as u32))
        } else {
            None
        }
    }

    pub const fn from_byte(value: u8) -> Self {
        Self::embed(Embedded::Byte, value as u64)
    }

    pub const fn as_byte(self) -> Option<u8> {
        if self.is_kind(Embedded::Byte) {
            Some(self.payload() as u8)
        } else {
            None
        }
    }

    pub const fn from_char(value: char) -> Self {
        Self::embed(Embedded::Char, value as u64)
    }

    pub fn as_char(self) -> Option<char> {
        if self.is_kind(Embedded::Char) {
            char::from_u32(self.payload() as u32)
        } else {
            None
        }
    }

    pub const fn from_date(days: i32) -> Self {
        Self::embed(Embedded::Date, (days as i64).cast_unsigned())
    }

    pub const fn as_date(self) -> Option<i32> {
        if self.is_kind(Embedded::Date) {
            Some(self.signed_payload() as i32)
        } else {
            None
        }
    }

    pub const fn from_timestamp(micros: i64) -> Self {
        debug_assert!(micros >= SMALL_INT_MIN && micros <= SMALL_INT_MAX);
        Self::embed(Embedded::Timestamp, micros.cast_unsigned())
    }

    pub const fn as_timestamp(self) -> Option<i64> {
        if self.is_kind(Embedded::Timestamp) {
            Some(self.signed_payload())
        } else {
            None
        }
    }

    pub const fn from_time_delta(micros: i64) -> Self {
        debug_assert!(micros >= SMALL_INT_MIN && micros <= SMALL_INT_MAX);
        Self::embed(Embedded::TimeDelta, micros.cast_unsigned())
    }

    pub const fn as_time_delta(self) -> Option<i64> {
        if self.is_kind(Embedded::TimeDelta) {
            Some(self.signed_payload())
        } else {
            None
        }
    }

    /// Empty tree of the given kind.
    #[inline(always)]
    pub const fn empty(tag: Tag) -> Self {
        debug_assert!(!matches!(tag, Tag::Embedded));
        Self(tag as u64)
    }

    #[inline]
    pub const fn reference(tag: Tag, cell: CellRef) -> Self {
        debug_assert!(!matches!(tag, Tag::Embedded));
        debug_assert!(cell.index != 0);
        Self(
            ((cell.generation as u64) << GENERATION_SHIFT)
                | ((cell.index as u64) << INDEX_SHIFT)
                | tag as u64,
        )
    }

    #[inline(always)]
    pub const fn cell_index(self) -> u32 {
        ((self.0 >> INDEX_SHIFT) & INDEX_MASK) as u32
    }

    #[inline(always)]
    pub const fn cell(self) -> Option<CellRef> {
        if self.is_reference() {
            Some(CellRef::new(
                self.cell_index(),
                (self.0 >> GENERATION_SHIFT) as u32,
            ))
        } else {
            None
        }
    }

    /// Same cell (or same empty sentinel) seen through another tag.
    #[inline]
    pub const fn with_tag(self, tag: Tag) -> Self {
        debug_assert!(!self.is_embedded() && !matches!(tag, Tag::Embedded));
        Self((self.0 & !TAG_MASK) | tag as u64)
    }

    /// Identity hash, derived from the word alone.
    #[inline]
    pub const fn identity_hash(self) -> u64 {
        mix(self.0)
    }
}

/// Word mixer used for identity and structural hashes.
#[inline]
pub const fn mix(word: u64) -> u64 {
    let x = word.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^ (x >> 29)
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "None");
        }
        match self.embedded_kind() {
            Some(Embedded::Boolean) => write!(f, "{}", self.payload() != 0),
            Some(Embedded::Integer) => write!(f, "{}", self.signed_payload()),
            Some(Embedded::Float) => write!(f, "{}f", f32::from_bits(self.payload() as u32)),
            Some(Embedded::Byte) => write!(f, "{}u8", self.payload() as u8),
            Some(Embedded::Date) => write!(f, "Date({})", self.signed_payload()),
            Some(Embedded::Timestamp) => write!(f, "Timestamp({})", self.signed_payload()),
            Some(Embedded::TimeDelta) => write!(f, "TimeDelta({})", self.signed_payload()),
            Some(Embedded::Char) => write!(f, "{:?}", self.as_char().unwrap_or('\u{FFFD}')),
            Some(Embedded::None) | None if self.is_embedded() => {
                write!(f, "Embedded({:#x})", self.0)
            }
            _ => match self.cell() {
                Some(cell) => write!(f, "{:?}#{}@{}", self.tag(), cell.index, cell.generation),
                None => write!(f, "{:?}(empty)", self.tag()),
            },
        }
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn none_is_the_zero_word_and_not_a_reference() {
        assert_eq!(Value::NONE.raw(), 0);
        assert!(Value::NONE.is_embedded());
        assert!(!Value::NONE.is_reference());
        assert_eq!(Value::NONE.embedded_kind(), Some(Embedded::None));
        assert_ne!(Value::FALSE, Value::NONE);
        assert_ne!(Value::from_i64(0), Value::NONE);
    }

    #[test]
    fn small_integers_keep_their_sign() {
        for n in [0, 1, -1, 42, -4711, SMALL_INT_MIN, SMALL_INT_MAX] {
            let v = Value::from_i64(n);
            assert!(v.is_embedded());
            assert_eq!(v.embedded_kind(), Some(Embedded::Integer));
            assert_eq!(v.as_i64(), Some(n), "payload of {n}");
        }
        assert!(Value::try_from_i64(SMALL_INT_MAX + 1).is_none());
        assert!(Value::try_from_i64(SMALL_INT_MIN - 1).is_none());
    }

    #[test]
    fn scalar_kinds_do_not_alias() {
        let int = Value::from_i64(65);
        let byte = Value::from_byte(65);
        let ch = Value::from_char('A');
        assert_ne!(int, byte);
        assert_ne!(byte, ch);
        assert_eq!(int.as_byte(), None);
        assert_eq!(byte.as_byte(), Some(65));
        assert_eq!(ch.as_char(), Some('A'));
        assert_eq!(Value::from_f32(1.5).as_f32(), Some(1.5));
        assert_eq!(Value::from_bool(true).as_bool(), Some(true));
        assert_eq!(Value::from_date(-3).as_date(), Some(-3));
        assert_eq!(Value::from_timestamp(1 << 40).as_timestamp(), Some(1 << 40));
        assert_eq!(Value::from_time_delta(-250).as_time_delta(), Some(-250));
    }

    #[test]
    fn references_round_trip_index_and_generation() {
        let cell = CellRef::new(123_456, GENERATION_MASK);
        let v = Value::reference(Tag::Tuple, cell);
        assert_eq!(v.tag(), Tag::Tuple);
        assert!(!v.is_embedded());
        assert!(v.is_reference());
        assert_eq!(v.cell(), Some(cell));
        assert_eq!(v.with_tag(Tag::Internal).cell(), Some(cell));
    }

    #[test]
    fn empty_trees_carry_a_tag_but_no_cell() {
        let empty = Value::empty(Tag::List);
        assert_eq!(empty.tag(), Tag::List);
        assert!(!empty.is_embedded());
        assert!(!empty.is_reference());
        assert_eq!(empty.cell(), None);
        assert_ne!(empty, Value::empty(Tag::Set));
    }

    #[test]
    fn every_tag_decodes_from_its_own_bits() {
        for bits in 0..16u64 {
            assert_eq!(Tag::from_bits(bits) as u64, bits);
        }
    }
}
