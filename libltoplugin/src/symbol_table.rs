//! Decoding of the IR symbol table that the compiler stores in each IR object.
//!
//! The table is a sequence of records with no header and no count. Each record is:
//!
//! * the symbol name, null terminated
//! * the comdat key, null terminated. An empty string means no comdat key
//! * 1 byte symbol kind, 0..=4
//! * 1 byte visibility, 0..=3
//! * 8 bytes size, native endian
//! * 4 bytes slot, native endian
//!
//! The table ends when the data ends. Anything that doesn't fit that format means that the
//! compiler that produced the object doesn't agree with us about the format.

use crate::symbol::SlotId;
use crate::symbol::SymbolKind;
use crate::symbol::SymbolRecord;
use crate::symbol::Visibility;
use std::ffi::CStr;
use std::fmt::Display;

/// The symbols of a single IR object, in the order in which the compiler wrote them. That order
/// is significant. It's the order in which we report symbols to the linker, the order in which
/// the linker gives us resolutions and the order in which we write them to the resolution file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    // These two are always the same length. They're kept separate because the linker wants a
    // contiguous array of symbols without the slots.
    records: Vec<SymbolRecord>,
    slots: Vec<SlotId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableError {
    /// Offset within the section of the record that we failed to decode.
    pub offset: usize,
    pub reason: DecodeFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    UnterminatedName,
    UnterminatedComdatKey,
    Truncated { field: &'static str },
    InvalidKind(u8),
    InvalidVisibility(u8),
}

/// A bounds-checked cursor over the raw section bytes.
struct RecordReader<'data> {
    data: &'data [u8],
    offset: usize,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: SymbolRecord, slot: SlotId) {
        self.records.push(record);
        self.slots.push(slot);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[SymbolRecord] {
        &self.records
    }

    /// Mutable access to the records. Handing out a slice rather than the Vec means that callers
    /// can update resolutions, but can't change the number of records.
    pub fn records_mut(&mut self) -> &mut [SymbolRecord] {
        &mut self.records
    }

    #[must_use]
    pub fn slots(&self) -> &[SlotId] {
        &self.slots
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SymbolRecord, SlotId)> {
        self.records.iter().zip(self.slots.iter().copied())
    }

    /// Encodes the table back into the format that `translate` reads.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (record, slot) in self.iter() {
            encode_record(record, slot, &mut out);
        }
        out
    }
}

/// Decodes all the records in `data`. The data must consist of a whole number of records.
pub fn translate(data: &[u8]) -> Result<SymbolTable, SymbolTableError> {
    let mut reader = RecordReader { data, offset: 0 };
    let mut table = SymbolTable::new();
    while !reader.is_empty() {
        let (record, slot) = reader.read_record()?;
        table.push(record, slot);
    }
    Ok(table)
}

/// Decodes a single record from the start of `data`, returning it together with the number of
/// bytes it occupied.
pub fn decode_record(data: &[u8]) -> Result<(SymbolRecord, SlotId, usize), SymbolTableError> {
    let mut reader = RecordReader { data, offset: 0 };
    let (record, slot) = reader.read_record()?;
    Ok((record, slot, reader.offset))
}

pub fn encode_record(record: &SymbolRecord, slot: SlotId, out: &mut Vec<u8>) {
    out.extend_from_slice(record.name.as_bytes_with_nul());
    match record.comdat_key.as_ref() {
        Some(key) => out.extend_from_slice(key.as_bytes_with_nul()),
        None => out.push(0),
    }
    out.push(record.kind as u8);
    out.push(record.visibility as u8);
    out.extend_from_slice(&record.size.to_ne_bytes());
    out.extend_from_slice(&slot.0.to_ne_bytes());
}

impl<'data> RecordReader<'data> {
    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn read_record(&mut self) -> Result<(SymbolRecord, SlotId), SymbolTableError> {
        let start = self.offset;
        let fail = |reason: DecodeFailure| SymbolTableError {
            offset: start,
            reason,
        };

        let name = self
            .read_c_str()
            .ok_or_else(|| fail(DecodeFailure::UnterminatedName))?
            .to_owned();
        let comdat_key = self
            .read_c_str()
            .ok_or_else(|| fail(DecodeFailure::UnterminatedComdatKey))?;
        let comdat_key = (!comdat_key.is_empty()).then(|| comdat_key.to_owned());

        let [kind, visibility] = self
            .read_array::<2>("kind and visibility")
            .map_err(fail)?;
        let kind =
            SymbolKind::from_code(kind).ok_or_else(|| fail(DecodeFailure::InvalidKind(kind)))?;
        let visibility = Visibility::from_code(visibility)
            .ok_or_else(|| fail(DecodeFailure::InvalidVisibility(visibility)))?;

        let size = u64::from_ne_bytes(self.read_array("size").map_err(fail)?);
        let slot = SlotId(u32::from_ne_bytes(self.read_array("slot").map_err(fail)?));

        Ok((
            SymbolRecord::new(name, comdat_key, kind, visibility, size),
            slot,
        ))
    }

    fn read_c_str(&mut self) -> Option<&'data CStr> {
        let rest = &self.data[self.offset..];
        let len = memchr::memchr(0, rest)?;
        let s = CStr::from_bytes_with_nul(&rest[..=len]).ok()?;
        self.offset += len + 1;
        Some(s)
    }

    fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeFailure> {
        let bytes = self
            .data
            .get(self.offset..self.offset + N)
            .ok_or(DecodeFailure::Truncated { field })?;
        self.offset += N;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}

impl Display for SymbolTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            DecodeFailure::UnterminatedName => write!(f, "unterminated symbol name")?,
            DecodeFailure::UnterminatedComdatKey => write!(f, "unterminated comdat key")?,
            DecodeFailure::Truncated { field } => write!(f, "symbol record truncated in {field}")?,
            DecodeFailure::InvalidKind(kind) => write!(f, "invalid symbol kind {kind}")?,
            DecodeFailure::InvalidVisibility(visibility) => {
                write!(f, "invalid symbol visibility {visibility}")?;
            }
        }
        write!(f, " in record at offset {}", self.offset)
    }
}

impl core::error::Error for SymbolTableError {}
