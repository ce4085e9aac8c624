use std::collections::{BTreeMap, HashMap};

use bitflags::bitflags;
use thiserror::Error;

use crate::codeview::usize_to_u32_saturating;
use crate::symbol::SymbolId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("unknown segment: {0:?}")]
    UnknownSegment(SegmentId),
    #[error("patch at {offset:#x} runs past the end of segment {segment:?}")]
    PatchOutOfRange { segment: SegmentId, offset: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u32);

bitflags! {
    /// Which parts of a `seg:offset` address field a fixup overwrites.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FixupFlags: u8 {
        /// 4-byte section-relative offset.
        const OFF = 0b01;
        /// 2-byte section number following the offset.
        const SEG = 0b10;
    }
}

impl FixupFlags {
    /// Width in bytes of the patched field.
    #[must_use]
    pub fn width(self) -> u32 {
        let mut width = 0;
        if self.contains(Self::OFF) {
            width += 4;
        }
        if self.contains(Self::SEG) {
            width += 2;
        }
        width
    }
}

/// Byte and relocation primitives of the object file being produced.
pub trait ObjectWriter {
    /// Writes `data` at `offset`, growing the segment when needed.
    ///
    /// # Errors
    /// Returns `ObjectError` when `segment` does not exist.
    fn write_bytes(&mut self, segment: SegmentId, offset: u32, data: &[u8]) -> Result<(), ObjectError>;

    /// Writes `length` zero bytes at `offset`.
    ///
    /// # Errors
    /// Returns `ObjectError` when `segment` does not exist.
    fn reserve_zeroed(&mut self, segment: SegmentId, offset: u32, length: u32) -> Result<(), ObjectError>;

    /// Current end of `segment`.
    ///
    /// # Errors
    /// Returns `ObjectError` when `segment` does not exist.
    fn current_offset(&self, segment: SegmentId) -> Result<u32, ObjectError>;

    fn debug_s_segment(&mut self) -> SegmentId;

    fn debug_t_segment(&mut self) -> SegmentId;

    /// `.debug$S` section associated with the link-once `symbol`.
    fn comdat_debug_s_segment(&mut self, symbol: SymbolId) -> SegmentId;

    /// Makes the `seg:offset` field at `offset` refer to `symbol`.
    ///
    /// # Errors
    /// Returns `ObjectError` when the field does not lie inside `segment`.
    fn patch_symbol_address(
        &mut self,
        segment: SegmentId,
        offset: u32,
        symbol: SymbolId,
        flags: FixupFlags,
    ) -> Result<(), ObjectError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub comdat_of: Option<SymbolId>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolAddress {
    pub segment: SegmentId,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub segment: SegmentId,
    pub offset: u32,
    pub symbol: SymbolId,
    pub flags: FixupFlags,
}

/// In-memory object image.
///
/// Address fields are filled in immediately for symbols whose address was
/// registered with [`MemoryObject::define_symbol`]; every patch is also kept
/// as a [`Relocation`] for the linker.
#[derive(Debug, Default)]
pub struct MemoryObject {
    segments: Vec<Segment>,
    debug_s: Option<SegmentId>,
    debug_t: Option<SegmentId>,
    comdat_debug_s: BTreeMap<SymbolId, SegmentId>,
    addresses: HashMap<SymbolId, SymbolAddress>,
    relocations: Vec<Relocation>,
}

impl MemoryObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_segment(&mut self, name: &str) -> SegmentId {
        self.push_segment(name, None)
    }

    pub fn define_symbol(&mut self, symbol: SymbolId, segment: SegmentId, offset: u32) {
        self.addresses.insert(symbol, SymbolAddress { segment, offset });
    }

    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.0 as usize)
    }

    /// Iterates segments with their ids, in creation order.
    pub fn segment_ids(&self) -> impl Iterator<Item = (SegmentId, &Segment)> {
        self.segments
            .iter()
            .enumerate()
            .map(|(idx, seg)| (SegmentId(usize_to_u32_saturating(idx)), seg))
    }

    #[must_use]
    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    #[must_use]
    pub fn existing_debug_s(&self) -> Option<SegmentId> {
        self.debug_s
    }

    #[must_use]
    pub fn existing_comdat_debug_s(&self, symbol: SymbolId) -> Option<SegmentId> {
        self.comdat_debug_s.get(&symbol).copied()
    }

    /// COFF section number of `segment` (1-based).
    #[must_use]
    pub fn section_number(segment: SegmentId) -> u16 {
        u16::try_from(segment.0.saturating_add(1)).unwrap_or(u16::MAX)
    }

    fn push_segment(&mut self, name: &str, comdat_of: Option<SymbolId>) -> SegmentId {
        let id = SegmentId(usize_to_u32_saturating(self.segments.len()));
        self.segments.push(Segment {
            name: name.to_string(),
            comdat_of,
            data: Vec::new(),
        });
        id
    }

    fn segment_mut(&mut self, id: SegmentId) -> Result<&mut Segment, ObjectError> {
        self.segments
            .get_mut(id.0 as usize)
            .ok_or(ObjectError::UnknownSegment(id))
    }
}

impl ObjectWriter for MemoryObject {
    fn write_bytes(&mut self, segment: SegmentId, offset: u32, data: &[u8]) -> Result<(), ObjectError> {
        let seg = self.segment_mut(segment)?;
        let begin = offset as usize;
        let end = begin + data.len();
        if seg.data.len() < end {
            seg.data.resize(end, 0);
        }
        seg.data[begin..end].copy_from_slice(data);
        Ok(())
    }

    fn reserve_zeroed(&mut self, segment: SegmentId, offset: u32, length: u32) -> Result<(), ObjectError> {
        let seg = self.segment_mut(segment)?;
        let begin = offset as usize;
        let end = begin + length as usize;
        if seg.data.len() < end {
            seg.data.resize(end, 0);
        }
        seg.data[begin..end].fill(0);
        Ok(())
    }

    fn current_offset(&self, segment: SegmentId) -> Result<u32, ObjectError> {
        self.segment(segment)
            .map(|seg| usize_to_u32_saturating(seg.data.len()))
            .ok_or(ObjectError::UnknownSegment(segment))
    }

    fn debug_s_segment(&mut self) -> SegmentId {
        if let Some(id) = self.debug_s {
            return id;
        }
        let id = self.push_segment(".debug$S", None);
        self.debug_s = Some(id);
        id
    }

    fn debug_t_segment(&mut self) -> SegmentId {
        if let Some(id) = self.debug_t {
            return id;
        }
        let id = self.push_segment(".debug$T", None);
        self.debug_t = Some(id);
        id
    }

    fn comdat_debug_s_segment(&mut self, symbol: SymbolId) -> SegmentId {
        if let Some(id) = self.comdat_debug_s.get(&symbol) {
            return *id;
        }
        let id = self.push_segment(".debug$S", Some(symbol));
        self.comdat_debug_s.insert(symbol, id);
        id
    }

    fn patch_symbol_address(
        &mut self,
        segment: SegmentId,
        offset: u32,
        symbol: SymbolId,
        flags: FixupFlags,
    ) -> Result<(), ObjectError> {
        let address = self.addresses.get(&symbol).copied();
        let seg = self.segment_mut(segment)?;
        let begin = offset as usize;
        let end = begin + flags.width() as usize;
        if end > seg.data.len() {
            return Err(ObjectError::PatchOutOfRange { segment, offset });
        }
        if let Some(address) = address {
            let mut at = begin;
            if flags.contains(FixupFlags::OFF) {
                seg.data[at..at + 4].copy_from_slice(&address.offset.to_le_bytes());
                at += 4;
            }
            if flags.contains(FixupFlags::SEG) {
                let number = Self::section_number(address.segment);
                seg.data[at..at + 2].copy_from_slice(&number.to_le_bytes());
            }
        }
        self.relocations.push(Relocation {
            segment,
            offset,
            symbol,
            flags,
        });
        Ok(())
    }
}
