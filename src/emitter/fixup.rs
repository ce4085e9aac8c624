use crate::codeview::SUBSECTION_HEADER_SIZE;
use crate::object::{FixupFlags, ObjectError, ObjectWriter, SegmentId};
use crate::symbol::SymbolId;

/// Address field inside a subsection payload that must point at `symbol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub symbol: SymbolId,
    pub offset: u32,
}

#[derive(Debug, Default)]
pub struct FixupLedger {
    entries: Vec<Fixup>,
}

impl FixupLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, symbol: SymbolId, offset: u32) {
        self.entries.push(Fixup { symbol, offset });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[Fixup] {
        &self.entries
    }
}

/// Patches every fixup of `ledger` against a payload whose subsection starts
/// at `section_base` in `segment`, leaving the ledger empty.
///
/// # Errors
/// Returns `ObjectError` when a patched field falls outside `segment`.
pub fn resolve_fixups(
    obj: &mut dyn ObjectWriter,
    segment: SegmentId,
    ledger: &mut FixupLedger,
    section_base: u32,
) -> Result<usize, ObjectError> {
    let count = ledger.entries.len();
    for fixup in ledger.entries.drain(..) {
        let at = payload_field_offset(section_base, fixup.offset);
        obj.patch_symbol_address(segment, at, fixup.symbol, FixupFlags::SEG | FixupFlags::OFF)?;
    }
    tracing::trace!(?segment, section_base, count, "fixups resolved");
    Ok(count)
}

/// Offset in the segment of `payload_offset` within a subsection written at
/// `section_base`.
#[must_use]
pub fn payload_field_offset(section_base: u32, payload_offset: u32) -> u32 {
    section_base + SUBSECTION_HEADER_SIZE + payload_offset
}
