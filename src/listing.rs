use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::{Context, Result};

use crate::codeview::{
    read_u16_le, read_u32_le, subsection_name, symbol_kind_name, usize_to_u32_saturating,
    LINE_IS_STATEMENT, SUBSECTION_FILE_CHECKSUMS, SUBSECTION_LINES, SUBSECTION_STRING_TABLE,
    SUBSECTION_SYMBOLS, S_COMPILAND_V3, S_GDATA_V3, S_GPROC_V3, S_LPROC_V3,
};
use crate::format::subsection::{
    parse_debug_s, parse_file_records, parse_line_block, parse_symbol_records, string_at,
    Subsection,
};
use crate::format::FormatError;
use crate::object::{MemoryObject, SegmentId};
use crate::symbol::SymbolId;

/// Writes a listing of every segment of `obj`.
///
/// # Errors
/// Returns an error when writing `output_path` fails.
pub fn write_listing(
    output_path: &str,
    obj: &MemoryObject,
    names: &HashMap<SymbolId, Vec<u8>>,
) -> Result<()> {
    let text = build_listing_text(obj, names);
    std::fs::write(output_path, text).with_context(|| format!("failed to write {output_path}"))?;
    Ok(())
}

#[must_use]
pub fn build_listing_text(obj: &MemoryObject, names: &HashMap<SymbolId, Vec<u8>>) -> String {
    let mut out = String::new();
    for (id, seg) in obj.segment_ids() {
        out.push_str("==========================================================\n");
        let _ = write!(out, "{} #{}", seg.name, MemoryObject::section_number(id));
        if let Some(owner) = seg.comdat_of {
            let _ = write!(out, " (associated with {})", symbol_name(names, owner));
        }
        let _ = writeln!(out, " size={:#x}", seg.data.len());

        if seg.name == ".debug$S" {
            if let Err(err) = list_debug_s(&mut out, &seg.data) {
                let _ = writeln!(out, "  <malformed: {err}>");
            }
        }
        list_relocations(&mut out, obj, id, names);
    }
    out
}

fn list_debug_s(out: &mut String, data: &[u8]) -> Result<(), FormatError> {
    let subsections = parse_debug_s(data)?;
    let strings = subsections
        .iter()
        .find(|s| s.kind == SUBSECTION_STRING_TABLE)
        .map(|s| s.payload);

    for sub in &subsections {
        let _ = writeln!(
            out,
            "  {:08x} {:#04x} {} length={:#x}",
            sub.offset,
            sub.kind,
            subsection_name(sub.kind),
            sub.payload.len()
        );
        match sub.kind {
            SUBSECTION_SYMBOLS => list_symbols(out, sub)?,
            SUBSECTION_LINES => {
                let block = parse_line_block(sub.payload)?;
                let _ = writeln!(
                    out,
                    "    function {:04x}:{:08x} length={:#x} file={:#x}",
                    block.function_segment, block.function_offset, block.code_length, block.file_record
                );
                for pair in &block.pairs {
                    let statement = if pair.line & LINE_IS_STATEMENT != 0 { "" } else { " (expr)" };
                    let _ = writeln!(
                        out,
                        "      {:08x} line {}{statement}",
                        pair.code_offset,
                        pair.line & !LINE_IS_STATEMENT
                    );
                }
            }
            SUBSECTION_STRING_TABLE => {
                let mut off = 1u32;
                while (off as usize) < sub.payload.len() {
                    let s = string_at(sub.payload, off)?;
                    let _ = writeln!(out, "    {off:08x} {}", String::from_utf8_lossy(s));
                    off = off.saturating_add(usize_to_u32_saturating(s.len())).saturating_add(1);
                }
            }
            SUBSECTION_FILE_CHECKSUMS => {
                for record in parse_file_records(sub.payload)? {
                    let path = strings
                        .and_then(|t| string_at(t, record.path_offset).ok())
                        .map(|p| String::from_utf8_lossy(p).to_string())
                        .unwrap_or_default();
                    let _ = write!(out, "    {:08x} {path}", record.offset);
                    if let Some(md5) = record.md5 {
                        out.push_str(" md5=");
                        for b in md5 {
                            let _ = write!(out, "{b:02x}");
                        }
                    }
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn list_symbols(out: &mut String, sub: &Subsection<'_>) -> Result<(), FormatError> {
    for record in parse_symbol_records(sub.payload)? {
        let name_at = match record.kind {
            S_COMPILAND_V3 => Some(4),
            S_GPROC_V3 | S_LPROC_V3 => Some(35),
            S_GDATA_V3 => Some(10),
            _ => None,
        };
        let _ = write!(out, "    {:04x} {}", record.offset, symbol_kind_name(record.kind));
        if let Some(at) = name_at {
            let name = record
                .body
                .get(at..)
                .and_then(|rest| rest.split(|b| *b == 0).next())
                .unwrap_or_default();
            let _ = write!(out, " {}", String::from_utf8_lossy(name));
        }
        if matches!(record.kind, S_GPROC_V3 | S_LPROC_V3) {
            if let Some(length) = read_u32_le(record.body, 12) {
                let _ = write!(out, " length={length:#x}");
            }
            if let (Some(off), Some(seg)) = (read_u32_le(record.body, 28), read_u16_le(record.body, 32)) {
                let _ = write!(out, " at {seg:04x}:{off:08x}");
            }
        }
        out.push('\n');
    }
    Ok(())
}

fn list_relocations(out: &mut String, obj: &MemoryObject, segment: SegmentId, names: &HashMap<SymbolId, Vec<u8>>) {
    for reloc in obj.relocations().iter().filter(|r| r.segment == segment) {
        let _ = writeln!(
            out,
            "  reloc {:08x} -> {} ({:?})",
            reloc.offset,
            symbol_name(names, reloc.symbol),
            reloc.flags
        );
    }
}

fn symbol_name(names: &HashMap<SymbolId, Vec<u8>>, id: SymbolId) -> String {
    names
        .get(&id)
        .map_or_else(|| format!("#{}", id.0), |n| String::from_utf8_lossy(n).to_string())
}
