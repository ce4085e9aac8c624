pub const DEBUG_SECTION_VERSION: u32 = 4;
pub const SUBSECTION_HEADER_SIZE: u32 = 8;

pub const SUBSECTION_SYMBOLS: u32 = 0xf1;
pub const SUBSECTION_LINES: u32 = 0xf2;
pub const SUBSECTION_STRING_TABLE: u32 = 0xf3;
pub const SUBSECTION_FILE_CHECKSUMS: u32 = 0xf4;

pub const S_END: u16 = 0x0006;
pub const S_COMPILAND_V3: u16 = 0x1101;
pub const S_GDATA_V3: u16 = 0x110d;
pub const S_LPROC_V3: u16 = 0x110f;
pub const S_GPROC_V3: u16 = 0x1110;

pub const CHECKSUM_NONE: u16 = 0x0000;
pub const CHECKSUM_MD5: u16 = 0x0110;
pub const MD5_DIGEST_SIZE: usize = 16;

pub const LINE_IS_STATEMENT: u32 = 0x8000_0000;
pub const LINE_PAIR_SIZE: u32 = 8;
pub const LINE_BLOCK_HEADER_SIZE: u32 = 12;

pub const FIRST_USER_TYPE_INDEX: u32 = 0x1000;

#[must_use]
pub fn subsection_name(kind: u32) -> &'static str {
    match kind {
        SUBSECTION_SYMBOLS => "symbols",
        SUBSECTION_LINES => "lines",
        SUBSECTION_STRING_TABLE => "string table",
        SUBSECTION_FILE_CHECKSUMS => "file checksums",
        _ => "unknown",
    }
}

#[must_use]
pub fn symbol_kind_name(kind: u16) -> &'static str {
    match kind {
        S_END => "S_END",
        S_COMPILAND_V3 => "S_COMPILAND_V3",
        S_GDATA_V3 => "S_GDATA_V3",
        S_LPROC_V3 => "S_LPROC_V3",
        S_GPROC_V3 => "S_GPROC_V3",
        _ => "S_UNKNOWN",
    }
}

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_cstr(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s);
    out.push(0);
}

pub(crate) fn read_u16_le(bytes: &[u8], at: usize) -> Option<u16> {
    let b = bytes.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn read_u32_le(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn usize_to_u32_saturating(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
