use crate::codeview::{
    CHECKSUM_MD5, DEBUG_SECTION_VERSION, MD5_DIGEST_SIZE, SUBSECTION_HEADER_SIZE,
};
use crate::emitter::LinePair;
use crate::format::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsection<'a> {
    /// Offset of the subsection header within the section.
    pub offset: u32,
    pub kind: u32,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRecord<'a> {
    pub offset: u32,
    pub kind: u16,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBlock {
    pub function_offset: u32,
    pub function_segment: u16,
    pub code_length: u32,
    pub file_record: u32,
    pub block_length: u32,
    pub pairs: Vec<LinePair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub offset: u32,
    pub path_offset: u32,
    pub checksum_kind: u16,
    pub md5: Option<[u8; MD5_DIGEST_SIZE]>,
}

/// Splits a `.debug$S` section into its subsections.
///
/// # Errors
/// Returns `FormatError` when the version header is wrong or a subsection
/// runs past the end of `input`.
pub fn parse_debug_s(input: &[u8]) -> Result<Vec<Subsection<'_>>, FormatError> {
    let mut reader = Reader::new(input);
    let version = reader.read_u32_le()?;
    if version != DEBUG_SECTION_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let mut out = Vec::new();
    while !reader.is_eof() {
        let offset = reader.position();
        let kind = reader.read_u32_le()?;
        let length = reader.read_u32_le()?;
        let payload = reader.read_bytes(length as usize)?;
        reader.align4();
        out.push(Subsection {
            offset,
            kind,
            payload,
        });
    }
    Ok(out)
}

/// Offset within the section of byte `at` of `subsection`'s payload.
#[must_use]
pub fn section_offset(subsection: &Subsection<'_>, at: u32) -> u32 {
    subsection.offset + SUBSECTION_HEADER_SIZE + at
}

/// Splits a symbol subsection payload into `{length, kind, body}` records.
///
/// # Errors
/// Returns `FormatError::UnexpectedEof` on a truncated record.
pub fn parse_symbol_records(payload: &[u8]) -> Result<Vec<SymbolRecord<'_>>, FormatError> {
    let mut reader = Reader::new(payload);
    let mut out = Vec::new();
    while !reader.is_eof() {
        let offset = reader.position();
        let reclen = reader.read_u16_le()?;
        if reclen < 2 {
            return Err(FormatError::UnexpectedEof);
        }
        let kind = reader.read_u16_le()?;
        let body = reader.read_bytes(usize::from(reclen) - 2)?;
        out.push(SymbolRecord { offset, kind, body });
    }
    Ok(out)
}

/// # Errors
/// Returns `FormatError::UnexpectedEof` on a truncated block.
pub fn parse_line_block(payload: &[u8]) -> Result<LineBlock, FormatError> {
    let mut reader = Reader::new(payload);
    let function_offset = reader.read_u32_le()?;
    let function_segment = reader.read_u16_le()?;
    let _flags = reader.read_u16_le()?;
    let code_length = reader.read_u32_le()?;
    let file_record = reader.read_u32_le()?;
    let count = reader.read_u32_le()?;
    let block_length = reader.read_u32_le()?;
    let mut pairs = Vec::new();
    for _ in 0..count {
        let code_offset = reader.read_u32_le()?;
        let line = reader.read_u32_le()?;
        pairs.push(LinePair { code_offset, line });
    }
    Ok(LineBlock {
        function_offset,
        function_segment,
        code_length,
        file_record,
        block_length,
        pairs,
    })
}

/// # Errors
/// Returns `FormatError::UnexpectedEof` on a truncated record.
pub fn parse_file_records(payload: &[u8]) -> Result<Vec<FileRecord>, FormatError> {
    let mut reader = Reader::new(payload);
    let mut out = Vec::new();
    while !reader.is_eof() {
        let offset = reader.position();
        let path_offset = reader.read_u32_le()?;
        let checksum_kind = reader.read_u16_le()?;
        let md5 = if checksum_kind == CHECKSUM_MD5 {
            let mut digest = [0u8; MD5_DIGEST_SIZE];
            digest.copy_from_slice(reader.read_bytes(MD5_DIGEST_SIZE)?);
            Some(digest)
        } else {
            None
        };
        let _pad = reader.read_u16_le()?;
        out.push(FileRecord {
            offset,
            path_offset,
            checksum_kind,
            md5,
        });
    }
    Ok(out)
}

/// Null-terminated string starting at `offset` of a string table.
///
/// # Errors
/// Returns `FormatError` when `offset` is out of range or the string is
/// unterminated.
pub fn string_at(table: &[u8], offset: u32) -> Result<&[u8], FormatError> {
    let mut reader = Reader::new(table);
    reader.seek(offset as usize)?;
    reader.read_cstring()
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn position(&self) -> u32 {
        u32::try_from(self.pos).unwrap_or(u32::MAX)
    }

    fn seek(&mut self, pos: usize) -> Result<(), FormatError> {
        if pos > self.input.len() {
            return Err(FormatError::UnexpectedEof);
        }
        self.pos = pos;
        Ok(())
    }

    fn read_u16_le(&mut self) -> Result<u16, FormatError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32_le(&mut self) -> Result<u32, FormatError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, size: usize) -> Result<&'a [u8], FormatError> {
        if self.pos + size > self.input.len() {
            return Err(FormatError::UnexpectedEof);
        }
        let begin = self.pos;
        self.pos += size;
        Ok(&self.input[begin..self.pos])
    }

    fn read_cstring(&mut self) -> Result<&'a [u8], FormatError> {
        let begin = self.pos;
        while self.pos < self.input.len() {
            if self.input[self.pos] == 0 {
                let value = &self.input[begin..self.pos];
                self.pos += 1;
                return Ok(value);
            }
            self.pos += 1;
        }
        Err(FormatError::UnterminatedString)
    }

    fn align4(&mut self) {
        self.pos = (self.pos + 3) & !3;
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_debug_s, parse_file_records, parse_symbol_records, string_at};
    use crate::format::FormatError;

    #[test]
    fn splits_padded_subsections() {
        let data: &[u8] = &[
            0x04, 0x00, 0x00, 0x00, // version
            0xf3, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, // string table, 5 bytes
            0x00, b'a', b'.', b'd', 0x00, 0x00, 0x00, 0x00, // payload + pad
            0xf4, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, // file records, 8 bytes
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let subsections = parse_debug_s(data).expect("parse should succeed");
        assert_eq!(subsections.len(), 2);
        assert_eq!(subsections[0].offset, 4);
        assert_eq!(subsections[0].kind, 0xf3);
        assert_eq!(string_at(subsections[0].payload, 1), Ok(b"a.d".as_slice()));
        assert_eq!(subsections[1].offset, 20);

        let records = parse_file_records(subsections[1].payload).expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path_offset, 1);
        assert_eq!(records[0].md5, None);
    }

    #[test]
    fn rejects_wrong_version_and_truncation() {
        assert_eq!(parse_debug_s(&[2, 0, 0, 0]), Err(FormatError::UnsupportedVersion(2)));
        assert_eq!(
            parse_debug_s(&[4, 0, 0, 0, 0xf1, 0, 0, 0, 9, 0, 0, 0, 1]),
            Err(FormatError::UnexpectedEof)
        );
        assert_eq!(string_at(b"\0ab", 1), Err(FormatError::UnterminatedString));
    }

    #[test]
    fn splits_symbol_records() {
        let data: &[u8] = &[0x04, 0x00, 0x01, 0x11, 0xaa, 0xbb, 0x02, 0x00, 0x06, 0x00];
        let records = parse_symbol_records(data).expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, 0x1101);
        assert_eq!(records[0].body, &[0xaa, 0xbb]);
        assert_eq!(records[1].offset, 6);
        assert!(records[1].body.is_empty());
    }
}
