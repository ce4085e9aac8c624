use crate::codeview::{
    put_cstr, put_u16, put_u32, read_u16_le, read_u32_le, usize_to_u32_saturating, CHECKSUM_MD5,
    CHECKSUM_NONE, MD5_DIGEST_SIZE,
};

/// Source file names (`0xF3`) and the per-file records (`0xF4`) that refer
/// to them.
///
/// Lookups are linear scans over the serialized tables; a compiland only
/// ever names a handful of files. Returned offsets are byte offsets into the
/// tables and stay valid until the next [`FileTable::reset`].
#[derive(Debug, Default)]
pub struct FileTable {
    paths: Vec<u8>,
    records: Vec<u8>,
}

impl FileTable {
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self::default();
        table.reset();
        table
    }

    /// Empties both tables, keeping their allocations. Offset 0 of the path
    /// table is the "no file" entry.
    pub fn reset(&mut self) {
        self.paths.clear();
        self.paths.push(0);
        self.records.clear();
    }

    /// Adds `path` if it is not already known and returns the offset of its
    /// file record.
    pub fn add_file(&mut self, path: &[u8]) -> u32 {
        self.add_file_with_checksum(path, None)
    }

    /// Like [`FileTable::add_file`], storing `md5` in a newly created
    /// record. An existing record keeps whatever checksum it was created with.
    pub fn add_file_with_checksum(&mut self, path: &[u8], md5: Option<&[u8; MD5_DIGEST_SIZE]>) -> u32 {
        let path_offset = self.intern_path(path);
        if let Some(record) = self.find_record(path_offset) {
            tracing::trace!(path = %String::from_utf8_lossy(path), record, "file already present");
            return record;
        }

        let record = usize_to_u32_saturating(self.records.len());
        put_u32(&mut self.records, path_offset);
        match md5 {
            Some(digest) => {
                put_u16(&mut self.records, CHECKSUM_MD5);
                self.records.extend_from_slice(digest);
            }
            None => put_u16(&mut self.records, CHECKSUM_NONE),
        }
        put_u16(&mut self.records, 0);
        tracing::trace!(path = %String::from_utf8_lossy(path), path_offset, record, "file added");
        record
    }

    /// Offset of `path` in the path table, appending it when missing.
    pub fn intern_path(&mut self, path: &[u8]) -> u32 {
        let length = self.paths.len();
        let mut off = 1usize;
        while off + path.len() < length {
            if self.paths[off..off + path.len()] == *path && self.paths[off + path.len()] == 0 {
                return usize_to_u32_saturating(off);
            }
            let Some(nul) = self.paths[off..].iter().position(|b| *b == 0) else {
                break;
            };
            off += nul + 1;
        }
        put_cstr(&mut self.paths, path);
        usize_to_u32_saturating(length)
    }

    /// Offset of the file record referring to `path_offset`.
    #[must_use]
    pub fn find_record(&self, path_offset: u32) -> Option<u32> {
        let length = self.records.len();
        let mut u = 0usize;
        while u + 8 <= length {
            if read_u32_le(&self.records, u)? == path_offset {
                return Some(usize_to_u32_saturating(u));
            }
            u += 4;
            let kind = read_u16_le(&self.records, u)?;
            u += 2;
            if kind == CHECKSUM_MD5 {
                u += MD5_DIGEST_SIZE;
            }
            u += 2;
        }
        None
    }

    #[must_use]
    pub fn paths(&self) -> &[u8] {
        &self.paths
    }

    #[must_use]
    pub fn records(&self) -> &[u8] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::FileTable;

    #[test]
    fn same_path_yields_same_offsets() {
        let mut table = FileTable::new();
        let a = table.add_file(b"a.d");
        let b = table.add_file(b"b.d");
        assert_eq!(table.add_file(b"a.d"), a);
        assert_eq!(table.add_file(b"b.d"), b);
        assert_ne!(a, b);
        assert_eq!(table.paths(), b"\0a.d\0b.d\0");
        assert_eq!(table.records(), &[1, 0, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn prefix_paths_are_distinct() {
        let mut table = FileTable::new();
        assert_eq!(table.intern_path(b"ab.d"), 1);
        assert_eq!(table.intern_path(b"ab"), 6);
        assert_eq!(table.intern_path(b"b.d"), 9);
        assert_eq!(table.intern_path(b"ab"), 6);
    }

    #[test]
    fn record_scan_skips_md5_digests() {
        let mut table = FileTable::new();
        let digest = [0xaa; 16];
        let a = table.add_file_with_checksum(b"a.d", Some(&digest));
        let b = table.add_file(b"b.d");
        assert_eq!(a, 0);
        assert_eq!(b, 24);
        assert_eq!(table.add_file(b"b.d"), 24);
        assert_eq!(table.add_file_with_checksum(b"a.d", None), 0);
        assert_eq!(&table.records()[4..6], &[0x10, 0x01]);
        assert_eq!(&table.records()[6..22], &digest);
    }

    #[test]
    fn reset_reinstates_sentinel() {
        let mut table = FileTable::new();
        table.add_file(b"a.d");
        table.reset();
        assert_eq!(table.paths(), b"\0");
        assert!(table.records().is_empty());
        assert_eq!(table.add_file(b"c.d"), 0);
    }
}
