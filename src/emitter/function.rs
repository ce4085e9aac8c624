use crate::codeview::{
    put_cstr, put_u16, put_u32, usize_to_u32_saturating, LINE_IS_STATEMENT, S_END, S_GPROC_V3,
    S_LPROC_V3,
};
use crate::symbol::{SourcePos, StorageClass, Symbol, SymbolId};

use super::fixup::FixupLedger;
use super::EmitError;

/// One `(code offset, line)` entry of a line table. `line` carries the
/// is-statement bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePair {
    pub code_offset: u32,
    pub line: u32,
}

impl LinePair {
    #[must_use]
    pub fn statement(code_offset: u32, line: u32) -> Self {
        Self {
            code_offset,
            line: line | LINE_IS_STATEMENT,
        }
    }

    pub(crate) fn write_to(self, out: &mut Vec<u8>) {
        put_u32(out, self.code_offset);
        put_u32(out, self.line);
    }
}

/// Symbol-record buffer together with the fixups pointing into it.
#[derive(Debug, Default)]
pub struct SymbolSink {
    pub buf: Vec<u8>,
    pub fixups: FixupLedger,
}

impl SymbolSink {
    pub fn clear(&mut self) {
        self.buf.clear();
        self.fixups.clear();
    }

    /// Reserves a 6-byte `seg:offset` field referring to `symbol`.
    pub fn push_address(&mut self, symbol: SymbolId) {
        self.fixups.record(symbol, usize_to_u32_saturating(self.buf.len()));
        put_u32(&mut self.buf, 0);
        put_u16(&mut self.buf, 0);
    }
}

/// Where a function's symbol record goes.
#[derive(Debug)]
pub enum RecordTarget {
    Shared,
    /// Link-once functions keep their record apart so it can follow the
    /// function into its own section.
    Private(SymbolSink),
}

/// Code layout numbers reported when a function is finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionExtent {
    pub code_length: u32,
    pub prolog_size: u32,
    pub epilog_offset: u32,
}

/// Everything collected for one finished function.
#[derive(Debug)]
pub struct FuncData {
    pub symbol: SymbolId,
    pub comdat: bool,
    pub code_length: u32,
    pub file_record: u32,
    pub line_start: usize,
    pub line_count: usize,
    pub target: RecordTarget,
}

impl FuncData {
    #[must_use]
    pub fn lines<'a>(&self, pairs: &'a [LinePair]) -> &'a [LinePair] {
        &pairs[self.line_start..self.line_start + self.line_count]
    }
}

#[derive(Debug)]
struct OpenFunction {
    symbol: SymbolId,
    comdat: bool,
    source_file: Option<Vec<u8>>,
    file_record: u32,
    line_start: usize,
    line_count: usize,
    target: RecordTarget,
}

/// Collects the line table and symbol record of the function being emitted.
/// At most one function is open at a time.
#[derive(Debug, Default)]
pub struct FunctionRecordBuilder {
    open: Option<OpenFunction>,
    next_line_start: usize,
}

impl FunctionRecordBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.open = None;
        self.next_line_start = 0;
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    #[must_use]
    pub fn open_symbol(&self) -> Option<SymbolId> {
        self.open.as_ref().map(|open| open.symbol)
    }

    /// Opens `symbol`. Its file record stays 0 until a line event names its
    /// source file.
    ///
    /// # Errors
    /// Returns `EmitError::FunctionAlreadyOpen` when another function has not
    /// been ended.
    pub fn start(&mut self, symbol: &Symbol) -> Result<(), EmitError> {
        if let Some(open) = &self.open {
            return Err(EmitError::FunctionAlreadyOpen { open: open.symbol });
        }
        let target = if symbol.comdat {
            RecordTarget::Private(SymbolSink::default())
        } else {
            RecordTarget::Shared
        };
        self.open = Some(OpenFunction {
            symbol: symbol.id,
            comdat: symbol.comdat,
            source_file: None,
            file_record: 0,
            line_start: self.next_line_start,
            line_count: 0,
            target,
        });
        Ok(())
    }

    /// Appends a line pair. The first call fixes the function's source file;
    /// positions in any other file are dropped and `false` is returned.
    ///
    /// # Errors
    /// Returns `EmitError::NoOpenFunction` outside a function.
    pub fn record_line<F>(
        &mut self,
        pos: &SourcePos,
        code_offset: u32,
        lines: &mut Vec<LinePair>,
        add_file: F,
    ) -> Result<bool, EmitError>
    where
        F: FnOnce(&[u8]) -> u32,
    {
        let open = self.open.as_mut().ok_or(EmitError::NoOpenFunction)?;
        if let Some(file) = &open.source_file {
            if *file != pos.file {
                return Ok(false);
            }
        } else {
            open.file_record = add_file(&pos.file);
            open.source_file = Some(pos.file.clone());
        }
        lines.push(LinePair::statement(code_offset, pos.line));
        open.line_count += 1;
        Ok(true)
    }

    /// Closes `symbol`, writes its procedure record and returns the collected
    /// data. Non-link-once records go to `shared`. `type_index` is only
    /// called once `symbol` is known to be the open function.
    ///
    /// # Errors
    /// Returns `EmitError::NoOpenFunction` or `EmitError::FunctionMismatch`
    /// when `symbol` is not the open function, and `EmitError::RecordTooLong`
    /// when its name does not fit a record.
    pub fn end<F>(
        &mut self,
        symbol: &Symbol,
        extent: FunctionExtent,
        type_index: F,
        shared: &mut SymbolSink,
    ) -> Result<FuncData, EmitError>
    where
        F: FnOnce() -> u32,
    {
        let mut open = self.open.take().ok_or(EmitError::NoOpenFunction)?;
        if open.symbol != symbol.id {
            let err = EmitError::FunctionMismatch {
                open: open.symbol,
                ended: symbol.id,
            };
            self.open = Some(open);
            return Err(err);
        }
        self.next_line_start = open.line_start + open.line_count;

        let sink = match &mut open.target {
            RecordTarget::Shared => shared,
            RecordTarget::Private(sink) => sink,
        };
        write_proc_record(sink, symbol, extent, type_index())?;

        Ok(FuncData {
            symbol: open.symbol,
            comdat: open.comdat,
            code_length: extent.code_length,
            file_record: open.file_record,
            line_start: open.line_start,
            line_count: open.line_count,
            target: open.target,
        })
    }
}

/// Writes an `S_GPROC_V3`/`S_LPROC_V3` record followed by `S_END`.
fn write_proc_record(
    sink: &mut SymbolSink,
    symbol: &Symbol,
    extent: FunctionExtent,
    type_index: u32,
) -> Result<(), EmitError> {
    let name = symbol.display_name();
    let reclen = u16::try_from(2 + 4 * 7 + 6 + 1 + name.len() + 1)
        .map_err(|_| EmitError::RecordTooLong { symbol: symbol.id })?;
    let kind = if symbol.class == StorageClass::Static {
        S_LPROC_V3
    } else {
        S_GPROC_V3
    };

    let buf = &mut sink.buf;
    buf.reserve(2 + usize::from(reclen) + 4);
    put_u16(buf, reclen);
    put_u16(buf, kind);
    put_u32(buf, 0); // parent
    put_u32(buf, 0); // pend
    put_u32(buf, 0); // pnext
    put_u32(buf, extent.code_length);
    put_u32(buf, extent.prolog_size);
    put_u32(buf, extent.epilog_offset);
    put_u32(buf, type_index);
    sink.push_address(symbol.id);
    sink.buf.push(0); // flags
    put_cstr(&mut sink.buf, name);

    put_u16(&mut sink.buf, 2);
    put_u16(&mut sink.buf, S_END);
    Ok(())
}
