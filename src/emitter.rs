//! `.debug$S` emission for MS-COFF objects.
//!
//! An [`Emitter`] owns the buffers that outlive a single object file. Each
//! object file is produced by one [`DebugInfoSession`], which borrows the
//! emitter and the object writer for its whole life:
//!
//! ```text
//! init_file -> (init_module -> (func_start -> linnum* -> func_term)* -> term_module)* -> term_file
//! ```
//!
//! Nothing reaches the object file before [`DebugInfoSession::term_file`].

use std::collections::HashMap;

use thiserror::Error;

use crate::codeview::{
    put_cstr, put_u16, put_u32, usize_to_u32_saturating, DEBUG_SECTION_VERSION, LINE_BLOCK_HEADER_SIZE,
    LINE_PAIR_SIZE, MD5_DIGEST_SIZE, SUBSECTION_FILE_CHECKSUMS, SUBSECTION_LINES,
    SUBSECTION_STRING_TABLE, SUBSECTION_SYMBOLS, S_COMPILAND_V3, S_GDATA_V3,
};
use crate::object::{FixupFlags, ObjectError, ObjectWriter};
use crate::symbol::{SourcePos, StorageClass, Symbol, SymbolId};
use crate::types::TypeTable;

mod file_table;
mod fixup;
mod function;
mod section;

pub use file_table::FileTable;
pub use fixup::{payload_field_offset, resolve_fixups, Fixup, FixupLedger};
pub use function::{FuncData, FunctionExtent, FunctionRecordBuilder, LinePair, RecordTarget, SymbolSink};
pub use section::{padding, write_section};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("function {ended:?} ended while {open:?} is open")]
    FunctionMismatch { open: SymbolId, ended: SymbolId },
    #[error("no function is open")]
    NoOpenFunction,
    #[error("function {open:?} is still open")]
    FunctionAlreadyOpen { open: SymbolId },
    #[error("debug info is only generated for Win64 targets (got {0:?})")]
    UnsupportedTarget(TargetAbi),
    #[error("record for symbol {symbol:?} exceeds the 16-bit record length")]
    RecordTooLong { symbol: SymbolId },
    #[error("object file name exceeds the 16-bit record length")]
    ObjectNameTooLong,
    #[error(transparent)]
    Object(#[from] ObjectError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetAbi {
    Win32,
    #[default]
    Win64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugConfig {
    pub target: TargetAbi,
    /// Emit `S_GDATA_V3` records for global data symbols.
    pub emit_global_data_symbols: bool,
    /// Store registered MD5 digests in newly created file records.
    pub md5_checksums: bool,
}

/// What one finished session put into the object file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub functions: usize,
    pub line_pairs: usize,
    pub comdat_sections: usize,
    pub fixups: usize,
}

/// Buffers shared by consecutive sessions; they are emptied, not
/// reallocated, when a new object file starts.
#[derive(Debug, Default)]
pub struct Emitter {
    config: DebugConfig,
    shared: SymbolSink,
    files: FileTable,
    lines: Vec<LinePair>,
    funcs: Vec<FuncData>,
    builder: FunctionRecordBuilder,
    checksums: HashMap<Vec<u8>, [u8; MD5_DIGEST_SIZE]>,
}

impl Emitter {
    #[must_use]
    pub fn new(config: DebugConfig) -> Self {
        Self {
            config,
            files: FileTable::new(),
            ..Self::default()
        }
    }

    /// Starts debug info for the object file `object_name`.
    pub fn init_file<'a, O, T>(
        &'a mut self,
        obj: &'a mut O,
        types: &'a mut T,
        object_name: &[u8],
    ) -> DebugInfoSession<'a, O, T>
    where
        O: ObjectWriter,
        T: TypeTable,
    {
        tracing::debug!(object = %String::from_utf8_lossy(object_name), "init file");
        self.shared.clear();
        self.files.reset();
        self.lines.clear();
        self.funcs.clear();
        self.builder.reset();
        self.checksums.clear();
        types.init();
        DebugInfoSession {
            state: self,
            obj,
            types,
            object_name: object_name.to_vec(),
        }
    }
}

/// Debug info of one object file under construction.
pub struct DebugInfoSession<'a, O: ObjectWriter, T: TypeTable> {
    state: &'a mut Emitter,
    obj: &'a mut O,
    types: &'a mut T,
    object_name: Vec<u8>,
}

impl<O: ObjectWriter, T: TypeTable> DebugInfoSession<'_, O, T> {
    /// Registers the MD5 digest of `path` for use when its file record is
    /// created.
    pub fn set_file_checksum(&mut self, path: &[u8], digest: [u8; MD5_DIGEST_SIZE]) {
        self.state.checksums.insert(path.to_vec(), digest);
    }

    /// Returns the file record offset of `path`, adding it if needed.
    pub fn add_file(&mut self, path: &[u8]) -> u32 {
        let Emitter {
            config,
            files,
            checksums,
            ..
        } = &mut *self.state;
        add_file(config, files, checksums, path)
    }

    /// Enters the module's source file in the file tables.
    pub fn init_module(&mut self, source_file: &[u8], module_name: &[u8]) {
        tracing::debug!(
            source = %String::from_utf8_lossy(source_file),
            module = %String::from_utf8_lossy(module_name),
            "init module"
        );
        self.add_file(source_file);
    }

    /// # Errors
    /// Returns `EmitError::UnsupportedTarget` unless the target is Win64.
    pub fn term_module(&mut self) -> Result<(), EmitError> {
        tracing::debug!("term module");
        match self.state.config.target {
            TargetAbi::Win64 => Ok(()),
            other => Err(EmitError::UnsupportedTarget(other)),
        }
    }

    /// # Errors
    /// Returns `EmitError::FunctionAlreadyOpen` when the previous function
    /// was not ended.
    pub fn func_start(&mut self, function: &Symbol) -> Result<(), EmitError> {
        tracing::trace!(
            function = %String::from_utf8_lossy(&function.ident),
            comdat = function.comdat,
            "func start"
        );
        self.state.builder.start(function)
    }

    /// Records that code at `code_offset` belongs to `pos`. Returns `false`
    /// when the position was dropped because it names a different file than
    /// the function's first line.
    ///
    /// # Errors
    /// Returns `EmitError::NoOpenFunction` outside a function.
    pub fn linnum(&mut self, pos: &SourcePos, code_offset: u32) -> Result<bool, EmitError> {
        let Emitter {
            config,
            files,
            checksums,
            lines,
            builder,
            ..
        } = &mut *self.state;
        let recorded = builder.record_line(pos, code_offset, lines, |path| {
            add_file(config, files, checksums, path)
        })?;
        if !recorded {
            tracing::trace!(
                file = %String::from_utf8_lossy(&pos.file),
                line = pos.line,
                "line from another file dropped"
            );
        }
        Ok(recorded)
    }

    /// # Errors
    /// Returns `EmitError` when `function` is not the open function or its
    /// record cannot be encoded.
    pub fn func_term(&mut self, function: &Symbol, extent: FunctionExtent) -> Result<(), EmitError> {
        let types = &mut *self.types;
        let Emitter {
            builder, shared, funcs, ..
        } = &mut *self.state;
        let data = builder.end(function, extent, || types.intern(&function.ty), shared)?;
        tracing::debug!(
            function = %String::from_utf8_lossy(&function.ident),
            code_length = extent.code_length,
            lines = data.line_count,
            "func term"
        );
        funcs.push(data);
        Ok(())
    }

    /// Emits the debug record of a data symbol.
    ///
    /// # Errors
    /// Returns `EmitError::RecordTooLong` when the name does not fit a record.
    pub fn out_symbol(&mut self, symbol: &Symbol) -> Result<(), EmitError> {
        if symbol.no_debug || !self.state.config.emit_global_data_symbols {
            return Ok(());
        }
        let type_index = self.types.intern(&symbol.ty);
        if symbol.class == StorageClass::Global {
            write_data_record(&mut self.state.shared, symbol, type_index)?;
        }
        Ok(())
    }

    /// Writes everything collected into the object file.
    ///
    /// # Errors
    /// Returns `EmitError` when a function is still open, a record cannot be
    /// encoded, or the object writer rejects the output.
    pub fn term_file(self) -> Result<SessionSummary, EmitError> {
        let Self {
            state,
            obj,
            types,
            object_name,
        } = self;
        let Emitter {
            shared,
            files,
            lines,
            funcs,
            builder,
            ..
        } = state;
        if let Some(open) = builder.open_symbol() {
            return Err(EmitError::FunctionAlreadyOpen { open });
        }

        let mut summary = SessionSummary {
            functions: funcs.len(),
            line_pairs: lines.len(),
            ..SessionSummary::default()
        };
        let compiland = compiland_record(&object_name)?;
        let seg = obj.debug_s_segment();
        let version = DEBUG_SECTION_VERSION.to_le_bytes();
        obj.write_bytes(seg, 0, &version)?;
        write_section(&mut *obj, seg, SUBSECTION_SYMBOLS, &compiland)?;

        let mut block = Vec::new();
        for fd in funcs.iter_mut() {
            block.clear();
            let pairs = fd.lines(lines.as_slice());
            let pair_count = usize_to_u32_saturating(pairs.len());
            put_u32(&mut block, 0); // function start, patched below
            put_u32(&mut block, 0);
            put_u32(&mut block, fd.code_length);
            put_u32(&mut block, fd.file_record);
            put_u32(&mut block, pair_count);
            put_u32(&mut block, pair_count * LINE_PAIR_SIZE + LINE_BLOCK_HEADER_SIZE);
            for pair in pairs {
                pair.write_to(&mut block);
            }

            let block_seg = if fd.comdat {
                let comdat_seg = obj.comdat_debug_s_segment(fd.symbol);
                obj.write_bytes(comdat_seg, 0, &version)?;
                summary.comdat_sections += 1;
                comdat_seg
            } else {
                seg
            };

            let base = write_section(&mut *obj, block_seg, SUBSECTION_LINES, &block)?;
            obj.patch_symbol_address(
                block_seg,
                payload_field_offset(base, 0),
                fd.symbol,
                FixupFlags::SEG | FixupFlags::OFF,
            )?;
            summary.fixups += 1;

            if block_seg != seg {
                if let RecordTarget::Private(sink) = &mut fd.target {
                    if !sink.buf.is_empty() {
                        let base = write_section(&mut *obj, block_seg, SUBSECTION_SYMBOLS, &sink.buf)?;
                        summary.fixups += resolve_fixups(&mut *obj, block_seg, &mut sink.fixups, base)?;
                    }
                }
            }
        }

        write_section(&mut *obj, seg, SUBSECTION_STRING_TABLE, files.paths())?;
        write_section(&mut *obj, seg, SUBSECTION_FILE_CHECKSUMS, files.records())?;

        if !shared.buf.is_empty() {
            let base = write_section(&mut *obj, seg, SUBSECTION_SYMBOLS, &shared.buf)?;
            summary.fixups += resolve_fixups(&mut *obj, seg, &mut shared.fixups, base)?;
        }

        types.term(&mut *obj)?;
        tracing::debug!(
            functions = summary.functions,
            comdat_sections = summary.comdat_sections,
            fixups = summary.fixups,
            "term file"
        );
        Ok(summary)
    }
}

fn add_file(
    config: &DebugConfig,
    files: &mut FileTable,
    checksums: &HashMap<Vec<u8>, [u8; MD5_DIGEST_SIZE]>,
    path: &[u8],
) -> u32 {
    let digest = if config.md5_checksums {
        checksums.get(path)
    } else {
        None
    };
    files.add_file_with_checksum(path, digest)
}

fn compiland_record(object_name: &[u8]) -> Result<Vec<u8>, EmitError> {
    let reclen = u16::try_from(2 + 4 + object_name.len() + 1)
        .map_err(|_| EmitError::ObjectNameTooLong)?;
    let mut buf = Vec::with_capacity(2 + usize::from(reclen));
    put_u16(&mut buf, reclen);
    put_u16(&mut buf, S_COMPILAND_V3);
    put_u32(&mut buf, 0);
    put_cstr(&mut buf, object_name);
    Ok(buf)
}

fn write_data_record(sink: &mut SymbolSink, symbol: &Symbol, type_index: u32) -> Result<(), EmitError> {
    let name = symbol.display_name();
    let reclen = u16::try_from(2 + 4 + 6 + name.len() + 1)
        .map_err(|_| EmitError::RecordTooLong { symbol: symbol.id })?;
    put_u16(&mut sink.buf, reclen);
    put_u16(&mut sink.buf, S_GDATA_V3);
    put_u32(&mut sink.buf, type_index);
    sink.push_address(symbol.id);
    put_cstr(&mut sink.buf, name);
    Ok(())
}
