use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use md5::{Digest, Md5};

use crate::cli::Args;
use crate::codeview::MD5_DIGEST_SIZE;
use crate::emitter::{DebugConfig, DebugInfoSession, Emitter, SessionSummary};
use crate::format::script::{parse_script, Event, Script};
use crate::listing::write_listing;
use crate::object::{MemoryObject, ObjectWriter, SegmentId};
use crate::symbol::{Symbol, SymbolId};
use crate::types::{TypeInterner, TypeTable};

pub fn run(args: &Args) -> Result<()> {
    let text = std::fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read {}", args.script))?;
    let script = parse_script(&text).with_context(|| format!("in {}", args.script))?;
    let base_dir = Path::new(&args.script).parent().unwrap_or(Path::new("."));

    let (obj, summary) = replay(&script, args.debug_config(), base_dir)?;

    if let Some(output) = &args.output {
        let Some(seg) = obj.existing_debug_s() else {
            bail!("no .debug$S section was produced");
        };
        let data = obj.segment(seg).map(|s| s.data.as_slice()).unwrap_or_default();
        std::fs::write(output, data).with_context(|| format!("failed to write {output}"))?;
        if args.verbose {
            println!("wrote output: {output}");
        }
    }

    if let Some(map) = args.map_path() {
        let names = script
            .symbols
            .iter()
            .map(|def| (def.symbol.id, def.symbol.display_name().to_vec()))
            .collect::<HashMap<SymbolId, Vec<u8>>>();
        write_listing(&map, &obj, &names)?;
        if args.verbose {
            println!("wrote listing: {map}");
        }
    }

    if args.verbose {
        println!(
            "rcv8: {} function(s), {} line pair(s), {} comdat section(s), {} fixup(s)",
            summary.functions, summary.line_pairs, summary.comdat_sections, summary.fixups
        );
    }
    Ok(())
}

/// Plays `script` against a fresh in-memory object.
///
/// # Errors
/// Returns an error when the script violates the session lifecycle.
pub fn replay(script: &Script, config: DebugConfig, base_dir: &Path) -> Result<(MemoryObject, SessionSummary)> {
    let mut obj = MemoryObject::new();
    let mut segments = HashMap::<String, SegmentId>::new();
    for def in &script.symbols {
        if let Some((name, offset)) = &def.address {
            let seg = *segments
                .entry(name.clone())
                .or_insert_with(|| obj.add_segment(name));
            obj.define_symbol(def.symbol.id, seg, *offset);
        }
    }

    let mut events = script.events.iter();
    let object = match events.next() {
        Some(Event::InitFile { object }) => object,
        Some(other) => bail!("script must start with initfile, found {other:?}"),
        None => bail!("script has no events"),
    };

    let mut emitter = Emitter::new(config);
    let mut types = TypeInterner::new();
    let summary = {
        let mut session = emitter.init_file(&mut obj, &mut types, object);
        play_events(&mut session, script, &mut events, config, base_dir)?;
        session.term_file()?
    };
    Ok((obj, summary))
}

fn play_events<'e, O, T>(
    session: &mut DebugInfoSession<'_, O, T>,
    script: &Script,
    events: &mut impl Iterator<Item = &'e Event>,
    config: DebugConfig,
    base_dir: &Path,
) -> Result<()>
where
    O: ObjectWriter,
    T: TypeTable,
{
    let mut hashed = HashSet::<Vec<u8>>::new();
    while let Some(event) = events.next() {
        match event {
            Event::InitFile { .. } => bail!("only one initfile is allowed per script"),
            Event::InitModule { source, module } => {
                register_checksum(session, &mut hashed, config, base_dir, source);
                session.init_module(source, module);
            }
            Event::TermModule => session.term_module()?,
            Event::FuncStart { symbol } => session.func_start(lookup(script, *symbol)?)?,
            Event::Line { pos, offset } => {
                register_checksum(session, &mut hashed, config, base_dir, &pos.file);
                session.linnum(pos, *offset)?;
            }
            Event::FuncEnd { symbol, extent } => session.func_term(lookup(script, *symbol)?, *extent)?,
            Event::Data { symbol } => session.out_symbol(lookup(script, *symbol)?)?,
            Event::TermFile => {
                if let Some(extra) = events.next() {
                    bail!("event after termfile: {extra:?}");
                }
                return Ok(());
            }
        }
    }
    bail!("script ended without termfile")
}

fn register_checksum<O: ObjectWriter, T: TypeTable>(
    session: &mut DebugInfoSession<'_, O, T>,
    hashed: &mut HashSet<Vec<u8>>,
    config: DebugConfig,
    base_dir: &Path,
    file: &[u8],
) {
    if !config.md5_checksums || !hashed.insert(file.to_vec()) {
        return;
    }
    match file_md5(base_dir, file) {
        Some(digest) => session.set_file_checksum(file, digest),
        None => tracing::debug!(file = %String::from_utf8_lossy(file), "source not readable, no checksum"),
    }
}

fn lookup(script: &Script, id: SymbolId) -> Result<&Symbol> {
    script
        .symbol(id)
        .with_context(|| format!("unknown symbol id {}", id.0))
}

fn file_md5(base_dir: &Path, file: &[u8]) -> Option<[u8; MD5_DIGEST_SIZE]> {
    let name = std::str::from_utf8(file).ok()?;
    let path = Path::new(name);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    let bytes = std::fs::read(&path).ok()?;
    let mut hasher = Md5::new();
    hasher.update(&bytes);
    let result = hasher.finalize();
    let mut digest = [0u8; MD5_DIGEST_SIZE];
    digest.copy_from_slice(&result);
    Some(digest)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::replay;
    use crate::emitter::DebugConfig;
    use crate::format::script::parse_script;
    use crate::format::subsection::{parse_debug_s, parse_file_records};

    const TRACE: &str = "symbol foo global at=.text:0x30\n\
                         initfile a.obj\n\
                         initmodule a.d a\n\
                         func foo\n\
                         line a.d 10 0x0\n\
                         line a.d 11 0x10\n\
                         end foo 0x20 4 0x1c\n\
                         termmodule\n\
                         termfile\n";

    #[test]
    fn replays_trace_into_object() {
        let script = parse_script(TRACE).expect("parse");
        let (obj, summary) = replay(&script, DebugConfig::default(), Path::new(".")).expect("replay");
        assert_eq!(summary.functions, 1);
        assert_eq!(summary.fixups, 2);
        let seg = obj.existing_debug_s().expect("debug$S");
        assert_eq!(obj.segment(seg).map(|s| s.data.len()), Some(164));
    }

    #[test]
    fn rejects_lifecycle_violations() {
        let script = parse_script("initmodule a.d a\n").expect("parse");
        let err = replay(&script, DebugConfig::default(), Path::new(".")).expect_err("no initfile");
        assert!(err.to_string().contains("must start with initfile"));

        let script = parse_script("initfile a.obj\n").expect("parse");
        let err = replay(&script, DebugConfig::default(), Path::new(".")).expect_err("no termfile");
        assert_eq!(err.to_string(), "script ended without termfile");

        let script = parse_script("symbol f global\nsymbol g global\ninitfile a.obj\nfunc f\nend g 1 0 0\ntermfile\n")
            .expect("parse");
        let err = replay(&script, DebugConfig::default(), Path::new(".")).expect_err("mismatch");
        assert!(err.to_string().contains("ended while"));
    }

    #[test]
    fn hashes_readable_sources() {
        let uniq = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("rcv8-driver-test-{uniq}"));
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("a.d"), b"void foo() {}\n").expect("write source");

        let script = parse_script("initfile a.obj\ninitmodule a.d a\ninitmodule missing.d m\ntermfile\n")
            .expect("parse");
        let config = DebugConfig {
            md5_checksums: true,
            ..DebugConfig::default()
        };
        let (obj, _) = replay(&script, config, &dir).expect("replay");
        let seg = obj.existing_debug_s().expect("debug$S");
        let data = &obj.segment(seg).expect("segment").data;
        let subsections = parse_debug_s(data).expect("parse");
        let records = parse_file_records(subsections[2].payload).expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].checksum_kind, 0x0110);
        assert!(records[0].md5.is_some());
        assert_eq!(records[1].checksum_kind, 0);

        let _ = fs::remove_file(dir.join("a.d"));
        let _ = fs::remove_dir(dir);
    }
}
