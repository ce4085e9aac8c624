use std::collections::HashMap;

use crate::codeview::usize_to_u32_saturating;
use crate::emitter::FunctionExtent;
use crate::format::FormatError;
use crate::symbol::{SourcePos, StorageClass, Symbol, SymbolId, TypeRef};

/// A symbol declared by a script, with the place its code or data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDef {
    pub symbol: Symbol,
    pub address: Option<(String, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    InitFile { object: Vec<u8> },
    InitModule { source: Vec<u8>, module: Vec<u8> },
    TermModule,
    FuncStart { symbol: SymbolId },
    Line { pos: SourcePos, offset: u32 },
    FuncEnd { symbol: SymbolId, extent: FunctionExtent },
    Data { symbol: SymbolId },
    TermFile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub symbols: Vec<SymbolDef>,
    pub events: Vec<Event>,
}

impl Script {
    #[must_use]
    pub fn symbol(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0 as usize).map(|def| &def.symbol)
    }
}

/// Parses a lifecycle script, one call per line.
///
/// ```text
/// symbol foo global type=void() at=.text:0x30
/// initfile a.obj
/// initmodule a.d a
/// func foo
/// line a.d 10 0x0
/// end foo 0x20 4 0x1c
/// termmodule
/// termfile
/// ```
///
/// # Errors
/// Returns `FormatError` naming the offending line.
pub fn parse_script(input: &str) -> Result<Script, FormatError> {
    let mut script = Script::default();
    let mut names = HashMap::<String, SymbolId>::new();

    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        let text = raw.split('#').next().unwrap_or("");
        let mut tokens = text.split_whitespace();
        let Some(directive) = tokens.next() else {
            continue;
        };
        let mut ops = Operands {
            line,
            directive: static_directive(directive).ok_or_else(|| FormatError::UnknownDirective {
                line,
                word: directive.to_string(),
            })?,
            tokens,
        };

        let event = match ops.directive {
            "symbol" => {
                let def = parse_symbol(&mut ops, usize_to_u32_saturating(script.symbols.len()))?;
                let name = String::from_utf8_lossy(&def.symbol.ident).to_string();
                if names.insert(name.clone(), def.symbol.id).is_some() {
                    return Err(FormatError::DuplicateSymbol { line, name });
                }
                script.symbols.push(def);
                None
            }
            "initfile" => Some(Event::InitFile {
                object: ops.bytes()?,
            }),
            "initmodule" => {
                let source = ops.bytes()?;
                let module = ops.bytes()?;
                Some(Event::InitModule { source, module })
            }
            "termmodule" => Some(Event::TermModule),
            "func" => Some(Event::FuncStart {
                symbol: ops.symbol(&names)?,
            }),
            "line" => {
                let file = ops.bytes()?;
                let number = ops.number()?;
                let offset = ops.number()?;
                Some(Event::Line {
                    pos: SourcePos { file, line: number },
                    offset,
                })
            }
            "end" => {
                let symbol = ops.symbol(&names)?;
                let extent = FunctionExtent {
                    code_length: ops.number()?,
                    prolog_size: ops.number()?,
                    epilog_offset: ops.number()?,
                };
                Some(Event::FuncEnd { symbol, extent })
            }
            "data" => Some(Event::Data {
                symbol: ops.symbol(&names)?,
            }),
            "termfile" => Some(Event::TermFile),
            _ => None,
        };
        ops.finish()?;
        if let Some(event) = event {
            script.events.push(event);
        }
    }
    Ok(script)
}

fn static_directive(word: &str) -> Option<&'static str> {
    [
        "symbol",
        "initfile",
        "initmodule",
        "termmodule",
        "func",
        "line",
        "end",
        "data",
        "termfile",
    ]
    .into_iter()
    .find(|d| *d == word)
}

fn parse_symbol(ops: &mut Operands<'_>, index: u32) -> Result<SymbolDef, FormatError> {
    let ident = ops.bytes()?;
    let class_word = ops.token()?;
    let class = StorageClass::from_keyword(class_word).ok_or_else(|| FormatError::InvalidOperand {
        line: ops.line,
        token: class_word.to_string(),
    })?;
    let mut symbol = Symbol::new(SymbolId(index), &ident, class);
    let mut address = None;

    for token in ops.tokens.by_ref() {
        if token == "comdat" {
            symbol.comdat = true;
        } else if token == "nodebug" {
            symbol.no_debug = true;
        } else if let Some(ty) = token.strip_prefix("type=") {
            symbol.ty = TypeRef(ty.to_string());
        } else if let Some(pretty) = token.strip_prefix("pretty=") {
            symbol.pretty_ident = Some(pretty.as_bytes().to_vec());
        } else if let Some(at) = token.strip_prefix("at=") {
            let invalid = || FormatError::InvalidOperand {
                line: ops.line,
                token: token.to_string(),
            };
            let (segment, offset) = at.rsplit_once(':').ok_or_else(invalid)?;
            if segment.is_empty() {
                return Err(invalid());
            }
            let offset = parse_u32_with_hex(offset).ok_or_else(invalid)?;
            address = Some((segment.to_string(), offset));
        } else {
            return Err(FormatError::InvalidOperand {
                line: ops.line,
                token: token.to_string(),
            });
        }
    }
    Ok(SymbolDef { symbol, address })
}

struct Operands<'a> {
    line: usize,
    directive: &'static str,
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Operands<'a> {
    fn token(&mut self) -> Result<&'a str, FormatError> {
        self.tokens.next().ok_or(FormatError::MissingOperand {
            line: self.line,
            directive: self.directive,
        })
    }

    fn bytes(&mut self) -> Result<Vec<u8>, FormatError> {
        Ok(self.token()?.as_bytes().to_vec())
    }

    fn number(&mut self) -> Result<u32, FormatError> {
        let token = self.token()?;
        parse_u32_with_hex(token).ok_or_else(|| FormatError::InvalidNumber {
            line: self.line,
            token: token.to_string(),
        })
    }

    fn symbol(&mut self, names: &HashMap<String, SymbolId>) -> Result<SymbolId, FormatError> {
        let name = self.token()?;
        names.get(name).copied().ok_or_else(|| FormatError::UndefinedSymbol {
            line: self.line,
            name: name.to_string(),
        })
    }

    fn finish(&mut self) -> Result<(), FormatError> {
        match self.tokens.next() {
            Some(extra) => Err(FormatError::InvalidOperand {
                line: self.line,
                token: extra.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn parse_u32_with_hex(input: &str) -> Option<u32> {
    let s = input.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u32>().ok()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{parse_script, Event};
    use crate::emitter::FunctionExtent;
    use crate::symbol::{SourcePos, StorageClass, SymbolId, TypeRef};

    #[test]
    fn parses_function_lifecycle() {
        let script = parse_script(
            "# one function\n\
             symbol foo global type=void() at=.text:0x30\n\
             symbol tmpl static comdat\n\
             initfile a.obj\n\
             initmodule a.d a\n\
             func foo\n\
             line a.d 10 0x0   # first\n\
             end foo 0x20 4 0x1c\n\
             termmodule\n\
             termfile\n",
        )
        .expect("parse should succeed");

        assert_eq!(script.symbols.len(), 2);
        let foo = &script.symbols[0];
        assert_eq!(foo.symbol.class, StorageClass::Global);
        assert_eq!(foo.symbol.ty, TypeRef("void()".to_string()));
        assert_eq!(foo.address, Some((".text".to_string(), 0x30)));
        assert!(script.symbols[1].symbol.comdat);
        assert_eq!(script.symbol(SymbolId(1)).map(|s| s.class), Some(StorageClass::Static));

        assert_eq!(
            script.events,
            vec![
                Event::InitFile {
                    object: b"a.obj".to_vec()
                },
                Event::InitModule {
                    source: b"a.d".to_vec(),
                    module: b"a".to_vec()
                },
                Event::FuncStart { symbol: SymbolId(0) },
                Event::Line {
                    pos: SourcePos::new(b"a.d", 10),
                    offset: 0
                },
                Event::FuncEnd {
                    symbol: SymbolId(0),
                    extent: FunctionExtent {
                        code_length: 0x20,
                        prolog_size: 4,
                        epilog_offset: 0x1c
                    }
                },
                Event::TermModule,
                Event::TermFile,
            ]
        );
    }

    #[test]
    fn reports_line_numbers() {
        let err = parse_script("initfile a.obj\nfunc nope\n").expect_err("undefined symbol");
        assert_eq!(err.to_string(), "line 2: undefined symbol 'nope'");

        let err = parse_script("symbol f global\nend f 1 2\n").expect_err("missing operand");
        assert_eq!(err.to_string(), "line 2: 'end' is missing an operand");

        let err = parse_script("line a.d ten 0\n").expect_err("bad number");
        assert_eq!(err.to_string(), "line 1: invalid number 'ten'");

        let err = parse_script("termfile now\n").expect_err("extra token");
        assert_eq!(err.to_string(), "line 1: invalid operand 'now'");

        let err = parse_script("symbol f global\nsymbol f static\n").expect_err("duplicate");
        assert_eq!(err.to_string(), "line 2: symbol 'f' is already defined");
    }
}
