use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("unexpected end of data while reading debug stream")]
    UnexpectedEof,
    #[error("unterminated null-terminated string in debug stream")]
    UnterminatedString,
    #[error("unsupported debug section version: {0}")]
    UnsupportedVersion(u32),
    #[error("line {line}: unknown directive '{word}'")]
    UnknownDirective { line: usize, word: String },
    #[error("line {line}: '{directive}' is missing an operand")]
    MissingOperand { line: usize, directive: &'static str },
    #[error("line {line}: invalid number '{token}'")]
    InvalidNumber { line: usize, token: String },
    #[error("line {line}: invalid operand '{token}'")]
    InvalidOperand { line: usize, token: String },
    #[error("line {line}: undefined symbol '{name}'")]
    UndefinedSymbol { line: usize, name: String },
    #[error("line {line}: symbol '{name}' is already defined")]
    DuplicateSymbol { line: usize, name: String },
}

pub mod script;
pub mod subsection;
