pub mod cli;
pub mod codeview;
pub mod driver;
pub mod emitter;
pub mod format;
pub mod listing;
pub mod object;
pub mod symbol;
pub mod types;

pub use driver::run;
