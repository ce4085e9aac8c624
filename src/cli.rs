use clap::{Parser, ValueEnum};

use crate::emitter::{DebugConfig, TargetAbi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    Win32,
    Win64,
}

#[derive(Debug, Parser)]
#[command(name = "rcv8", version, about = "Replays a code generator trace into CodeView debug sections")]
pub struct Args {
    /// Write the shared .debug$S section here.
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    /// Write a listing of all produced sections (`-p` alone writes <SCRIPT>.map).
    #[arg(
        short = 'p',
        long = "map",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = ""
    )]
    pub map: Option<String>,

    /// Emit S_GDATA_V3 records for `data` events.
    #[arg(long = "gdata")]
    pub global_data: bool,

    /// Store MD5 checksums of readable source files.
    #[arg(long = "md5")]
    pub md5: bool,

    #[arg(long = "target", value_enum, default_value_t = TargetArg::Win64)]
    pub target: TargetArg,

    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,

    #[arg(value_name = "SCRIPT")]
    pub script: String,
}

impl Args {
    #[must_use]
    pub fn debug_config(&self) -> DebugConfig {
        DebugConfig {
            target: match self.target {
                TargetArg::Win32 => TargetAbi::Win32,
                TargetArg::Win64 => TargetAbi::Win64,
            },
            emit_global_data_symbols: self.global_data,
            md5_checksums: self.md5,
        }
    }

    /// Listing destination, if one was requested.
    #[must_use]
    pub fn map_path(&self) -> Option<String> {
        match self.map.as_deref() {
            None => None,
            Some("") => Some(format!("{}.map", self.script)),
            Some(path) => Some(path.to_string()),
        }
    }
}
