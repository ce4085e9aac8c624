use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(EnvFilter::from_default_env())
            .init();
    }

    let args = rcv8::cli::Args::parse();
    if let Err(err) = rcv8::run(&args) {
        eprintln!("rcv8: {err:#}");
        std::process::exit(1);
    }
}
