use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use tokulog::cursor::LogCursor;

/// Print every record of a log file in a human-readable form.
#[derive(Debug, Parser)]
struct Cli {
    /// Path to a .tokulog file
    file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let (mut cursor, version) = LogCursor::open(&cli.file)
        .with_context(|| format!("opening {}", cli.file.display()))?;
    println!("tokulog v.{version}");
    while let Some(entry) = cursor.next_entry()? {
        println!("{entry}");
    }
    Ok(())
}
