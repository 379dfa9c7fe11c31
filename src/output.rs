use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::report::RunSummary;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "AIP metadata backfill summary")?;
        writeln!(
            stdout,
            "  started:  {}",
            summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            stdout,
            "  finished: {}",
            summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(stdout, "  legacy objects identified: {}", summary.identified)?;
        writeln!(stdout, "  objects staged: {}", summary.staged)?;
        writeln!(stdout, "  objects materialized: {}", summary.materialized)?;
        writeln!(stdout, "  objects failed: {}", summary.failed)?;
        writeln!(stdout, "  properties written: {}", summary.properties_written)?;
        writeln!(stdout, "  errors: {}", summary.error_count)?;
        for (kind, count) in &summary.errors_by_kind {
            writeln!(stdout, "    {kind}: {count}")?;
        }
        Ok(())
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        eprintln!("[{:?}] {}", event.phase, event.message);
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
