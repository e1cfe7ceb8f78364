//! CSV export for control cycle telemetry.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::control::types::CycleRecord;

/// Column header for cycle telemetry export.
const HEADER: &str = "cycle,started_at,success,mode,avg_battery_pct,sustain_hours,\
                       zones_on,zones_off,shed,dispatch_failures,error";

/// Exports cycle records to a CSV file at the given path.
///
/// Writes a header row followed by one data row per cycle. Produces
/// deterministic output for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(records: &[CycleRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(records, buf)
}

/// Writes cycle records as CSV to any writer.
///
/// Skipped cycles leave `mode` empty and carry their reason in `error`.
/// Shed zones are joined with `;`.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(records: &[CycleRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in records {
        wtr.write_record(&[
            r.cycle.to_string(),
            r.started_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            r.success.to_string(),
            r.mode.map(|m| m.as_str().to_string()).unwrap_or_default(),
            format!("{:.2}", r.avg_battery_percentage),
            format!("{:.2}", r.sustain_hours),
            r.zones_on.to_string(),
            r.zones_off.to_string(),
            r.shed.join(";"),
            r.dispatch_failures.to_string(),
            r.error.clone().unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
