//! Vacation import from CSV (`worker_id,start_date,end_date`).
//!
//! Dates are RFC 3339 or `YYYY-MM-DD HH:MM` in the configured timezone.

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use std::io::Read;
use std::path::Path;
use tracing::warn;
use workplan_core::{VacationInterval, parse_instant};

pub fn read_vacations_csv(path: impl AsRef<Path>, tz: Tz) -> Result<Vec<VacationInterval>> {
    let file = std::fs::File::open(path.as_ref())
        .with_context(|| format!("opening {}", path.as_ref().display()))?;
    parse_vacations_csv(file, tz).with_context(|| format!("parsing {}", path.as_ref().display()))
}

pub fn parse_vacations_csv<R: Read>(reader: R, tz: Tz) -> Result<Vec<VacationInterval>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut out = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        // Header is line 1.
        let line = i + 2;
        let worker_id = record.get(0).unwrap_or("");
        if worker_id.is_empty() {
            warn!(line, "skipping vacation row without worker_id");
            continue;
        }
        let start = parse_instant(record.get(1).unwrap_or(""), tz)
            .with_context(|| format!("line {line}: start_date"))?;
        let end = parse_instant(record.get(2).unwrap_or(""), tz)
            .with_context(|| format!("line {line}: end_date"))?;

        let vacation = VacationInterval::new(worker_id, start, end);
        if let Err(e) = vacation.validate() {
            bail!("line {line}: {e}");
        }
        out.push(vacation);
    }
    Ok(out)
}
