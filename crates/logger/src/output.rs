//! Record output
//!
//! Rows go to stdout, either as CSV or as human-readable lines. When a file
//! is requested it additionally receives the CSV header followed by one CSV
//! row per record, flushed as it is written.

use protocol::{CSV_HEADER, TelemetryRecord};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Destination for emitted records
pub trait RecordSink {
    fn emit(&mut self, record: &TelemetryRecord) -> io::Result<()>;
}

/// Writes records to a stream and, optionally, a CSV file
pub struct OutputWriter<W: Write> {
    out: W,
    csv: bool,
    file: Option<BufWriter<File>>,
}

impl<W: Write> OutputWriter<W> {
    /// Write to `out` only
    pub fn new(out: W, csv: bool) -> Self {
        Self {
            out,
            csv,
            file: None,
        }
    }

    /// Write to `out` and create `path` as a CSV file
    ///
    /// The file is truncated and starts with the header row.
    pub fn with_file(out: W, csv: bool, path: &Path) -> io::Result<Self> {
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "{}", CSV_HEADER)?;
        file.flush()?;

        Ok(Self {
            out,
            csv,
            file: Some(file),
        })
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }
}

impl<W: Write> RecordSink for OutputWriter<W> {
    fn emit(&mut self, record: &TelemetryRecord) -> io::Result<()> {
        if self.csv {
            writeln!(self.out, "{}", record.to_csv_row())?;
        } else {
            writeln!(self.out, "{}", record)?;
        }
        self.out.flush()?;

        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{}", record.to_csv_row())?;
            file.flush()?;
        }

        Ok(())
    }
}
