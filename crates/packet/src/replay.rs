//! Capture record files and replay.
//!
//! A record is `u32 BE total length (header included) + u8 marker 0x01 +
//! i64 BE capture timestamp (Unix ms) + raw link-layer frame`. Replaying a
//! record file drives the identical ingestion path as live capture, so the
//! resulting aggregation is byte-identical for the same packet sequence.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::analyzer::Analyzer;

const RECORD_MARKER: u8 = 0x01;
/// Length field + marker + timestamp.
const RECORD_HEADER_LEN: usize = 13;
/// Largest frame we will believe; link frames top out far below this.
const MAX_RECORD_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub at_ms: i64,
    pub frame: Vec<u8>,
}

impl CaptureRecord {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.at_ms)
    }
}

/// Trait for record sources, so replay can run over files or anything
/// else that yields captured frames in order.
pub trait RecordReader {
    /// Read the next record, None on clean EOF.
    fn read_record(&mut self) -> Result<Option<CaptureRecord>>;
}

/// Iterator wrapper for any RecordReader.
pub struct RecordIterator<'a> {
    reader: &'a mut dyn RecordReader,
}

impl<'a> RecordIterator<'a> {
    pub fn new(reader: &'a mut dyn RecordReader) -> Self {
        Self { reader }
    }
}

impl<'a> Iterator for RecordIterator<'a> {
    type Item = Result<CaptureRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

pub struct FileRecordReader {
    reader: BufReader<File>,
}

impl FileRecordReader {
    pub fn new(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open record file: {}", path.as_ref().display()))?;
        Ok(Self::new(file))
    }
}

impl RecordReader for FileRecordReader {
    fn read_record(&mut self) -> Result<Option<CaptureRecord>> {
        // EOF at a record boundary is the normal end of the file.
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("Failed to read record length"),
        }
        let total = u32::from_be_bytes(len_buf) as usize;
        if !(RECORD_HEADER_LEN..=MAX_RECORD_LEN).contains(&total) {
            return Err(anyhow!("Invalid record length: {}", total));
        }

        let mut marker = [0u8; 1];
        self.reader
            .read_exact(&mut marker)
            .with_context(|| "Failed to read record marker")?;
        if marker[0] != RECORD_MARKER {
            return Err(anyhow!(
                "Invalid record marker: expected 0x{:02x}, got 0x{:02x}",
                RECORD_MARKER,
                marker[0]
            ));
        }

        let mut ts_buf = [0u8; 8];
        self.reader
            .read_exact(&mut ts_buf)
            .with_context(|| "Failed to read record timestamp")?;
        let at_ms = i64::from_be_bytes(ts_buf);

        let mut frame = vec![0u8; total - RECORD_HEADER_LEN];
        self.reader
            .read_exact(&mut frame)
            .with_context(|| format!("Failed to read frame of length {}", frame.len()))?;

        Ok(Some(CaptureRecord { at_ms, frame }))
    }
}

pub struct RecordWriter {
    writer: BufWriter<File>,
}

impl RecordWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create record file: {}", path.as_ref().display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_record(&mut self, at_ms: i64, frame: &[u8]) -> Result<()> {
        let total = (RECORD_HEADER_LEN + frame.len()) as u32;
        self.writer.write_all(&total.to_be_bytes())?;
        self.writer.write_all(&[RECORD_MARKER])?;
        self.writer.write_all(&at_ms.to_be_bytes())?;
        self.writer.write_all(frame)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().with_context(|| "Failed to flush record file")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayReport {
    pub records: u64,
    /// Capture timestamp of the last record, the "now" for final snapshots.
    pub last_at_ms: Option<i64>,
}

/// Drive every record through the analyzer's normal ingestion path.
///
/// With `pace` set, inter-record gaps are reproduced with real sleeps
/// (useful when a UI is watching); timeouts always follow the recorded
/// timestamps either way.
pub fn feed<R: RecordReader>(analyzer: &Analyzer, reader: &mut R, pace: bool) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();
    while let Some(record) = reader.read_record()? {
        if pace {
            if let Some(last) = report.last_at_ms {
                let gap = record.at_ms.saturating_sub(last);
                if gap > 0 {
                    std::thread::sleep(Duration::from_millis(gap as u64));
                }
            }
        }
        analyzer.ingest_frame(&record.frame, record.at_ms);
        report.records += 1;
        report.last_at_ms = Some(record.at_ms);
    }
    info!(records = report.records, "replay finished");
    Ok(report)
}
