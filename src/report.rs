//! Uniform failure reporting.
//!
//! Every failed request yields exactly one structured record: the method
//! name, an optional subject label (the identifier kind), the subject value
//! and a formatted message. The dispatcher is the only caller; once a
//! response has been committed no record is emitted and problems are logged
//! through `tracing` instead.

use crate::types::ObjectId;
use std::io::Write;

/// Sink for the per-request error record.
pub trait ErrorSink: Send + Sync {
    fn report(&self, method: &str, label: Option<&str>, subject: ObjectId, message: &str);
}

/// Writes the record to standard error, one line per failure.
pub struct StderrSink;

impl ErrorSink for StderrSink {
    fn report(&self, method: &str, label: Option<&str>, subject: ObjectId, message: &str) {
        let mut err = std::io::stderr().lock();
        let _ = match label {
            Some(label) => writeln!(err, "Error ({} {}={}): {}", method, label, subject, message),
            None => writeln!(err, "Error ({}): {}", method, message),
        };
    }
}

/// Collects records in memory; test support.
#[derive(Default)]
pub struct MemorySink {
    records: parking_lot::Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<String> {
        self.records.lock().clone()
    }
}

impl ErrorSink for MemorySink {
    fn report(&self, method: &str, label: Option<&str>, subject: ObjectId, message: &str) {
        let record = match label {
            Some(label) => format!("{} {}={}: {}", method, label, subject, message),
            None => format!("{}: {}", method, message),
        };
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_format() {
        let sink = MemorySink::default();
        sink.report("ReadFile", Some("FileID"), 9, "Offset is greater than the file's length");
        sink.report("NewPixels", None, 0, "Dims parameter missing");
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            "ReadFile FileID=9: Offset is greater than the file's length"
        );
        assert_eq!(records[1], "NewPixels: Dims parameter missing");
    }
}
