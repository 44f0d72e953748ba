//! Terminal output for the feed

use std::io::{self, Write};

use feed_core::{FeedSink, Status};

/// Prints statuses and notices as plain lines
pub struct LineSink<W: Write + Send> {
    out: W,
}

impl LineSink<io::Stdout> {
    /// Sink writing to standard output
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> LineSink<W> {
    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            tracing::warn!(error = %e, "Failed to write feed output");
        }
    }
}

/// One status as printed: `[slot] handle: text`
pub fn format_status(status: &Status, slot: Option<u8>) -> String {
    let slot = slot.map_or_else(|| "--".to_string(), |slot| format!("{slot:02x}"));
    format!("[{slot}] {}: {}", status.account.acct, status.text)
}

impl<W: Write + Send> FeedSink for LineSink<W> {
    fn show(&mut self, status: &Status, slot: Option<u8>) {
        let line = format_status(status, slot);
        self.write_line(&line);
    }

    fn log_line(&mut self, line: &str) {
        self.write_line(&format!("* {line}"));
    }
}
