//! Progress display for image transfers
//!
//! Renders [`ProgressUpdate`] events as a single self-overwriting terminal
//! line, finishing with a summary once the payload has fully moved.

use crate::transport::{Direction, ProgressUpdate};
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Minimum time between two redraws
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

/// Image transfer progress tracker
pub struct TransferProgress {
    direction: Direction,
    total_bytes: u64,
    transferred_bytes: u64,
    start_time: Instant,
    last_draw: Option<Instant>,
}

impl TransferProgress {
    /// Start tracking a transfer
    pub fn new(direction: Direction, total_bytes: u64) -> Self {
        Self {
            direction,
            total_bytes,
            transferred_bytes: 0,
            start_time: Instant::now(),
            last_draw: None,
        }
    }

    /// Whether `update` belongs to this transfer
    pub fn tracks(&self, update: &ProgressUpdate) -> bool {
        update.direction == self.direction
            && update.total_bytes == self.total_bytes
            && update.bytes_transferred >= self.transferred_bytes
    }

    /// Record an update and redraw if enough time has passed.
    ///
    /// Returns true once the transfer is complete.
    pub fn update(&mut self, update: &ProgressUpdate) -> bool {
        self.transferred_bytes = update.bytes_transferred.min(self.total_bytes);

        if update.is_complete() {
            self.finish();
            return true;
        }

        let now = Instant::now();
        let due = self
            .last_draw
            .map_or(true, |last| now.duration_since(last) >= REDRAW_INTERVAL);
        if due {
            print!("\r{}", self.render());
            io::stdout().flush().unwrap_or(());
            self.last_draw = Some(now);
        }
        false
    }

    /// Current progress line
    pub fn render(&self) -> String {
        let percentage = if self.total_bytes > 0 {
            (self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0) as u8
        } else {
            0
        };

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.transferred_bytes as f64 / elapsed
        } else {
            0.0
        };

        format!(
            "{} image - {}% ({} of {}) {}/s",
            label(self.direction),
            percentage,
            format_bytes(self.transferred_bytes),
            format_bytes(self.total_bytes),
            format_bytes(rate as u64)
        )
    }

    /// Print the completion line
    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        println!(
            "\r✅ {} image - {} in {:.1}s",
            match self.direction {
                Direction::Outbound => "Sent",
                Direction::Inbound => "Received",
            },
            format_bytes(self.total_bytes),
            elapsed
        );
    }
}

fn label(direction: Direction) -> &'static str {
    match direction {
        Direction::Outbound => "📤 Sending",
        Direction::Inbound => "📥 Receiving",
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
