//! Bounded diagnostic trace for one top-level operation.
//!
//! Every operation builds its own `Trace` and hands it back to the caller,
//! which decides where the snapshot is persisted.

use std::collections::VecDeque;
use std::time::Instant;

use log::debug;

/// Default character budget, matching what the settings store keeps.
pub const DEFAULT_TRACE_CAPACITY: usize = 12_000;

/// Prefix of the one-line summary written per negotiation attempt.
pub const ATTEMPT_PREFIX: &str = "attempt ";

#[derive(Debug, Clone)]
pub struct Trace {
    lines: VecDeque<String>,
    chars: usize,
    capacity: usize,
    dropped: usize,
    started: Instant,
}

impl Trace {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            chars: 0,
            capacity: capacity.max(1),
            dropped: 0,
            started: Instant::now(),
        }
    }

    /// Append one line, dropping the oldest lines if over capacity.
    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        debug!("[trace] {}", line);

        let line = format!("+{}ms {}", self.started.elapsed().as_millis(), line);
        self.chars += line.chars().count() + 1;
        self.lines.push_back(line);

        while self.chars > self.capacity && self.lines.len() > 1 {
            if let Some(old) = self.lines.pop_front() {
                self.chars -= old.chars().count() + 1;
                self.dropped += 1;
            }
        }
    }

    /// Append a per-attempt summary line.
    pub fn attempt(&mut self, summary: impl std::fmt::Display) {
        self.push(format!("{}{}", ATTEMPT_PREFIX, summary));
    }

    /// Retained lines, oldest first, without their timestamp prefix.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(|l| l.split_once(' ').map(|(_, rest)| rest).unwrap_or(l))
    }

    /// Number of retained attempt summaries.
    pub fn attempt_count(&self) -> usize {
        self.entries().filter(|l| l.starts_with(ATTEMPT_PREFIX)).count()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Render the trace for persistence, truncated to the capacity.
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        if self.dropped > 0 {
            out.push_str(&format!("... {} earlier lines dropped\n", self.dropped));
        }
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        match out.char_indices().nth(self.capacity) {
            Some((cut, _)) => out[..cut].to_string(),
            None => out,
        }
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_entries() {
        let mut trace = Trace::new(1_000);
        trace.push("Connecting 10.0.0.5:20000");
        trace.attempt("#1 20000/LE: empty catalog");
        let entries: Vec<_> = trace.entries().collect();
        assert_eq!(
            entries,
            vec!["Connecting 10.0.0.5:20000", "attempt #1 20000/LE: empty catalog"]
        );
        assert_eq!(trace.attempt_count(), 1);
    }

    #[test]
    fn test_drops_oldest_lines() {
        let mut trace = Trace::new(200);
        for i in 0..50 {
            trace.push(format!("line {:03} padding padding", i));
        }
        assert!(trace.dropped() > 0);
        let first = trace.entries().next().unwrap().to_string();
        assert_ne!(first, "line 000 padding padding");
        assert!(trace.entries().last().unwrap().starts_with("line 049"));
        assert!(trace.snapshot().chars().count() <= 200);
        assert!(trace.snapshot().starts_with("... "));
    }

    #[test]
    fn test_snapshot_truncates_on_char_boundary() {
        let mut trace = Trace::new(30);
        trace.push("ΑΒΓΔΕΖΗΘΙΚΛΜΝΞΟΠΡΣΤΥΦΧΨΩ αβγδε");
        let snap = trace.snapshot();
        assert_eq!(snap.chars().count(), 30);
    }
}
