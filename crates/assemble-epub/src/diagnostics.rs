//! Per-book diagnostic trail.

use std::time::Instant;

/// Timestamped record of the steps taken while assembling one book.
///
/// Each line carries the seconds since the book was created and since the
/// previous line. Every line is also sent to the `log` facade at debug
/// level.
#[derive(Debug, Clone)]
pub struct BookLog {
    started: Instant,
    last: Instant,
    lines: Vec<String>,
}

impl BookLog {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last: now,
            lines: Vec::new(),
        }
    }

    pub fn line(&mut self, message: impl AsRef<str>) {
        let now = Instant::now();
        let since_start = now.duration_since(self.started).as_secs_f64();
        let since_last = now.duration_since(self.last).as_secs_f64();
        self.last = now;

        let message = message.as_ref();
        log::debug!("{message}");
        self.lines.push(format!("+{since_start:08.4}; +{since_last:08.4}; {message}"));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl Default for BookLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_timestamped() {
        let mut log = BookLog::new();
        log.line("Start");
        log.line("addFile: chapter1.xhtml");
        assert_eq!(log.lines().len(), 2);
        assert!(log.lines()[0].starts_with("+000"));
        assert!(log.lines()[1].ends_with("; addFile: chapter1.xhtml"));
    }
}
