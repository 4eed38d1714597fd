//! Progress and log reporting.
//!
//! Stages never talk to a UI directly. They push percentages and log lines into
//! a [`ProgressTracker`], which keeps the percentage monotonic, records the
//! run's log history and forwards everything to the caller's [`Reporter`].
use std::fmt;
use std::sync::Mutex;

/// How a log line should be presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Success => "SUCCESS",
        };
        f.write_str(tag)
    }
}

/// The sink a front end implements to follow a run.
///
/// Calls arrive from the pipeline's worker thread and must return quickly;
/// a GUI implementation would marshal them onto its own event loop.
pub trait Reporter: Send + Sync {
    /// Overall progress of the run, `0..=100`, never decreasing.
    fn report(&self, percent: u8, status: &str);

    fn log(&self, message: &str, severity: Severity);
}

/// A [`Reporter`] that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _percent: u8, _status: &str) {}
    fn log(&self, _message: &str, _severity: Severity) {}
}

/// One entry of a run's log history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
}

/// A single update produced by a stage.
///
/// `status: None` means the percentage moved but the reporter should not be
/// woken for it (the copy phase throttles its UI updates this way).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub percent: u8,
    pub status: Option<String>,
    pub log: Option<String>,
    pub severity: Severity,
}

struct TrackerState {
    percent: u8,
    history: Vec<LogEntry>,
}

/// Per-run front for a [`Reporter`].
pub(crate) struct ProgressTracker<'a> {
    reporter: &'a dyn Reporter,
    state: Mutex<TrackerState>,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(reporter: &'a dyn Reporter) -> Self {
        Self {
            reporter,
            state: Mutex::new(TrackerState {
                percent: 0,
                history: Vec::new(),
            }),
        }
    }

    /// Reports `percent` (clamped so the run never goes backwards).
    pub(crate) fn report(&self, percent: u8, status: &str) {
        let percent = {
            let mut state = self.lock();
            state.percent = state.percent.max(percent.min(100));
            state.percent
        };
        self.reporter.report(percent, status);
    }

    pub(crate) fn log(&self, message: &str, severity: Severity) {
        self.lock().history.push(LogEntry {
            severity,
            message: message.to_string(),
        });
        self.reporter.log(message, severity);
    }

    pub(crate) fn info(&self, message: &str) {
        self.log(message, Severity::Info);
    }

    pub(crate) fn warn(&self, message: &str) {
        tracing::warn!("{message}");
        self.log(message, Severity::Warning);
    }

    pub(crate) fn error(&self, message: &str) {
        self.log(message, Severity::Error);
    }

    pub(crate) fn success(&self, message: &str) {
        self.log(message, Severity::Success);
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        match event.status {
            Some(status) => self.report(event.percent, &status),
            None => {
                let mut state = self.lock();
                state.percent = state.percent.max(event.percent.min(100));
            }
        }
        if let Some(line) = event.log {
            self.log(&line, event.severity);
        }
    }

    pub(crate) fn percent(&self) -> u8 {
        self.lock().percent
    }

    pub(crate) fn into_history(self) -> Vec<LogEntry> {
        match self.state.into_inner() {
            Ok(state) => state.history,
            Err(poisoned) => poisoned.into_inner().history,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // A panic while holding the lock cannot leave the state half-written.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Percents(Mutex<Vec<u8>>);

    impl Reporter for Percents {
        fn report(&self, percent: u8, _status: &str) {
            self.0.lock().unwrap().push(percent);
        }
        fn log(&self, _message: &str, _severity: Severity) {}
    }

    #[test]
    fn reported_percent_never_goes_backwards() {
        let sink = Percents::default();
        let tracker = ProgressTracker::new(&sink);
        tracker.report(20, "a");
        tracker.report(10, "b");
        tracker.report(130, "c");
        assert_eq!(*sink.0.lock().unwrap(), vec![20, 20, 100]);
    }

    #[test]
    fn silent_events_advance_without_waking_the_reporter() {
        let sink = Percents::default();
        let tracker = ProgressTracker::new(&sink);
        tracker.emit(ProgressEvent {
            percent: 45,
            status: None,
            log: Some("  1.00G  25%".into()),
            severity: Severity::Info,
        });
        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(tracker.percent(), 45);
        let history = tracker.into_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "  1.00G  25%");
    }
}
