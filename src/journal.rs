//! Conversion lifecycle observers and the operation journal.
//!
//! The dispatcher reports every lifecycle event (start, success, failure,
//! validation rejection) to an [`Arc<dyn ConversionObserver>`]. The default
//! observer is [`OperationLogger`], which writes one journal line per event on
//! the [`JOURNAL_TARGET`] tracing target. The binary routes that target to an
//! append-only file through `tracing-appender`.
//!
//! # Why callbacks instead of writing the file here?
//!
//! The journal must never fail a request. Emitting through `tracing` hands the
//! write to whatever subscriber the host installed (the non-blocking appender
//! in the binary, nothing at all in a library embedding), so a full disk or a
//! missing directory cannot surface on the request path. Other observers, such
//! as the CLI progress bar, plug into the same trait.
//!
//! # Example
//!
//! ```rust
//! use edgequake_convert::ConversionObserver;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct FailureCounter(AtomicUsize);
//!
//! impl ConversionObserver for FailureCounter {
//!     fn on_error(&self, _input: &str, _conversion_type: &str, _error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Tracing target carrying journal lines.
pub const JOURNAL_TARGET: &str = "conversion_journal";

/// Receives conversion lifecycle events.
///
/// Implementations must be `Send + Sync`: conversions run concurrently on the
/// blocking pool and report from whichever thread finished them. All methods
/// default to no-ops.
pub trait ConversionObserver: Send + Sync {
    /// A conversion is about to run.
    fn on_start(&self, input: &str, conversion_type: &str) {
        let _ = (input, conversion_type);
    }

    /// A conversion produced `output` after `elapsed`.
    fn on_success(&self, input: &str, output: &str, conversion_type: &str, elapsed: Duration) {
        let _ = (input, output, conversion_type, elapsed);
    }

    /// A conversion failed with `error`.
    fn on_error(&self, input: &str, conversion_type: &str, error: &str) {
        let _ = (input, conversion_type, error);
    }

    /// An upload was rejected before dispatch.
    fn on_validation_error(&self, input: &str, error: &str) {
        let _ = (input, error);
    }
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl ConversionObserver for NoopObserver {}

/// Shared observer handle held by the dispatcher.
pub type Observer = Arc<dyn ConversionObserver>;

/// Journal writer: one line per event on [`JOURNAL_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct OperationLogger;

impl ConversionObserver for OperationLogger {
    fn on_start(&self, input: &str, conversion_type: &str) {
        info!(target: JOURNAL_TARGET, "Starting conversion: {} -> {}", input, conversion_type);
    }

    fn on_success(&self, input: &str, output: &str, conversion_type: &str, elapsed: Duration) {
        info!(
            target: JOURNAL_TARGET,
            "Conversion successful: {} -> {} ({}) in {:.2} seconds",
            input,
            output,
            conversion_type,
            elapsed.as_secs_f64()
        );
    }

    fn on_error(&self, input: &str, conversion_type: &str, error: &str) {
        warn!(
            target: JOURNAL_TARGET,
            "Conversion failed: {} ({}) - {}", input, conversion_type, error
        );
    }

    fn on_validation_error(&self, input: &str, error: &str) {
        warn!(target: JOURNAL_TARGET, "File validation failed: {} - {}", input, error);
    }
}

/// Forwards every event to each observer in order.
pub struct ObserverChain(Vec<Observer>);

impl ObserverChain {
    pub fn new(observers: Vec<Observer>) -> Self {
        Self(observers)
    }
}

impl ConversionObserver for ObserverChain {
    fn on_start(&self, input: &str, conversion_type: &str) {
        self.0.iter().for_each(|o| o.on_start(input, conversion_type));
    }

    fn on_success(&self, input: &str, output: &str, conversion_type: &str, elapsed: Duration) {
        self.0
            .iter()
            .for_each(|o| o.on_success(input, output, conversion_type, elapsed));
    }

    fn on_error(&self, input: &str, conversion_type: &str, error: &str) {
        self.0.iter().for_each(|o| o.on_error(input, conversion_type, error));
    }

    fn on_validation_error(&self, input: &str, error: &str) {
        self.0.iter().for_each(|o| o.on_validation_error(input, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        successes: AtomicUsize,
        errors: AtomicUsize,
        rejections: AtomicUsize,
    }

    impl ConversionObserver for Tracking {
        fn on_start(&self, _input: &str, _conversion_type: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_success(&self, _i: &str, _o: &str, _t: &str, _e: Duration) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_error(&self, _i: &str, _t: &str, _e: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_validation_error(&self, _i: &str, _e: &str) {
            self.rejections.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_start("a.pdf", "pdf_to_txt");
        o.on_success("a.pdf", "a.txt", "pdf_to_txt", Duration::from_millis(5));
        o.on_error("a.pdf", "pdf_to_txt", "boom");
        o.on_validation_error("a.pdf", "File is empty");
    }

    #[test]
    fn chain_fans_out() {
        let a = Arc::new(Tracking::default());
        let b = Arc::new(Tracking::default());
        let chain = ObserverChain::new(vec![a.clone(), b.clone()]);
        chain.on_start("x", "t");
        chain.on_success("x", "y", "t", Duration::ZERO);
        chain.on_error("x", "t", "e");
        chain.on_validation_error("x", "e");
        for t in [&a, &b] {
            assert_eq!(t.starts.load(Ordering::SeqCst), 1);
            assert_eq!(t.successes.load(Ordering::SeqCst), 1);
            assert_eq!(t.errors.load(Ordering::SeqCst), 1);
            assert_eq!(t.rejections.load(Ordering::SeqCst), 1);
        }
    }

    #[traced_test]
    #[test]
    fn logger_writes_journal_lines() {
        let log = OperationLogger;
        log.on_start("report.pdf", "pdf_to_txt");
        log.on_success(
            "report.pdf",
            "report.txt",
            "pdf_to_txt",
            Duration::from_millis(1250),
        );
        log.on_error("clip.mp3", "audio_trim", "ffmpeg exited with 1");
        log.on_validation_error("note.txt", "File is empty");

        assert!(logs_contain("Starting conversion: report.pdf -> pdf_to_txt"));
        assert!(logs_contain(
            "Conversion successful: report.pdf -> report.txt (pdf_to_txt) in 1.25 seconds"
        ));
        assert!(logs_contain("Conversion failed: clip.mp3 (audio_trim) - ffmpeg exited with 1"));
        assert!(logs_contain("File validation failed: note.txt - File is empty"));
    }
}
