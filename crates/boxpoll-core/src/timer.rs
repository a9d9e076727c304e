// ── Operation timing ──
//
// `PerformanceTimer` measures one logical operation. It reports on
// `stop()` or, if the operation bailed out early (`?`, panic unwind,
// cancelled future), when it is dropped.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::{Clock, default_clock};

/// What a finished timer measured. Consumed by logging only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimingReport {
    pub operation: String,
    /// `(label, elapsed since start)` in call order.
    pub checkpoints: Vec<(String, Duration)>,
    pub total: Duration,
    pub exceeded_threshold: bool,
}

impl TimingReport {
    fn checkpoint_summary(&self) -> String {
        self.checkpoints
            .iter()
            .map(|(label, at)| format!("{label}@{}ms", at.as_millis()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Times one operation and warns if it runs past its threshold.
///
/// ```
/// # use std::time::Duration;
/// # use boxpoll_core::PerformanceTimer;
/// let mut timer = PerformanceTimer::start("lan.get_hosts", Duration::from_millis(1000));
/// timer.checkpoint("request sent");
/// let report = timer.stop();
/// assert_eq!(report.checkpoints.len(), 1);
/// ```
pub struct PerformanceTimer {
    operation: String,
    threshold: Duration,
    started: Instant,
    checkpoints: Vec<(String, Duration)>,
    clock: Arc<dyn Clock>,
    finished: bool,
}

impl PerformanceTimer {
    pub fn start(operation: impl Into<String>, threshold: Duration) -> Self {
        Self::start_with_clock(operation, threshold, default_clock())
    }

    pub fn start_with_clock(
        operation: impl Into<String>,
        threshold: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started = clock.now();
        Self {
            operation: operation.into(),
            threshold,
            started,
            checkpoints: Vec::new(),
            clock,
            finished: false,
        }
    }

    /// Record the time elapsed so far under `label`. Does not stop the timer.
    pub fn checkpoint(&mut self, label: impl Into<String>) {
        let at = self.elapsed();
        self.checkpoints.push((label.into(), at));
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started)
    }

    /// Finalize and emit the report.
    pub fn stop(mut self) -> TimingReport {
        self.finish()
    }

    fn finish(&mut self) -> TimingReport {
        self.finished = true;
        let total = self.elapsed();
        let report = TimingReport {
            operation: self.operation.clone(),
            checkpoints: std::mem::take(&mut self.checkpoints),
            total,
            exceeded_threshold: total > self.threshold,
        };

        if report.exceeded_threshold {
            warn!(
                operation = %report.operation,
                elapsed_ms = report.total.as_millis(),
                threshold_ms = self.threshold.as_millis(),
                checkpoints = %report.checkpoint_summary(),
                "slow operation"
            );
        } else {
            debug!(
                operation = %report.operation,
                elapsed_ms = report.total.as_millis(),
                checkpoints = %report.checkpoint_summary(),
                "operation completed"
            );
        }
        report
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish();
        }
    }
}

impl std::fmt::Debug for PerformanceTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceTimer")
            .field("operation", &self.operation)
            .field("threshold", &self.threshold)
            .field("checkpoints", &self.checkpoints)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;

    fn timer(threshold_ms: u64) -> (PerformanceTimer, ManualClock) {
        let clock = ManualClock::new();
        let timer = PerformanceTimer::start_with_clock(
            "devices.fetch",
            Duration::from_millis(threshold_ms),
            Arc::new(clock.clone()),
        );
        (timer, clock)
    }

    #[test]
    fn checkpoints_are_kept_in_call_order() {
        let (mut timer, clock) = timer(1000);
        clock.advance(Duration::from_millis(100));
        timer.checkpoint("connected");
        clock.advance(Duration::from_millis(250));
        timer.checkpoint("decoded");
        clock.advance(Duration::from_millis(50));

        let report = timer.stop();

        assert_eq!(
            report,
            TimingReport {
                operation: "devices.fetch".into(),
                checkpoints: vec![
                    ("connected".into(), Duration::from_millis(100)),
                    ("decoded".into(), Duration::from_millis(350)),
                ],
                total: Duration::from_millis(400),
                exceeded_threshold: false,
            }
        );
    }

    /// Run `f` with a subscriber that records formatted events.
    fn captured_logs(f: impl FnOnce()) -> String {
        #[derive(Clone, Default)]
        struct Buffer(Arc<Mutex<Vec<u8>>>);

        impl std::io::Write for Buffer {
            fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(bytes);
                Ok(bytes.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_target(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);

        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn exceeding_threshold_is_flagged() {
        let (timer, clock) = timer(1000);
        clock.advance(Duration::from_millis(1001));
        assert!(timer.stop().exceeded_threshold);
    }

    #[test]
    fn exactly_at_threshold_is_not_flagged() {
        let (timer, clock) = timer(1000);
        clock.advance(Duration::from_millis(1000));
        assert!(!timer.stop().exceeded_threshold);
    }

    #[test]
    fn slow_operation_logs_a_warning_with_checkpoints() {
        let logs = captured_logs(|| {
            let (mut timer, clock) = timer(1000);
            clock.advance(Duration::from_millis(300));
            timer.checkpoint("connected");
            clock.advance(Duration::from_millis(900));
            timer.checkpoint("decoded");
            let _ = timer.stop();
        });

        let line = logs.lines().find(|l| l.contains("slow operation")).unwrap();
        assert!(line.contains("WARN"), "{line}");
        assert!(line.contains("operation=devices.fetch"), "{line}");
        assert!(line.contains("elapsed_ms=1200"), "{line}");
        assert!(line.contains("threshold_ms=1000"), "{line}");
        assert!(line.contains("checkpoints=connected@300ms, decoded@1200ms"), "{line}");
    }

    #[test]
    fn fast_operation_logs_at_debug() {
        let logs = captured_logs(|| {
            let (timer, clock) = timer(1000);
            clock.advance(Duration::from_millis(40));
            let _ = timer.stop();
        });

        assert!(!logs.contains("WARN"), "{logs}");
        let line = logs.lines().find(|l| l.contains("operation completed")).unwrap();
        assert!(line.contains("DEBUG"), "{line}");
        assert!(line.contains("elapsed_ms=40"), "{line}");
    }

    #[test]
    fn timing_a_failing_operation_still_reports() {
        fn failing(clock: &ManualClock) -> Result<(), &'static str> {
            let mut timer = PerformanceTimer::start_with_clock(
                "home.fetch",
                Duration::from_millis(10),
                Arc::new(clock.clone()),
            );
            clock.advance(Duration::from_millis(20));
            timer.checkpoint("request");
            Err::<(), _>("boom")?;
            let _ = timer.stop();
            Ok(())
        }

        let clock = ManualClock::new();
        let mut result = Ok(());
        let logs = captured_logs(|| result = failing(&clock));

        assert_eq!(result, Err("boom"));
        let warnings: Vec<&str> = logs.lines().filter(|l| l.contains("WARN")).collect();
        assert_eq!(warnings.len(), 1, "{logs}");
        assert!(warnings[0].contains("slow operation"), "{logs}");
        assert!(warnings[0].contains("operation=home.fetch"), "{logs}");
        assert!(warnings[0].contains("elapsed_ms=20"), "{logs}");
        assert!(warnings[0].contains("checkpoints=request@20ms"), "{logs}");
    }
}
