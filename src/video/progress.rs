use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Completion callback, called with a fraction in `[0, 1]`
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// One meaningful line of ffmpeg's `-progress` key/value stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Encoded output time in microseconds
    Elapsed(u64),
    /// `progress=end`
    End,
}

/// Parse a `-progress pipe:1` line
///
/// `out_time_ms` is in microseconds despite its name, same as `out_time_us`.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let (key, value) = line.trim().split_once('=')?;
    let value = value.trim();
    match key {
        "out_time_us" | "out_time_ms" => value.parse().ok().map(ProgressEvent::Elapsed),
        "out_time" => parse_clock(value).map(ProgressEvent::Elapsed),
        "progress" if value == "end" => Some(ProgressEvent::End),
        _ => None,
    }
}

/// `HH:MM:SS.ffffff` to microseconds
fn parse_clock(value: &str) -> Option<u64> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((hours * 3600 + minutes * 60) * 1_000_000 + (seconds * 1_000_000.0).round() as u64)
}

/// Shared state between the encoder's stdout reader and the monitor
#[derive(Debug, Default)]
pub struct ProgressChannel {
    elapsed_us: AtomicU64,
    ended: AtomicBool,
}

impl ProgressChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Latest reported position; may move backwards between reads
    pub fn record(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Elapsed(us) => self.elapsed_us.store(us, Ordering::Relaxed),
            ProgressEvent::End => self.ended.store(true, Ordering::Relaxed),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Relaxed)
    }

    /// Feed every line of `reader` into the channel until EOF
    pub async fn pump<R: AsyncRead + Unpin>(self: Arc<Self>, reader: R) {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(event) = parse_progress_line(&line) {
                trace!("progress: {:?}", event);
                self.record(event);
            }
        }
    }
}

/// Monotonic, clamped fraction of `total` seconds
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: f64,
    last: f64,
}

impl ProgressTracker {
    pub fn new(total: f64) -> Self {
        Self { total, last: 0.0 }
    }

    /// New fraction if it moved forward; regressions are ignored
    pub fn update(&mut self, elapsed: f64) -> Option<f64> {
        if self.total.is_nan() || self.total <= 0.0 || !elapsed.is_finite() {
            return None;
        }
        let fraction = (elapsed / self.total).clamp(0.0, 1.0);
        if fraction > self.last {
            self.last = fraction;
            Some(fraction)
        } else {
            None
        }
    }

    /// Jump to 1.0 if not there yet
    pub fn complete(&mut self) -> Option<f64> {
        if self.last < 1.0 {
            self.last = 1.0;
            Some(1.0)
        } else {
            None
        }
    }

    pub fn last(&self) -> f64 {
        self.last
    }
}

/// Polls a [`ProgressChannel`] on an interval and reports through a callback
///
/// The polling task is aborted when the monitor is stopped or dropped, so
/// every exit path of the encoder tears it down.
pub struct ProgressMonitor {
    channel: Arc<ProgressChannel>,
    tracker: Arc<Mutex<ProgressTracker>>,
    callback: ProgressCallback,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    pub fn start(
        channel: Arc<ProgressChannel>,
        total_duration: f64,
        poll_interval: Duration,
        callback: ProgressCallback,
    ) -> Self {
        let tracker = Arc::new(Mutex::new(ProgressTracker::new(total_duration)));

        let handle = {
            let channel = Arc::clone(&channel);
            let tracker = Arc::clone(&tracker);
            let callback = Arc::clone(&callback);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(poll_interval);
                loop {
                    ticker.tick().await;
                    report(&tracker, &callback, channel.elapsed_secs());
                    if channel.has_ended() {
                        break;
                    }
                }
            })
        };

        debug!("Progress monitor started ({:?} interval)", poll_interval);
        Self {
            channel,
            tracker,
            callback,
            handle: Some(handle),
        }
    }

    /// Stop polling; a successful encode is reported as complete
    pub async fn stop(mut self, succeeded: bool) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            // A cancelled task reports JoinError; there is nothing to surface
            let _ = handle.await;
        }

        report(&self.tracker, &self.callback, self.channel.elapsed_secs());
        if succeeded {
            let done = self.tracker.lock().ok().and_then(|mut t| t.complete());
            if let Some(fraction) = done {
                (self.callback)(fraction);
            }
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn report(tracker: &Mutex<ProgressTracker>, callback: &ProgressCallback, elapsed: f64) {
    let update = match tracker.lock() {
        Ok(mut tracker) => tracker.update(elapsed),
        Err(_) => None,
    };
    if let Some(fraction) = update {
        callback(fraction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |f| sink.lock().unwrap().push(f));
        (callback, seen)
    }

    #[test]
    fn test_parse_progress_lines() {
        assert_eq!(parse_progress_line("out_time_ms=3333333"), Some(ProgressEvent::Elapsed(3_333_333)));
        assert_eq!(parse_progress_line("out_time_us=42"), Some(ProgressEvent::Elapsed(42)));
        assert_eq!(
            parse_progress_line("out_time=00:01:02.500000"),
            Some(ProgressEvent::Elapsed(62_500_000))
        );
        assert_eq!(parse_progress_line("progress=end"), Some(ProgressEvent::End));
        assert_eq!(parse_progress_line("progress=continue"), None);
        assert_eq!(parse_progress_line("out_time_ms=N/A"), None);
        assert_eq!(parse_progress_line("frame=12"), None);
    }

    #[test]
    fn test_tracker_is_monotonic_and_clamped() {
        let mut tracker = ProgressTracker::new(10.0);
        assert_eq!(tracker.update(2.0), Some(0.2));
        assert_eq!(tracker.update(1.0), None);
        assert_eq!(tracker.last(), 0.2);
        assert_eq!(tracker.update(25.0), Some(1.0));
        assert_eq!(tracker.update(30.0), None);
        assert_eq!(tracker.complete(), None);
    }

    #[test]
    fn test_tracker_with_zero_total() {
        let mut tracker = ProgressTracker::new(0.0);
        assert_eq!(tracker.update(5.0), None);
        assert_eq!(tracker.complete(), Some(1.0));
    }

    #[tokio::test]
    async fn test_pump_reads_stream() {
        let channel = ProgressChannel::new();
        let input: &[u8] = b"frame=1\nout_time_ms=1500000\nprogress=continue\nout_time_ms=900000\nprogress=end\n";
        Arc::clone(&channel).pump(input).await;

        // the latest value wins in the channel; monotonicity is the monitor's job
        assert!((channel.elapsed_secs() - 0.9).abs() < 1e-9);
        assert!(channel.has_ended());
    }

    #[tokio::test]
    async fn test_monitor_reports_non_decreasing_values() {
        let channel = ProgressChannel::new();
        let (callback, seen) = recorder();
        let monitor = ProgressMonitor::start(
            Arc::clone(&channel),
            4.0,
            Duration::from_millis(5),
            callback,
        );

        for us in [1_000_000, 3_000_000, 2_000_000, 6_000_000] {
            channel.record(ProgressEvent::Elapsed(us));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        monitor.stop(true).await;

        let values = seen.lock().unwrap().clone();
        assert!(!values.is_empty());
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(*values.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_failed_run_does_not_claim_completion() {
        let channel = ProgressChannel::new();
        let (callback, seen) = recorder();
        let monitor = ProgressMonitor::start(
            Arc::clone(&channel),
            10.0,
            Duration::from_millis(5),
            callback,
        );
        channel.record(ProgressEvent::Elapsed(2_000_000));
        monitor.stop(false).await;

        let values = seen.lock().unwrap().clone();
        assert_eq!(values.last().copied(), Some(0.2));
    }
}
