//! Probe scheduler module for the IPTV checker
//!
//! Runs one probe per channel through a bounded pool of workers pulling from a
//! shared queue. Dead channels can be re-enqueued for a second pass with a
//! longer timeout. Results are handed to a single aggregating owner in
//! completion order and stored back in playlist order.

use crate::concurrency::ConcurrencyPlan;
use crate::playlist::ChannelEntry;
use crate::prober::{FailureReason, ProbeOutcome, Prober};
use crate::screenshot::ScreenshotPlan;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Terminal probe state of a single channel
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeState {
    /// The stream answered
    Alive,
    /// The stream is dead for the given reason
    Dead(FailureReason),
}

impl ProbeState {
    /// Convert state to string for logs
    pub fn as_str(&self) -> &str {
        match self {
            ProbeState::Alive => "alive",
            ProbeState::Dead(_) => "dead",
        }
    }
}

/// Timeouts for the first pass and the optional retry pass
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Budget of the first attempt
    pub timeout: Duration,
    /// Budget of the retry attempt for dead channels (None = no retry)
    pub extended_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, extended_timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            extended_timeout,
        }
    }
}

/// Result of the final probe attempt for one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// 1-based position among the checked channels
    pub position: usize,
    /// The channel that was probed
    pub entry: Arc<ChannelEntry>,
    /// What the probe found
    pub outcome: ProbeOutcome,
    /// 1 for the first pass, 2 for the retry pass, 0 if never dispatched
    pub attempt: u8,
    /// Budget of the attempt
    pub timeout: Duration,
    /// Screenshot written for this channel, if any
    pub screenshot: Option<PathBuf>,
}

impl ProbeResult {
    pub fn is_alive(&self) -> bool {
        self.outcome.is_alive()
    }

    /// Terminal state recorded by this result
    pub fn state(&self) -> ProbeState {
        match &self.outcome {
            ProbeOutcome::Alive(_) => ProbeState::Alive,
            ProbeOutcome::Dead(reason) => ProbeState::Dead(*reason),
        }
    }

    fn undispatched(item: &WorkItem, timeout: Duration, reason: FailureReason) -> Self {
        Self {
            position: item.position,
            entry: item.entry.clone(),
            outcome: ProbeOutcome::Dead(reason),
            attempt: 0,
            timeout,
            screenshot: None,
        }
    }
}

/// Results of a scheduler run, in playlist order
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub results: Vec<ProbeResult>,
    /// True when the run was cancelled before every channel was probed
    pub interrupted: bool,
}

/// One unit of work in the queue
#[derive(Debug, Clone)]
struct WorkItem {
    position: usize,
    entry: Arc<ChannelEntry>,
}

/// Bounded-concurrency probe dispatcher
///
/// At most `max_concurrent_probes` probes are in flight at any time. The
/// cancellation token stops dispatch of queued channels; probes already
/// running finish within their own timeout.
pub struct ProbeScheduler {
    prober: Arc<dyn Prober>,
    plan: ConcurrencyPlan,
    screenshots: Option<ScreenshotPlan>,
    cancel: CancellationToken,
}

impl ProbeScheduler {
    /// Create a new scheduler
    ///
    /// # Arguments
    /// * `prober` - Capability used to inspect each stream
    /// * `plan` - Concurrency plan determining the worker pool size
    pub fn new(prober: Arc<dyn Prober>, plan: ConcurrencyPlan) -> Self {
        Self {
            prober,
            plan,
            screenshots: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Capture a frame from every channel found alive
    pub fn with_screenshots(mut self, screenshots: ScreenshotPlan) -> Self {
        self.screenshots = Some(screenshots);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops dispatch when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Probe every entry and return results in input order
    ///
    /// This method runs up to two passes:
    /// 1. Every entry is probed with `policy.timeout`
    /// 2. If `policy.extended_timeout` is set, entries found dead in pass 1
    ///    are re-enqueued and probed once more with the longer budget
    ///
    /// `on_final` is called once per entry, in completion order, when its
    /// result is final, with the number of final results so far and the total.
    /// With retry enabled, dead entries from pass 1 become final in pass 2.
    pub async fn run<F>(
        &self,
        entries: Vec<ChannelEntry>,
        policy: &RetryPolicy,
        mut on_final: F,
    ) -> ScheduleOutcome
    where
        F: FnMut(&ProbeResult, usize, usize),
    {
        let total = entries.len();
        let items: Vec<WorkItem> = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| WorkItem {
                position: i + 1,
                entry: Arc::new(entry),
            })
            .collect();
        let handles: Vec<Arc<ChannelEntry>> = items.iter().map(|item| item.entry.clone()).collect();

        let mut slots: Vec<Option<ProbeResult>> = vec![None; total];
        let mut completed = 0usize;
        let mut retry_items = Vec::new();
        let retry_enabled = policy.extended_timeout.is_some();

        info!(
            "Probing {} channels with {} workers (timeout {:?})",
            total,
            self.plan.workers_for(total),
            policy.timeout
        );

        self.dispatch(items, policy.timeout, 1, |result| {
            let retryable = retry_enabled
                && matches!(&result.outcome, ProbeOutcome::Dead(reason) if *reason != FailureReason::Cancelled);

            if retryable {
                retry_items.push(WorkItem {
                    position: result.position,
                    entry: result.entry.clone(),
                });
            } else {
                completed += 1;
                on_final(&result, completed, total);
            }
            let slot = result.position - 1;
            slots[slot] = Some(result);
        })
        .await;

        if let Some(extended) = policy.extended_timeout {
            if !retry_items.is_empty() {
                retry_items.sort_by_key(|item| item.position);
                info!(
                    "Retrying {} dead channels with extended timeout {:?}",
                    retry_items.len(),
                    extended
                );

                self.dispatch(retry_items, extended, 2, |result| {
                    let slot = result.position - 1;
                    // An undispatched retry keeps its first-pass verdict.
                    if result.attempt != 0 || slots[slot].is_none() {
                        slots[slot] = Some(result);
                    }
                    if let Some(final_result) = &slots[slot] {
                        completed += 1;
                        on_final(final_result, completed, total);
                    }
                })
                .await;
            }
        }

        let results: Vec<ProbeResult> = slots
            .into_iter()
            .zip(handles)
            .enumerate()
            .map(|(i, (slot, entry))| {
                slot.unwrap_or_else(|| {
                    // Only reachable if a worker task died mid-probe.
                    warn!("No result recorded for channel {}, marking dead", i + 1);
                    let item = WorkItem {
                        position: i + 1,
                        entry,
                    };
                    ProbeResult::undispatched(&item, policy.timeout, FailureReason::ProbeToolError)
                })
            })
            .collect();

        ScheduleOutcome {
            results,
            interrupted: self.cancel.is_cancelled(),
        }
    }

    /// Run one pass over `items` and feed each result to `on_result`
    async fn dispatch<F>(&self, items: Vec<WorkItem>, timeout: Duration, attempt: u8, mut on_result: F)
    where
        F: FnMut(ProbeResult),
    {
        if items.is_empty() {
            return;
        }

        let workers = self.plan.workers_for(items.len());
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        for item in items {
            // receiver is alive until the end of this function
            let _ = work_tx.send(item);
        }
        drop(work_tx);

        let queue = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let mut pool = JoinSet::new();

        for worker_id in 0..workers {
            let worker = Worker {
                id: worker_id,
                queue: queue.clone(),
                results: result_tx.clone(),
                prober: self.prober.clone(),
                screenshots: self.screenshots.clone(),
                cancel: self.cancel.clone(),
                timeout,
                attempt,
            };
            pool.spawn(worker.run());
        }
        drop(result_tx);

        while let Some(result) = result_rx.recv().await {
            on_result(result);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("Probe worker failed: {}", e);
            }
        }
    }
}

/// One member of the worker pool
struct Worker {
    id: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    results: mpsc::UnboundedSender<ProbeResult>,
    prober: Arc<dyn Prober>,
    screenshots: Option<ScreenshotPlan>,
    cancel: CancellationToken,
    timeout: Duration,
    attempt: u8,
}

impl Worker {
    async fn run(self) {
        loop {
            let item = {
                let mut rx = self.queue.lock().await;
                rx.recv().await
            };
            let Some(item) = item else {
                break;
            };

            let result = if self.cancel.is_cancelled() {
                ProbeResult::undispatched(&item, self.timeout, FailureReason::Cancelled)
            } else {
                self.probe(&item).await
            };

            if self.results.send(result).is_err() {
                break;
            }
        }
    }

    async fn probe(&self, item: &WorkItem) -> ProbeResult {
        debug!(
            "worker {} -> {} '{}' (attempt {}, timeout {:?})",
            self.id, item.position, item.entry.name, self.attempt, self.timeout
        );

        let start = Instant::now();
        let outcome = self.prober.probe(&item.entry.url, self.timeout).await;
        let elapsed = start.elapsed();

        let screenshot = match (&outcome, &self.screenshots) {
            (ProbeOutcome::Alive(_), Some(plan)) => capture_screenshot(plan, item).await,
            _ => None,
        };

        let result = ProbeResult {
            position: item.position,
            entry: item.entry.clone(),
            outcome,
            attempt: self.attempt,
            timeout: self.timeout,
            screenshot,
        };
        debug!(
            "worker {} <- {} '{}' {} after {:?}",
            self.id,
            item.position,
            item.entry.name,
            result.state().as_str(),
            elapsed
        );
        result
    }
}

/// Captures a frame; failures are logged and never change the verdict
async fn capture_screenshot(plan: &ScreenshotPlan, item: &WorkItem) -> Option<PathBuf> {
    if let Err(e) = tokio::fs::create_dir_all(&plan.output_dir).await {
        warn!(
            "Cannot create screenshot directory {}: {}",
            plan.output_dir.display(),
            e
        );
        return None;
    }

    let path = plan.path_for(item.position, &item.entry.name);
    match plan.screenshotter.capture(&item.entry.url, &path).await {
        Ok(()) => {
            debug!("Screenshot saved for {} at {}", item.entry.name, path.display());
            Some(path)
        }
        Err(e) => {
            warn!("Screenshot failed for {}: {}", item.entry.name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        alive_1080p60, make_entries, FailingScreenshotter, FakeProber, RecordingScreenshotter,
    };
    use std::sync::atomic::Ordering;

    fn policy(timeout_ms: u64, extended_ms: Option<u64>) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(timeout_ms),
            extended_ms.map(Duration::from_millis),
        )
    }

    #[test]
    fn test_probe_state_as_str() {
        assert_eq!(ProbeState::Alive.as_str(), "alive");
        assert_eq!(ProbeState::Dead(FailureReason::Timeout).as_str(), "dead");
    }

    #[tokio::test]
    async fn test_results_in_input_order_one_per_entry() {
        // later entries finish first
        let prober = FakeProber::new();
        for i in 0..6 {
            prober.set_delay(&format!("http://host/{}", i), Duration::from_millis(60 - i * 10));
        }
        let scheduler = ProbeScheduler::new(Arc::new(prober), ConcurrencyPlan::fixed(6));

        let mut progress = Vec::new();
        let outcome = scheduler
            .run(make_entries(6), &policy(1000, None), |r, done, total| {
                progress.push((r.position, done, total));
            })
            .await;

        assert!(!outcome.interrupted);
        let positions: Vec<usize> = outcome.results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 6]);
        let indices: Vec<usize> = outcome.results.iter().map(|r| r.entry.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);

        // counters reflect completions, not positions
        let counters: Vec<usize> = progress.iter().map(|(_, done, _)| *done).collect();
        assert_eq!(counters, vec![1, 2, 3, 4, 5, 6]);
        assert!(progress.iter().all(|(_, _, total)| *total == 6));
        assert_eq!(progress[0].0, 6);
    }

    #[tokio::test]
    async fn test_peak_concurrency_never_exceeds_limit() {
        let prober = Arc::new(FakeProber::new().with_default_delay(Duration::from_millis(30)));
        let scheduler = ProbeScheduler::new(prober.clone(), ConcurrencyPlan::fixed(2));

        let outcome = scheduler
            .run(make_entries(5), &policy(1000, None), |_, _, _| {})
            .await;

        assert_eq!(outcome.results.len(), 5);
        assert_eq!(prober.calls().len(), 5);
        let peak = prober.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrency {} exceeded limit", peak);
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_extended_retry_only_for_dead_entries() {
        let prober = Arc::new(FakeProber::new());
        prober.set_outcome("http://host/1", ProbeOutcome::Dead(FailureReason::Timeout));
        prober.set_outcome("http://host/3", ProbeOutcome::Dead(FailureReason::ConnectionError));
        let scheduler = ProbeScheduler::new(prober.clone(), ConcurrencyPlan::fixed(3));

        let mut finals = Vec::new();
        let outcome = scheduler
            .run(make_entries(4), &policy(100, Some(900)), |r, done, _| {
                finals.push((r.position, done));
            })
            .await;

        let calls = prober.calls();
        let count = |url: &str| calls.iter().filter(|(u, _)| u == url).count();
        assert_eq!(count("http://host/0"), 1);
        assert_eq!(count("http://host/1"), 2);
        assert_eq!(count("http://host/2"), 1);
        assert_eq!(count("http://host/3"), 2);

        let retry_timeouts: Vec<Duration> = calls
            .iter()
            .filter(|(u, _)| u == "http://host/1")
            .map(|(_, t)| *t)
            .collect();
        assert_eq!(
            retry_timeouts,
            vec![Duration::from_millis(100), Duration::from_millis(900)]
        );

        assert_eq!(outcome.results[1].attempt, 2);
        assert_eq!(outcome.results[0].attempt, 1);

        // exactly one final line per entry, counters 1..=4
        assert_eq!(finals.len(), 4);
        let mut counters: Vec<usize> = finals.iter().map(|(_, d)| *d).collect();
        counters.sort();
        assert_eq!(counters, vec![1, 2, 3, 4]);
        let mut positions: Vec<usize> = finals.iter().map(|(p, _)| *p).collect();
        positions.sort();
        assert_eq!(positions, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_extended_retry_can_revive_slow_stream() {
        let prober = Arc::new(FakeProber::new());
        // dead under 1s, alive with a longer budget
        prober.set_min_timeout("http://host/0", Duration::from_secs(8));
        let scheduler = ProbeScheduler::new(prober.clone(), ConcurrencyPlan::fixed(1));

        let outcome = scheduler
            .run(make_entries(1), &policy(1000, Some(10_000)), |_, _, _| {})
            .await;

        assert!(outcome.results[0].is_alive());
        assert_eq!(outcome.results[0].attempt, 2);
        assert_eq!(outcome.results[0].timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_no_retry_without_extended_timeout() {
        let prober = Arc::new(FakeProber::new());
        prober.set_outcome("http://host/0", ProbeOutcome::Dead(FailureReason::NoStream));
        let scheduler = ProbeScheduler::new(prober.clone(), ConcurrencyPlan::fixed(2));

        let outcome = scheduler
            .run(make_entries(2), &policy(100, None), |_, _, _| {})
            .await;

        assert_eq!(prober.calls().len(), 2);
        assert_eq!(
            outcome.results[0].state(),
            ProbeState::Dead(FailureReason::NoStream)
        );
        assert_eq!(outcome.results[1].state(), ProbeState::Alive);
    }

    #[tokio::test]
    async fn test_cancel_before_run_marks_everything_cancelled() {
        let prober = Arc::new(FakeProber::new());
        let scheduler = ProbeScheduler::new(prober.clone(), ConcurrencyPlan::fixed(2));
        scheduler.cancellation_token().cancel();

        let mut lines = 0;
        let outcome = scheduler
            .run(make_entries(3), &policy(100, Some(200)), |_, _, _| lines += 1)
            .await;

        assert!(outcome.interrupted);
        assert!(prober.calls().is_empty());
        assert_eq!(lines, 3);
        for result in &outcome.results {
            assert_eq!(result.outcome, ProbeOutcome::Dead(FailureReason::Cancelled));
            assert_eq!(result.attempt, 0);
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_run_lets_in_flight_probe_finish() {
        let prober = Arc::new(FakeProber::new().with_default_delay(Duration::from_millis(100)));
        let scheduler = ProbeScheduler::new(prober.clone(), ConcurrencyPlan::fixed(1));
        let token = scheduler.cancellation_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });

        let outcome = scheduler
            .run(make_entries(4), &policy(1000, None), |_, _, _| {})
            .await;

        assert!(outcome.interrupted);
        assert_eq!(outcome.results.len(), 4);
        assert!(outcome.results[0].is_alive());
        for result in &outcome.results[1..] {
            assert_eq!(result.outcome, ProbeOutcome::Dead(FailureReason::Cancelled));
        }
        assert_eq!(prober.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_screenshots_only_for_alive_channels() {
        let prober = Arc::new(FakeProber::new());
        prober.set_outcome("http://host/1", ProbeOutcome::Dead(FailureReason::Timeout));
        let shooter = Arc::new(RecordingScreenshotter::default());
        let dir = tempfile::tempdir().expect("tempdir");

        let scheduler = ProbeScheduler::new(prober, ConcurrencyPlan::fixed(2)).with_screenshots(
            ScreenshotPlan {
                screenshotter: shooter.clone(),
                output_dir: dir.path().join("shots"),
            },
        );

        let outcome = scheduler
            .run(make_entries(3), &policy(100, None), |_, _, _| {})
            .await;

        let mut captured = shooter.captured();
        captured.sort();
        assert_eq!(captured, vec!["http://host/0", "http://host/2"]);
        assert_eq!(
            outcome.results[0].screenshot,
            Some(dir.path().join("shots").join("1-Channel 0.png"))
        );
        assert_eq!(outcome.results[1].screenshot, None);
        assert!(dir.path().join("shots").is_dir());
    }

    #[tokio::test]
    async fn test_screenshot_failure_keeps_alive_verdict() {
        let prober = Arc::new(FakeProber::new());
        prober.set_outcome("http://host/0", alive_1080p60());
        let dir = tempfile::tempdir().expect("tempdir");

        let scheduler = ProbeScheduler::new(prober, ConcurrencyPlan::fixed(1)).with_screenshots(
            ScreenshotPlan {
                screenshotter: Arc::new(FailingScreenshotter),
                output_dir: dir.path().to_path_buf(),
            },
        );

        let outcome = scheduler
            .run(make_entries(1), &policy(100, None), |_, _, _| {})
            .await;

        assert!(outcome.results[0].is_alive());
        assert_eq!(outcome.results[0].screenshot, None);
    }

    #[tokio::test]
    async fn test_empty_entry_list() {
        let scheduler = ProbeScheduler::new(Arc::new(FakeProber::new()), ConcurrencyPlan::fixed(2));
        let outcome = scheduler
            .run(Vec::new(), &policy(100, Some(200)), |_, _, _| {})
            .await;
        assert!(outcome.results.is_empty());
        assert!(!outcome.interrupted);
    }
}
