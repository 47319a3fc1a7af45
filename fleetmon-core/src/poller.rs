//! Concurrent fleet polling
//!
//! Fans out one task per instance under a bounded worker pool, records
//! exactly one [`PollResult`] per instance, and joins the whole set before
//! anything is published. Per-instance failures are isolated; only the
//! directory query is cycle-fatal, and even that is reported rather than
//! escalated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::directory::InstanceDirectory;
use crate::models::{InstanceDescriptor, PollResult, PollStatus, Report};
use crate::parser::LogLineParser;
use crate::report::build_report;
use crate::session::{RemoteSession, SessionLimits, SshCredential};

/// Fetches the last worker log line from one instance.
///
/// This is the transport seam: production uses [`SshProbe`], tests inject
/// fakes. The error string is the already-classified connection diagnostic.
#[async_trait]
pub trait InstanceProbe: Send + Sync {
    /// Connects to the instance and returns the raw tail of its worker log
    async fn fetch_log_line(&self, descriptor: &InstanceDescriptor) -> Result<String, String>;
}

/// The production probe: one scoped SSH session per attempt
#[derive(Debug, Clone)]
pub struct SshProbe {
    /// Credential used for every instance
    pub credential: SshCredential,
    /// Connect/exec timeouts
    pub limits: SessionLimits,
    /// Path of the worker log on the remote host
    pub worker_log_path: String,
    /// Byte cap on remote command output
    pub max_output_bytes: usize,
}

#[async_trait]
impl InstanceProbe for SshProbe {
    async fn fetch_log_line(&self, descriptor: &InstanceDescriptor) -> Result<String, String> {
        let session = RemoteSession::open(descriptor, &self.credential, self.limits)
            .await
            .map_err(|e| e.to_string())?;

        let command = format!("tail -n 1 {}", self.worker_log_path);
        let output = session.run(&command, self.max_output_bytes).await;
        session.close().await;

        output
            .map(|raw| raw.trim_end().to_string())
            .map_err(|e| e.to_string())
    }
}

/// Cancellation token for an in-flight cycle
#[derive(Debug, Clone)]
pub struct PollCancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for PollCancellation {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl PollCancellation {
    /// Creates a fresh token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; in-flight sessions are closed, not abandoned
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for checks the current value first, so a token cancelled
        // before this call resolves immediately
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Bounds on one poll cycle
#[derive(Debug, Clone, Copy)]
pub struct PollLimits {
    /// Hard cap on a single instance's attempt
    pub per_instance_timeout: Duration,
    /// Hard cap on the whole cycle regardless of fleet size
    pub cycle_deadline: Duration,
    /// Maximum concurrent sessions
    pub worker_pool_size: usize,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            per_instance_timeout: Duration::from_secs(30),
            cycle_deadline: Duration::from_secs(120),
            worker_pool_size: 8,
        }
    }
}

/// Orchestrates one concurrent pass over a directory snapshot
pub struct FleetPoller<P: InstanceProbe + 'static> {
    probe: Arc<P>,
    parser: LogLineParser,
    limits: PollLimits,
    cancel: PollCancellation,
}

impl<P: InstanceProbe + 'static> FleetPoller<P> {
    /// Creates a poller over the given probe and parser
    pub fn new(probe: P, parser: LogLineParser, limits: PollLimits) -> Self {
        Self {
            probe: Arc::new(probe),
            parser,
            limits,
            cancel: PollCancellation::new(),
        }
    }

    /// Returns the cancellation token shared with in-flight cycles
    #[must_use]
    pub fn cancellation(&self) -> PollCancellation {
        self.cancel.clone()
    }

    /// Polls every instance in the snapshot concurrently.
    ///
    /// Returns exactly one [`PollResult`] per descriptor, ordered by
    /// instance id, and only after every task has settled. No instance's
    /// failure, however slow or broken, affects any other instance.
    pub async fn poll(&self, snapshot: &[InstanceDescriptor]) -> Vec<PollResult> {
        let deadline = Instant::now() + self.limits.cycle_deadline;
        let semaphore = Arc::new(Semaphore::new(self.limits.worker_pool_size.max(1)));
        let mut tasks = JoinSet::new();

        for descriptor in snapshot.iter().cloned() {
            let probe = Arc::clone(&self.probe);
            let semaphore = Arc::clone(&semaphore);
            let parser = self.parser;
            let cancel = self.cancel.clone();
            let per_instance = self.limits.per_instance_timeout;

            tasks.spawn(async move {
                let attempt = async {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return PollStatus::ConnectionFailure("worker pool closed".to_string());
                    };

                    // Each attempt gets the smaller of its own timeout and
                    // the time left before the cycle deadline
                    let budget =
                        per_instance.min(deadline.saturating_duration_since(Instant::now()));
                    if budget.is_zero() {
                        return PollStatus::ConnectionFailure(format!(
                            "timeout: cycle deadline reached before instance {} was attempted",
                            descriptor.id
                        ));
                    }

                    poll_one(&*probe, &parser, &descriptor, budget).await
                };

                // Racing against cancellation drops the attempt future,
                // which closes its session via kill_on_drop and Drop
                let status = tokio::select! {
                    status = attempt => status,
                    () = cancel.cancelled() => {
                        PollStatus::ConnectionFailure("cycle cancelled".to_string())
                    }
                };
                PollResult::new(descriptor.id, status)
            });
        }

        let mut results = Vec::with_capacity(snapshot.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::error!(error = %e, "Poll task panicked"),
            }
        }

        // Completeness: every snapshot instance yields exactly one result,
        // even if its task was aborted externally
        for descriptor in snapshot {
            if !results.iter().any(|r| r.instance_id == descriptor.id) {
                results.push(PollResult::new(
                    descriptor.id,
                    PollStatus::ConnectionFailure("cycle cancelled".to_string()),
                ));
            }
        }

        results.sort_by_key(|r| r.instance_id);
        results
    }
}

/// One instance's attempt: fetch the log line, parse it, classify failures
async fn poll_one<P: InstanceProbe>(
    probe: &P,
    parser: &LogLineParser,
    descriptor: &InstanceDescriptor,
    budget: Duration,
) -> PollStatus {
    match tokio::time::timeout(budget, probe.fetch_log_line(descriptor)).await {
        Err(_) => {
            tracing::warn!(instance = descriptor.id, budget_secs = budget.as_secs(),
                "Instance exceeded its poll timeout");
            PollStatus::ConnectionFailure(format!(
                "timeout after {}s",
                budget.as_secs()
            ))
        }
        Ok(Err(reason)) => {
            tracing::warn!(instance = descriptor.id, error = %reason, "Connection failed");
            PollStatus::ConnectionFailure(reason)
        }
        Ok(Ok(raw_line)) => match parser.parse(&raw_line) {
            Ok(parsed) => {
                tracing::debug!(
                    instance = descriptor.id,
                    elapsed_hours = parsed.metrics.elapsed_hours,
                    blocks = parsed.metrics.block_count,
                    label = %parsed.label,
                    raw = %raw_line,
                    "Parsed worker log line"
                );
                PollStatus::Success(parsed.metrics)
            }
            Err(e) => {
                tracing::warn!(instance = descriptor.id, error = %e, raw = %raw_line,
                    "Log line did not parse");
                PollStatus::ParseFailure(format!("{e}; raw line: {raw_line}"))
            }
        },
    }
}

/// Events emitted by the periodic poller loop
#[derive(Debug, Clone)]
pub enum PollerEvent {
    /// A cycle completed and its report is ready
    CycleComplete(Report),
    /// The directory query failed; the cycle was skipped (non-fatal, the
    /// next cycle proceeds)
    DirectoryError(String),
    /// The loop stopped
    Stopped,
}

/// Handle to control a running poller loop
#[derive(Debug)]
pub struct PollerHandle {
    stop_tx: mpsc::Sender<()>,
    cancel: PollCancellation,
}

impl PollerHandle {
    /// Signals the loop to stop, cancelling any in-flight cycle so its
    /// stragglers settle immediately instead of running out their timeouts
    pub async fn stop(&self) {
        self.cancel.cancel();
        let _ = self.stop_tx.send(()).await;
    }
}

/// Starts a periodic polling loop.
///
/// Each interval tick queries the directory and runs one full cycle; the
/// resulting [`Report`] is emitted as [`PollerEvent::CycleComplete`].
/// Directory failures skip the cycle and are reported once. Stopping via the
/// handle cancels the in-flight cycle and closes its sessions.
///
/// Returns a handle to stop the loop and a receiver for events.
pub fn start_poller<P: InstanceProbe + 'static>(
    interval: Duration,
    directory: InstanceDirectory,
    poller: FleetPoller<P>,
) -> (PollerHandle, mpsc::Receiver<PollerEvent>) {
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    let (event_tx, event_rx) = mpsc::channel::<PollerEvent>(8);
    let cancel = poller.cancellation();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    let _ = event_tx.send(PollerEvent::Stopped).await;
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = match directory.fetch().await {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            tracing::error!(error = %e, "Directory query failed; skipping cycle");
                            if event_tx
                                .send(PollerEvent::DirectoryError(e.to_string()))
                                .await
                                .is_err()
                            {
                                break; // receiver dropped
                            }
                            continue;
                        }
                    };

                    let results = poller.poll(&snapshot).await;
                    if task_cancel.is_cancelled() {
                        // a stop message is pending; the half-finished cycle
                        // is not worth publishing
                        continue;
                    }
                    let report = build_report(&results, &snapshot);
                    if event_tx
                        .send(PollerEvent::CycleComplete(report))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    });

    (PollerHandle { stop_tx, cancel }, event_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Scripted per-instance behavior for poller tests
    enum FakeOutcome {
        Line(&'static str),
        Error(&'static str),
        Hang(Duration),
    }

    struct FakeProbe {
        outcomes: HashMap<u64, FakeOutcome>,
    }

    #[async_trait]
    impl InstanceProbe for FakeProbe {
        async fn fetch_log_line(
            &self,
            descriptor: &InstanceDescriptor,
        ) -> Result<String, String> {
            match self.outcomes.get(&descriptor.id) {
                Some(FakeOutcome::Line(line)) => Ok((*line).to_string()),
                Some(FakeOutcome::Error(reason)) => Err((*reason).to_string()),
                Some(FakeOutcome::Hang(duration)) => {
                    tokio::time::sleep(*duration).await;
                    Ok(String::new())
                }
                None => Err("unscripted instance".to_string()),
            }
        }
    }

    fn descriptor(id: u64) -> InstanceDescriptor {
        InstanceDescriptor {
            id,
            gpu_name: format!("GPU-{id}"),
            price_per_hour: Some(0.5),
            host: format!("host-{id}"),
            port: 22,
        }
    }

    fn poller_with(
        outcomes: HashMap<u64, FakeOutcome>,
        limits: PollLimits,
    ) -> FleetPoller<FakeProbe> {
        FleetPoller::new(FakeProbe { outcomes }, LogLineParser::default(), limits)
    }

    const GOOD_LINE: &str = "Mining: 7 Blocks [02:15:30, 500 h/s, Details=normal:7]";

    #[tokio::test]
    async fn test_success_and_failures_are_isolated() {
        let mut outcomes = HashMap::new();
        outcomes.insert(1, FakeOutcome::Line(GOOD_LINE));
        outcomes.insert(2, FakeOutcome::Error("auth failure"));
        outcomes.insert(3, FakeOutcome::Line("not a mining line"));

        let poller = poller_with(outcomes, PollLimits::default());
        let snapshot = vec![descriptor(1), descriptor(2), descriptor(3)];
        let results = poller.poll(&snapshot).await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0].status, PollStatus::Success(_)));
        assert!(matches!(results[1].status, PollStatus::ConnectionFailure(_)));
        assert!(matches!(results[2].status, PollStatus::ParseFailure(_)));
    }

    #[tokio::test]
    async fn test_one_hung_instance_times_out_alone() {
        let mut outcomes = HashMap::new();
        for id in 1..=4 {
            outcomes.insert(id, FakeOutcome::Line(GOOD_LINE));
        }
        outcomes.insert(5, FakeOutcome::Hang(Duration::from_secs(30)));

        let limits = PollLimits {
            per_instance_timeout: Duration::from_millis(100),
            cycle_deadline: Duration::from_secs(5),
            worker_pool_size: 8,
        };
        let poller = poller_with(outcomes, limits);
        let snapshot: Vec<_> = (1..=5).map(descriptor).collect();

        let started = std::time::Instant::now();
        let results = poller.poll(&snapshot).await;

        assert_eq!(results.len(), 5);
        let timeouts: Vec<_> = results
            .iter()
            .filter(|r| matches!(&r.status,
                PollStatus::ConnectionFailure(reason) if reason.contains("timeout")))
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].instance_id, 5);
        assert!(started.elapsed() < limits.cycle_deadline);
    }

    #[tokio::test]
    async fn test_cycle_deadline_bounds_total_latency() {
        let mut outcomes = HashMap::new();
        for id in 1..=6 {
            outcomes.insert(id, FakeOutcome::Hang(Duration::from_secs(60)));
        }
        let limits = PollLimits {
            per_instance_timeout: Duration::from_secs(60),
            cycle_deadline: Duration::from_millis(200),
            worker_pool_size: 2,
        };
        let poller = poller_with(outcomes, limits);
        let snapshot: Vec<_> = (1..=6).map(descriptor).collect();

        let started = std::time::Instant::now();
        let results = poller.poll(&snapshot).await;

        // Every instance settles, none runs past the deadline budget
        assert_eq!(results.len(), 6);
        assert!(started.elapsed() < Duration::from_secs(2));
        for result in &results {
            assert!(matches!(result.status, PollStatus::ConnectionFailure(_)));
        }
    }

    #[tokio::test]
    async fn test_results_ordered_by_instance_id() {
        let mut outcomes = HashMap::new();
        for id in [9, 3, 27, 1] {
            outcomes.insert(id, FakeOutcome::Line(GOOD_LINE));
        }
        let poller = poller_with(outcomes, PollLimits::default());
        let snapshot: Vec<_> = [9, 3, 27, 1].into_iter().map(descriptor).collect();
        let results = poller.poll(&snapshot).await;

        let ids: Vec<_> = results.iter().map(|r| r.instance_id).collect();
        assert_eq!(ids, vec![1, 3, 9, 27]);
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_empty_cycle() {
        let poller = poller_with(HashMap::new(), PollLimits::default());
        let results = poller.poll(&[]).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_settles_every_instance() {
        let mut outcomes = HashMap::new();
        for id in 1..=4 {
            outcomes.insert(id, FakeOutcome::Hang(Duration::from_secs(60)));
        }
        let limits = PollLimits {
            per_instance_timeout: Duration::from_secs(60),
            cycle_deadline: Duration::from_secs(60),
            worker_pool_size: 2,
        };
        let poller = poller_with(outcomes, limits);
        let cancel = poller.cancellation();
        let snapshot: Vec<_> = (1..=4).map(descriptor).collect();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let results = poller.poll(&snapshot).await;
        assert_eq!(results.len(), 4);
        for result in &results {
            assert!(matches!(result.status, PollStatus::ConnectionFailure(_)));
        }
    }

    #[tokio::test]
    async fn test_pool_bound_is_respected() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingProbe {
            active: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl InstanceProbe for CountingProbe {
            async fn fetch_log_line(
                &self,
                _descriptor: &InstanceDescriptor,
            ) -> Result<String, String> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(GOOD_LINE.to_string())
            }
        }

        let limits = PollLimits {
            per_instance_timeout: Duration::from_secs(5),
            cycle_deadline: Duration::from_secs(10),
            worker_pool_size: 3,
        };
        let poller = FleetPoller::new(
            CountingProbe {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
            LogLineParser::default(),
            limits,
        );
        let snapshot: Vec<_> = (1..=10).map(descriptor).collect();
        let results = poller.poll(&snapshot).await;

        assert_eq!(results.len(), 10);
        assert!(poller.probe.peak.load(Ordering::SeqCst) <= 3);
    }
}
