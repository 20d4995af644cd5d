//! Job scheduling and execution.
//!
//! The manager owns every job, admits at most one into `running`, and
//! drives the active plan line by line through the controller port.
//! Progress is throttled onto the event bus; pause, resume, and cancel
//! are observed between sends and wake any in-flight wait.

use crate::events::EventBus;
use crate::transport::{ControllerPort, TransportEvent};
use plot_common::errors::{PlotError, Result};
use plot_common::gcode::{self, Layer, Plan};
use plot_common::types::{JobId, JobState, MachinePosition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default floor between two progress events.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Live progress of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// Lines fully processed so far.
    pub current_line: u32,
    pub total_lines: u32,
    /// Rounded percentage in `[0, 100]`.
    pub percentage: u32,
    pub current_layer: u32,
    pub total_layers: u32,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_position: Option<MachinePosition>,
}

/// One pause or resume, appended to the job's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unix ms.
    pub timestamp: i64,
    pub line: u32,
    pub action: HistoryAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Pause,
    Resume,
}

/// Failure details stamped onto a job that hit an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub message: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// A submitted plan and everything the scheduler tracks about it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    /// Unix ms.
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    pub plan: Plan,
    pub progress: JobProgress,
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip)]
    cancel: CancellationToken,
    /// Incremented on every (re-)start; a stale executor exits when it
    /// no longer matches.
    #[serde(skip)]
    run_generation: u64,
    /// True while an executor task is draining this job.
    #[serde(skip)]
    executing: bool,
}

impl Job {
    fn new(plan: Plan) -> Self {
        let total_lines = plan.stats.total_lines;
        let total_layers = plan.layers.len() as u32;
        let estimated = plan.stats.estimated_time_ms;
        Self {
            id: JobId::new(),
            state: JobState::Pending,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
            plan,
            progress: JobProgress {
                current_line: 0,
                total_lines,
                percentage: 0,
                current_layer: 0,
                total_layers,
                elapsed_ms: 0,
                estimated_remaining_ms: estimated,
                current_position: None,
            },
            history: Vec::new(),
            error: None,
            cancel: CancellationToken::new(),
            run_generation: 0,
            executing: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    pub progress_interval: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

struct Inner {
    jobs: RwLock<HashMap<JobId, Job>>,
    /// At most one job is running; this gate holds its id.
    active: Mutex<Option<JobId>>,
    port: Arc<dyn ControllerPort>,
    bus: EventBus,
    config: JobManagerConfig,
}

/// The scheduler.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(port: Arc<dyn ControllerPort>, bus: EventBus, config: JobManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                active: Mutex::new(None),
                port,
                bus,
                config,
            }),
        }
    }

    /// Create a pending job from a parsed plan.
    pub async fn submit(&self, plan: Plan) -> Job {
        let job = Job::new(plan);
        let snapshot = job.clone();
        self.inner.jobs.write().await.insert(job.id, job);
        info!(job = %snapshot.id, lines = snapshot.progress.total_lines, "job created");
        self.inner
            .bus
            .broadcast("job:created", &serde_json::json!({ "job": &snapshot }))
            .await;
        snapshot
    }

    /// Parse raw G-code and submit it.
    pub async fn submit_gcode(&self, content: &str) -> Job {
        self.submit(gcode::parse(content)).await
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.inner.jobs.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn active_job_id(&self) -> Option<JobId> {
        *self.inner.active.lock().await
    }

    /// Start a pending job, or re-enter a paused one from its current
    /// line. Fails when another job holds the running slot.
    pub async fn start(&self, id: &JobId) -> Result<()> {
        let mut active = self.inner.active.lock().await;
        if let Some(current) = *active {
            if current != *id {
                return Err(PlotError::invalid_state(format!(
                    "job {current} is already running"
                )));
            }
        }

        let (generation, fresh_start) = {
            let mut jobs = self.inner.jobs.write().await;
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| PlotError::NotFound(id.to_string()))?;
            if !job.state.can_start() {
                return Err(PlotError::invalid_state(format!(
                    "cannot start a job in state {}",
                    job.state
                )));
            }
            let fresh = job.state == JobState::Pending;
            job.state = JobState::Running;
            if job.started_at.is_none() {
                job.started_at = Some(now_ms());
            }
            job.run_generation += 1;
            (job.run_generation, fresh)
        };

        *active = Some(*id);
        drop(active);

        if fresh_start {
            self.inner
                .bus
                .broadcast_job(id, "job:started", &serde_json::json!({ "jobId": id }))
                .await;
        }

        let inner = self.inner.clone();
        let id = *id;
        tokio::spawn(async move {
            run_job(inner, id, generation).await;
        });
        Ok(())
    }

    /// Pause a running job. The executor exits cleanly before its next
    /// send; the line in flight completes normally.
    pub async fn pause(&self, id: &JobId) -> Result<()> {
        let progress = {
            let mut jobs = self.inner.jobs.write().await;
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| PlotError::NotFound(id.to_string()))?;
            if job.state != JobState::Running {
                return Err(PlotError::invalid_state(format!(
                    "cannot pause a job in state {}",
                    job.state
                )));
            }
            job.state = JobState::Paused;
            job.history.push(HistoryEntry {
                timestamp: now_ms(),
                line: job.progress.current_line,
                action: HistoryAction::Pause,
            });
            job.progress.clone()
        };

        info!(job = %id, line = progress.current_line, "job paused");
        self.inner
            .bus
            .broadcast_job(
                id,
                "job:paused",
                &serde_json::json!({ "jobId": id, "line": progress.current_line }),
            )
            .await;
        self.emit_progress(id, &progress).await;
        self.inner.port.pause_motion().await?;
        Ok(())
    }

    /// Resume a paused job from its current line.
    pub async fn resume(&self, id: &JobId) -> Result<()> {
        let (line, progress) = {
            let mut jobs = self.inner.jobs.write().await;
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| PlotError::NotFound(id.to_string()))?;
            if job.state != JobState::Paused {
                return Err(PlotError::invalid_state(format!(
                    "cannot resume a job in state {}",
                    job.state
                )));
            }
            job.history.push(HistoryEntry {
                timestamp: now_ms(),
                line: job.progress.current_line,
                action: HistoryAction::Resume,
            });
            (job.progress.current_line, job.progress.clone())
        };

        info!(job = %id, line, "job resumed");
        self.inner
            .bus
            .broadcast_job(
                id,
                "job:resumed",
                &serde_json::json!({ "jobId": id, "line": line }),
            )
            .await;
        self.emit_progress(id, &progress).await;
        self.start(id).await
    }

    /// Cancel a running or paused job: fire the abort token and issue a
    /// controller stop. No further progress events follow.
    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        let was_paused = {
            let mut jobs = self.inner.jobs.write().await;
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| PlotError::NotFound(id.to_string()))?;
            if !matches!(job.state, JobState::Running | JobState::Paused) {
                return Err(PlotError::invalid_state(format!(
                    "cannot cancel a job in state {}",
                    job.state
                )));
            }
            job.cancel.cancel();
            let was_paused = job.state == JobState::Paused;
            if was_paused {
                // No executor is draining a paused job; finish here.
                job.state = JobState::Cancelled;
                job.completed_at = Some(now_ms());
            }
            was_paused
        };

        if was_paused {
            self.clear_active(id).await;
        }
        info!(job = %id, "job cancelled");
        self.inner.port.stop_motion().await?;
        Ok(())
    }

    /// Remove a finished or idle job. Running jobs are refused.
    pub async fn delete(&self, id: &JobId) -> Result<()> {
        let mut jobs = self.inner.jobs.write().await;
        let job = jobs
            .get(id)
            .ok_or_else(|| PlotError::NotFound(id.to_string()))?;
        if job.state == JobState::Running {
            return Err(PlotError::invalid_state(
                "cannot delete a running job".to_string(),
            ));
        }
        jobs.remove(id);
        Ok(())
    }

    /// Forward transport events: positions flow to the active job and
    /// to every client; link transitions become `machine:status`.
    pub fn spawn_event_forwarder(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let mut events = inner.port.subscribe_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Position(position)) => {
                        let active = *inner.active.lock().await;
                        if let Some(id) = active {
                            if let Some(job) = inner.jobs.write().await.get_mut(&id) {
                                job.progress.current_position = Some(position);
                            }
                        }
                        inner.bus.broadcast("position:update", &position).await;
                    }
                    Ok(TransportEvent::Ready) => {
                        inner
                            .bus
                            .broadcast(
                                "machine:status",
                                &serde_json::json!({ "status": "ready" }),
                            )
                            .await;
                    }
                    Ok(TransportEvent::Error(message)) => {
                        inner
                            .bus
                            .broadcast(
                                "machine:status",
                                &serde_json::json!({ "status": "error", "message": message }),
                            )
                            .await;
                    }
                    Ok(TransportEvent::Closed) => {
                        inner
                            .bus
                            .broadcast(
                                "machine:status",
                                &serde_json::json!({ "status": "disconnected" }),
                            )
                            .await;
                    }
                    Ok(TransportEvent::Data(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event forwarder lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn emit_progress(&self, id: &JobId, progress: &JobProgress) {
        self.inner
            .bus
            .broadcast_job(
                id,
                "job:progress",
                &serde_json::json!({ "jobId": id, "progress": progress }),
            )
            .await;
    }

    async fn clear_active(&self, id: &JobId) {
        clear_active(&self.inner, id).await;
    }
}

async fn clear_active(inner: &Inner, id: &JobId) {
    let mut active = inner.active.lock().await;
    if active.as_ref() == Some(id) {
        *active = None;
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

enum RunOutcome {
    Completed,
    Cancelled,
    PausedExit,
    Superseded,
    Failed(JobError),
}

/// Drain a job's plan through the controller port.
async fn run_job(inner: Arc<Inner>, id: JobId, generation: u64) {
    // Hand-off from any previous executor of this job: it exits on the
    // generation bump, and the line snapshot below must happen after its
    // final bookkeeping.
    loop {
        let mut jobs = inner.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else { return };
        if job.run_generation != generation {
            return;
        }
        if !job.executing {
            job.executing = true;
            break;
        }
        drop(jobs);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let (lines, token, layers, total_lines, start_line, prior_elapsed_ms) = {
        let jobs = inner.jobs.read().await;
        let Some(job) = jobs.get(&id) else { return };
        (
            job.plan
                .content
                .lines()
                .map(str::to_owned)
                .collect::<Vec<String>>(),
            job.cancel.clone(),
            job.plan.layers.clone(),
            job.progress.total_lines,
            job.progress.current_line,
            job.progress.elapsed_ms,
        )
    };

    let run_started = Instant::now();
    let mut sent_in_run: u64 = 0;
    let mut last_progress = Instant::now();
    let mut outcome = RunOutcome::Completed;

    for idx in (start_line as usize)..lines.len() {
        if token.is_cancelled() {
            outcome = RunOutcome::Cancelled;
            break;
        }
        match current_state(&inner, &id, generation).await {
            LoopState::Run => {}
            LoopState::Paused => {
                outcome = RunOutcome::PausedExit;
                break;
            }
            LoopState::Superseded => {
                outcome = RunOutcome::Superseded;
                break;
            }
        }

        let new_line = idx as u32 + 1;
        let trimmed = lines[idx].trim();

        // Blank and comment-only lines advance without touching the
        // controller.
        if trimmed.is_empty() || trimmed.starts_with(';') {
            advance_line(
                &inner,
                &id,
                new_line,
                total_lines,
                &layers,
                prior_elapsed_ms + run_started.elapsed().as_millis() as u64,
                per_line_ms(&run_started, sent_in_run),
                &mut last_progress,
            )
            .await;
            continue;
        }

        let sent = tokio::select! {
            _ = token.cancelled() => Err(PlotError::Cancelled),
            result = inner.port.send_line(trimmed) => result,
        };

        match sent {
            Ok(_) => {
                sent_in_run += 1;
                advance_line(
                    &inner,
                    &id,
                    new_line,
                    total_lines,
                    &layers,
                    prior_elapsed_ms + run_started.elapsed().as_millis() as u64,
                    per_line_ms(&run_started, sent_in_run),
                    &mut last_progress,
                )
                .await;
            }
            Err(e) if e.is_cancelled() => {
                outcome = RunOutcome::Cancelled;
                break;
            }
            Err(e) => {
                let paused = matches!(
                    current_state(&inner, &id, generation).await,
                    LoopState::Paused
                );
                if paused {
                    // Pause raced the failing send; keep the job paused
                    // and let resume retry this line.
                    outcome = RunOutcome::PausedExit;
                } else {
                    outcome = RunOutcome::Failed(JobError {
                        message: e.to_string(),
                        line: new_line,
                        command: Some(trimmed.to_string()),
                    });
                }
                break;
            }
        }
    }

    finish_run(&inner, &id, generation, outcome).await;
}

enum LoopState {
    Run,
    Paused,
    Superseded,
}

async fn current_state(inner: &Inner, id: &JobId, generation: u64) -> LoopState {
    let jobs = inner.jobs.read().await;
    match jobs.get(id) {
        Some(job) if job.run_generation != generation => LoopState::Superseded,
        Some(job) if job.state == JobState::Running => LoopState::Run,
        Some(job) if job.state == JobState::Paused => LoopState::Paused,
        _ => LoopState::Superseded,
    }
}

fn per_line_ms(run_started: &Instant, sent_in_run: u64) -> u64 {
    if sent_in_run == 0 {
        0
    } else {
        run_started.elapsed().as_millis() as u64 / sent_in_run
    }
}

/// Bump the line counter, refresh estimates, detect layer boundaries,
/// and emit throttled progress.
#[allow(clippy::too_many_arguments)]
async fn advance_line(
    inner: &Inner,
    id: &JobId,
    new_line: u32,
    total_lines: u32,
    layers: &[Layer],
    elapsed_ms: u64,
    ms_per_line: u64,
    last_progress: &mut Instant,
) {
    let (progress, layer_change) = {
        let mut jobs = inner.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else { return };
        job.progress.current_line = new_line;
        job.progress.elapsed_ms = elapsed_ms;
        job.progress.percentage = if total_lines == 0 {
            100
        } else {
            ((new_line as f64 / total_lines as f64) * 100.0).round() as u32
        };
        let remaining_lines = total_lines.saturating_sub(new_line) as u64;
        job.progress.estimated_remaining_ms = remaining_lines * ms_per_line;

        let layer_change = layers
            .iter()
            .find(|l| l.start_line == new_line && l.index != job.progress.current_layer)
            .map(|l| (l.index, l.name.clone()));
        if let Some((index, _)) = &layer_change {
            job.progress.current_layer = *index;
        }
        (job.progress.clone(), layer_change)
    };

    if let Some((index, name)) = &layer_change {
        debug!(job = %id, layer = index, "layer boundary");
        inner
            .bus
            .broadcast_job(
                id,
                "job:layer-change",
                &serde_json::json!({ "jobId": id, "layer": index, "name": name }),
            )
            .await;
    }

    let forced = layer_change.is_some();
    if forced || last_progress.elapsed() >= inner.config.progress_interval {
        *last_progress = Instant::now();
        inner
            .bus
            .broadcast_job(
                id,
                "job:progress",
                &serde_json::json!({ "jobId": id, "progress": &progress }),
            )
            .await;
    }
}

async fn finish_run(inner: &Arc<Inner>, id: &JobId, generation: u64, outcome: RunOutcome) {
    let emit = {
        let mut jobs = inner.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else { return };
        job.executing = false;
        if job.run_generation != generation {
            // A newer executor owns the job now; leave its state alone.
            None
        } else {
            match outcome {
                RunOutcome::Completed => {
                    job.state = JobState::Completed;
                    job.completed_at = Some(now_ms());
                    job.progress.current_line = job.progress.total_lines;
                    job.progress.percentage = 100;
                    job.progress.estimated_remaining_ms = 0;
                    Some(("job:completed", job.progress.clone(), None))
                }
                RunOutcome::Cancelled => {
                    job.state = JobState::Cancelled;
                    job.completed_at = Some(now_ms());
                    None
                }
                RunOutcome::Failed(ref error) => {
                    job.state = JobState::Error;
                    job.completed_at = Some(now_ms());
                    job.error = Some(error.clone());
                    Some(("job:error", job.progress.clone(), Some(error.clone())))
                }
                RunOutcome::PausedExit | RunOutcome::Superseded => None,
            }
        }
    };

    match &emit {
        Some(("job:completed", progress, _)) => {
            info!(job = %id, "job completed");
            inner
                .bus
                .broadcast_job(
                    id,
                    "job:progress",
                    &serde_json::json!({ "jobId": id, "progress": progress }),
                )
                .await;
            inner
                .bus
                .broadcast_job(
                    id,
                    "job:completed",
                    &serde_json::json!({ "jobId": id, "progress": progress }),
                )
                .await;
        }
        Some((_, _, Some(error))) => {
            warn!(job = %id, line = error.line, "job failed: {}", error.message);
            inner
                .bus
                .broadcast_job(
                    id,
                    "job:error",
                    &serde_json::json!({ "jobId": id, "error": error }),
                )
                .await;
        }
        _ => {}
    }

    // A superseded executor must not release the slot the new one holds.
    if !matches!(outcome, RunOutcome::Superseded) {
        clear_active(inner, id).await;
    }
}
