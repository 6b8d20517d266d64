use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::command;
use crate::engine::{Engine, EngineProcess};
use crate::error::QueueError;
use crate::fstools::unique_output_path;
use crate::job::{Job, JobId, JobStatus, SkipReason};
use crate::probe::Prober;
use crate::progress::{ProgressParser, ProgressTracker};
use crate::queue::JobQueue;
use crate::settings::{resolve, EncodeSettings};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);
const STDERR_TAIL_LINES: usize = 20;

/// Cooperative stop request shared between the runner and whoever wants
/// to stop it (including a signal handler).
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for `signal_hook::flag::register`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressReport {
    pub id: JobId,
    pub job_percent: u8,
    pub queue_percent: u8,
    pub elapsed_seconds: f64,
    pub speed: Option<f64>,
    pub fps: Option<f64>,
    pub wall_seconds: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Jobs the run never reached.
    pub not_started: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.failed == 0
    }
}

#[derive(Clone, Debug)]
pub enum RunEvent {
    RunStarted { jobs: usize, total_duration: f64 },
    JobStarted { id: JobId, path: PathBuf, output: PathBuf, settings: EncodeSettings },
    JobProgress(ProgressReport),
    /// Raw engine output, only published in debug mode.
    EngineLine { id: JobId, line: String },
    JobFinished { id: JobId, status: JobStatus },
    RunFinished(RunSummary),
}

struct RunState {
    total_queue_duration: f64,
    completed_duration: f64,
    /// Last media position the engine reported for the current job.
    last_elapsed: f64,
    tracker: ProgressTracker,
}

/// Runs every job in the queue, one engine process at a time.
pub struct QueueRunner {
    queue: Arc<Mutex<JobQueue>>,
    globals: Arc<RwLock<EncodeSettings>>,
    engine: Box<dyn Engine>,
    prober: Arc<dyn Prober>,
    cancel: CancelToken,
    save_dir: Option<PathBuf>,
    debug: bool,
    grace_period: Duration,
    subscribers: Vec<Sender<RunEvent>>,
}

impl QueueRunner {
    pub fn new(
        queue: Arc<Mutex<JobQueue>>,
        globals: Arc<RwLock<EncodeSettings>>,
        engine: Box<dyn Engine>,
        prober: Arc<dyn Prober>,
        cancel: CancelToken,
    ) -> Self {
        QueueRunner {
            queue,
            globals,
            engine,
            prober,
            cancel,
            save_dir: None,
            debug: false,
            grace_period: DEFAULT_GRACE_PERIOD,
            subscribers: vec![],
        }
    }

    /// Folder for outputs; `None` writes next to each source.
    pub fn save_dir(mut self, save_dir: Option<PathBuf>) -> Self {
        self.save_dir = save_dir;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn subscribe(&mut self) -> Receiver<RunEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&self, msg: RunEvent) {
        for tx in &self.subscribers {
            let _ = tx.send(msg.clone());
        }
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut JobQueue) -> R) -> R {
        let mut queue = self.queue.lock();
        f(&mut queue)
    }

    /// Executes the queue in order. Returns once every job has finished or
    /// the run was cancelled.
    pub fn run(&mut self) -> Result<RunSummary, QueueError> {
        let (ids, total_queue_duration) = self.with_queue(|q| {
            q.begin_run()?;
            let total: f64 = q.jobs().iter().map(|j| j.duration_seconds).sum();
            Ok::<_, QueueError>((q.ids(), total))
        })?;

        info!("starting run of {} jobs ({:.1} s of media)", ids.len(), total_queue_duration);
        self.publish(RunEvent::RunStarted { jobs: ids.len(), total_duration: total_queue_duration });

        let mut state = RunState {
            total_queue_duration,
            completed_duration: 0.0,
            last_elapsed: 0.0,
            tracker: ProgressTracker::new(),
        };
        let mut outcome = RunOutcome::Completed;

        for id in ids {
            if self.cancel.is_cancelled() {
                outcome = RunOutcome::Cancelled;
                break;
            }
            let Some(job) = self.with_queue(|q| q.get(id).cloned()) else {
                continue;
            };

            let status = self.run_job(&job, &mut state);
            self.with_queue(|q| q.set_status(id, status.clone()));
            self.publish(RunEvent::JobFinished { id, status: status.clone() });

            match status {
                JobStatus::Cancelled => {
                    info!("{} cancelled", id);
                    outcome = RunOutcome::Cancelled;
                    break;
                },
                JobStatus::Done => info!("{} done", id),
                JobStatus::Failed(ref reason) => error!("{} failed: {}", id, reason),
                JobStatus::Skipped(reason) => warn!("{} skipped: {}", id, reason),
                _ => (),
            }
            state.completed_duration += job.duration_seconds;
            self.publish_finished_progress(&job, &status, &mut state);
        }

        let summary = self.with_queue(|q| {
            q.end_run();
            summarize(q.jobs(), outcome)
        });
        info!("run finished: {:?}", summary);
        self.publish(RunEvent::RunFinished(summary.clone()));
        Ok(summary)
    }

    /// Queue progress moves on for every handled job, not only successful ones.
    fn publish_finished_progress(&self, job: &Job, status: &JobStatus, state: &mut RunState) {
        let queue_percent = state.tracker.finish_job(state.completed_duration, state.total_queue_duration);
        let (job_percent, elapsed_seconds) = match status {
            JobStatus::Done => (100, job.duration_seconds),
            _ => {
                let percent = self.with_queue(|q| q.get(job.id).map(|j| j.progress_percent)).unwrap_or(0);
                (percent, state.last_elapsed)
            },
        };
        self.publish(RunEvent::JobProgress(ProgressReport {
            id: job.id,
            job_percent,
            queue_percent,
            elapsed_seconds,
            speed: None,
            fps: None,
            wall_seconds: None,
        }));
    }

    fn run_job(&self, job: &Job, state: &mut RunState) -> JobStatus {
        let id = job.id;
        state.last_elapsed = 0.0;
        if !job.path.is_file() {
            return JobStatus::Skipped(SkipReason::MissingFile);
        }

        let metadata = match self.prober.probe(&job.path) {
            Ok(metadata) => {
                self.with_queue(|q| q.set_metadata(id, metadata.clone()));
                metadata
            },
            Err(err) => {
                warn!("{}; using metadata from when {} was queued", err, id);
                job.metadata.clone()
            },
        };
        let Some(audio) = metadata.audio_track(job.selected_audio_track).cloned() else {
            return JobStatus::Skipped(SkipReason::NoAudio);
        };

        let settings = resolve(job, &self.globals.read());
        let output = unique_output_path(&job.path, self.save_dir.as_deref());
        let args = command::build(job, &metadata, &settings, &audio, &output);

        self.with_queue(|q| {
            q.set_output_path(id, output.clone());
            q.set_status(id, JobStatus::Running);
        });
        info!("{} {} -> {} ({})", id, job.path.display(), output.display(), settings);
        self.publish(RunEvent::JobStarted {
            id,
            path: job.path.clone(),
            output: output.clone(),
            settings: settings.clone(),
        });

        let mut process = match self.engine.launch(&args) {
            Ok(process) => process,
            Err(err) => return JobStatus::Failed(err.to_string()),
        };

        state.tracker.start_job();
        let parser = ProgressParser::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        while let Some(line) = process.next_line() {
            if self.debug {
                self.publish(RunEvent::EngineLine { id, line: line.clone() });
            }

            if let Some(update) = parser.parse(&line) {
                state.last_elapsed = update.elapsed_seconds;
                let (job_percent, queue_percent) = state.tracker.update(
                    state.completed_duration,
                    update.elapsed_seconds,
                    job.duration_seconds,
                    state.total_queue_duration);
                self.with_queue(|q| q.set_progress(id, job_percent));
                self.publish(RunEvent::JobProgress(ProgressReport {
                    id,
                    job_percent,
                    queue_percent,
                    elapsed_seconds: update.elapsed_seconds,
                    speed: update.speed,
                    fps: update.fps,
                    wall_seconds: update.wall_seconds,
                }));
            }

            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);

            if self.cancel.is_cancelled() {
                self.stop_engine(process.as_mut());
                remove_partial_output(&output);
                return JobStatus::Cancelled;
            }
        }

        let status = match process.wait() {
            Ok(exit) if exit.success => JobStatus::Done,
            Ok(exit) => match exit.code {
                Some(code) => JobStatus::Failed(format!("ffmpeg exited with {}", code)),
                None => JobStatus::Failed(String::from("ffmpeg did not exit successfully")),
            },
            Err(err) => JobStatus::Failed(err.to_string()),
        };

        match status {
            JobStatus::Done => {
                self.with_queue(|q| q.set_progress(id, 100));
                status
            },
            _ if self.cancel.is_cancelled() => {
                remove_partial_output(&output);
                JobStatus::Cancelled
            },
            _ => {
                for line in &tail {
                    warn!(target: "engine", "{}", line);
                }
                remove_partial_output(&output);
                status
            },
        }
    }

    /// Terminate, give the engine a moment to finish, then kill the tree.
    fn stop_engine(&self, process: &mut dyn EngineProcess) {
        if let Err(err) = process.terminate() {
            warn!("{}", err);
        }
        let deadline = Instant::now() + self.grace_period;
        loop {
            match process.try_wait() {
                Ok(Some(exit)) => {
                    debug!("engine stopped after terminate: {:?}", exit);
                    return;
                },
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
                Ok(None) => break,
                Err(err) => {
                    warn!("{}", err);
                    break;
                },
            }
        }
        warn!("engine still running after {:?}; killing it", self.grace_period);
        if let Err(err) = process.kill() {
            error!("{}", err);
        }
        if let Err(err) = process.wait() {
            warn!("{}", err);
        }
    }
}

/// Best effort; a file we cannot delete is logged, not escalated.
fn remove_partial_output(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => info!("removed incomplete {}", path.display()),
        Err(err) => warn!("unable to remove incomplete {}: {}", path.display(), err),
    }
}

fn summarize(jobs: &[Job], outcome: RunOutcome) -> RunSummary {
    let count = |f: fn(&JobStatus) -> bool| jobs.iter().filter(|j| f(&j.status)).count();
    RunSummary {
        outcome,
        done: count(|s| matches!(s, JobStatus::Done)),
        failed: count(|s| matches!(s, JobStatus::Failed(_))),
        skipped: count(|s| matches!(s, JobStatus::Skipped(_))),
        cancelled: count(|s| matches!(s, JobStatus::Cancelled)),
        not_started: count(|s| !s.is_terminal()),
    }
}
