use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cli::ExecutionMode;
use crate::extract::CancelFlag;
use crate::pipeline::{Pipeline, ProcessingJob};
use crate::util::{ensure_directory, now_utc_string, sha256_hex, utc_compact_string, write_json_pretty};

const PENDING_DIR: &str = "pending";
const CLAIMED_DIR: &str = "claimed";
const REJECTED_DIR: &str = "rejected";
const HEARTBEAT_FILE: &str = "worker.heartbeat";
const STOP_FILE: &str = "worker.stop";

pub const HEARTBEAT_STALE_AFTER: Duration = Duration::from_secs(30);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

pub fn new_task_id(document_id: &str) -> String {
    let now = Utc::now();
    let seq = TASK_SEQ.fetch_add(1, Ordering::Relaxed);
    let seed = format!(
        "{document_id}:{}:{}:{seq}",
        now.timestamp_nanos_opt().unwrap_or_default(),
        std::process::id()
    );
    format!("{}-{}", utc_compact_string(now), &sha256_hex(seed.as_bytes())[..12])
}

/// One submission interface over the available execution strategies.
pub trait TaskSubmitter: Send + Sync {
    fn name(&self) -> &'static str;

    fn submit(&self, job: ProcessingJob) -> Result<()>;

    /// Blocks until work submitted from this process has reached a terminal
    /// state. Strategies that hand work to another process return at once.
    fn wait_idle(&self) -> Result<()>;
}

pub struct InProcessStrategy {
    pipeline: Arc<Pipeline>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl InProcessStrategy {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            handles: Mutex::new(Vec::new()),
        }
    }
}

impl TaskSubmitter for InProcessStrategy {
    fn name(&self) -> &'static str {
        "in_process"
    }

    fn submit(&self, job: ProcessingJob) -> Result<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let thread_name = format!("task-{}", job.task_id);
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                if let Err(err) = pipeline.process(&job) {
                    warn!(
                        doc_id = %job.document_id,
                        error = %format!("{err:#}"),
                        "in-process task could not record its outcome"
                    );
                }
            })
            .context("failed to spawn in-process task")?;

        self.handles
            .lock()
            .map_err(|_| anyhow!("task handle lock poisoned"))?
            .push(handle);
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .map_err(|_| anyhow!("task handle lock poisoned"))?,
        );
        for handle in handles {
            if handle.join().is_err() {
                warn!("in-process task panicked");
            }
        }
        Ok(())
    }
}

/// Hands jobs to a separate `worker` process through JSON files in a queue
/// directory.
pub struct SpoolQueueStrategy {
    queue_dir: PathBuf,
}

impl SpoolQueueStrategy {
    pub fn new(queue_dir: impl Into<PathBuf>) -> Self {
        Self {
            queue_dir: queue_dir.into(),
        }
    }
}

impl TaskSubmitter for SpoolQueueStrategy {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn submit(&self, job: ProcessingJob) -> Result<()> {
        let pending = self.queue_dir.join(PENDING_DIR);
        ensure_directory(&pending)?;

        let staged = pending.join(format!(".{}.json.partial", job.task_id));
        let target = pending.join(format!("{}.json", job.task_id));
        write_json_pretty(&staged, &job)?;
        fs::rename(&staged, &target).with_context(|| {
            format!("failed to enqueue {} as {}", staged.display(), target.display())
        })?;

        info!(doc_id = %job.document_id, task_id = %job.task_id, path = %target.display(), "job queued");
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Heartbeat {
    pid: u32,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct StopRequest {
    requested_by: u32,
    requested_at: String,
}

pub fn touch_heartbeat(queue_dir: &Path) -> Result<()> {
    write_json_pretty(
        &queue_dir.join(HEARTBEAT_FILE),
        &Heartbeat {
            pid: std::process::id(),
            updated_at: now_utc_string(),
        },
    )
}

pub fn clear_heartbeat(queue_dir: &Path) {
    let _ = fs::remove_file(queue_dir.join(HEARTBEAT_FILE));
}

/// Asks the worker serving `queue_dir` to stop. The job in flight is
/// cancelled and the remaining queue is left for the next worker.
pub fn request_stop(queue_dir: &Path) -> Result<()> {
    write_json_pretty(
        &queue_dir.join(STOP_FILE),
        &StopRequest {
            requested_by: std::process::id(),
            requested_at: now_utc_string(),
        },
    )
}

pub fn stop_requested(queue_dir: &Path) -> bool {
    queue_dir.join(STOP_FILE).is_file()
}

pub fn clear_stop_request(queue_dir: &Path) {
    let _ = fs::remove_file(queue_dir.join(STOP_FILE));
}

/// Refreshes the worker heartbeat from a background thread, so a long job
/// does not make the worker look dead, and turns a stop request into a
/// cancellation. Dropping the ticker stops it and clears the heartbeat.
pub struct HeartbeatTicker {
    queue_dir: PathBuf,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatTicker {
    pub fn start(queue_dir: &Path, interval: Duration, cancel: CancelFlag) -> Result<Self> {
        touch_heartbeat(queue_dir)?;

        let (stop, stopped) = mpsc::channel::<()>();
        let dir = queue_dir.to_path_buf();
        let handle = thread::Builder::new()
            .name("worker-heartbeat".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if let Err(err) = touch_heartbeat(&dir) {
                        warn!(error = %format!("{err:#}"), "failed to refresh worker heartbeat");
                    }
                    if stop_requested(&dir) && !cancel.is_cancelled() {
                        info!(queue_dir = %dir.display(), "stop requested; cancelling current work");
                        cancel.cancel();
                    }
                }
            })
            .context("failed to start heartbeat thread")?;

        Ok(Self {
            queue_dir: queue_dir.to_path_buf(),
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

impl Drop for HeartbeatTicker {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        clear_heartbeat(&self.queue_dir);
    }
}

/// A worker counts as alive while its heartbeat file is fresher than
/// `stale_after`.
pub fn worker_alive(queue_dir: &Path, stale_after: Duration) -> bool {
    let modified = fs::metadata(queue_dir.join(HEARTBEAT_FILE)).and_then(|meta| meta.modified());
    match modified {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age <= stale_after)
            .unwrap_or(true),
        Err(_) => false,
    }
}

pub fn select_strategy(
    mode: ExecutionMode,
    queue_dir: &Path,
    pipeline: impl FnOnce() -> Result<Arc<Pipeline>>,
) -> Result<Box<dyn TaskSubmitter>> {
    let use_queue = match mode {
        ExecutionMode::InProcess => false,
        ExecutionMode::Queue => {
            if !worker_alive(queue_dir, HEARTBEAT_STALE_AFTER) {
                warn!(queue_dir = %queue_dir.display(), "no live worker; queued jobs wait until one starts");
            }
            true
        }
        ExecutionMode::Auto => worker_alive(queue_dir, HEARTBEAT_STALE_AFTER),
    };

    let strategy: Box<dyn TaskSubmitter> = if use_queue {
        Box::new(SpoolQueueStrategy::new(queue_dir))
    } else {
        Box::new(InProcessStrategy::new(pipeline()?))
    };
    debug!(strategy = strategy.name(), "execution strategy selected");
    Ok(strategy)
}

/// Claims and runs every queued job, oldest task id first. Returns the number
/// of jobs processed.
pub fn drain_queue(queue_dir: &Path, pipeline: &Pipeline) -> Result<usize> {
    let pending = queue_dir.join(PENDING_DIR);
    if !pending.is_dir() {
        return Ok(0);
    }
    let claimed_dir = queue_dir.join(CLAIMED_DIR);
    ensure_directory(&claimed_dir)?;

    let mut queued = Vec::new();
    for entry in fs::read_dir(&pending)
        .with_context(|| format!("failed to read queue directory {}", pending.display()))?
    {
        let path = entry?.path();
        let is_job = path.extension().is_some_and(|ext| ext == "json")
            && !path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));
        if is_job {
            queued.push(path);
        }
    }
    queued.sort();

    let cancel = pipeline.cancel_flag();
    let mut processed = 0usize;
    for path in queued {
        if cancel.is_cancelled() {
            info!("worker cancelled; leaving remaining jobs queued");
            break;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let claimed = claimed_dir.join(file_name);
        // Another worker got there first.
        if fs::rename(&path, &claimed).is_err() {
            continue;
        }

        let job = match read_job(&claimed) {
            Ok(job) => job,
            Err(err) => {
                warn!(path = %claimed.display(), error = %format!("{err:#}"), "rejecting unreadable job");
                reject(queue_dir, &claimed)?;
                continue;
            }
        };

        if let Err(err) = pipeline.process(&job) {
            warn!(
                doc_id = %job.document_id,
                error = %format!("{err:#}"),
                "queued job could not record its outcome"
            );
            reject(queue_dir, &claimed)?;
            continue;
        }
        fs::remove_file(&claimed)
            .with_context(|| format!("failed to remove finished job {}", claimed.display()))?;
        processed += 1;
    }

    Ok(processed)
}

fn read_job(path: &Path) -> Result<ProcessingJob> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn reject(queue_dir: &Path, claimed: &Path) -> Result<()> {
    let rejected_dir = queue_dir.join(REJECTED_DIR);
    ensure_directory(&rejected_dir)?;
    if let Some(file_name) = claimed.file_name() {
        fs::rename(claimed, rejected_dir.join(file_name))
            .with_context(|| format!("failed to move {} to rejected", claimed.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;
    use crate::extract::ExtractOptions;
    use crate::extract::source::{DocumentSource, PageDimensions, Rasterizer};
    use crate::model::DocumentStatus;
    use crate::pipeline::SourceOpener;
    use crate::repository::{DocumentRepository, NewDocument};
    use crate::store::TextStore;

    struct OnePage;

    impl Rasterizer for OnePage {
        fn render_page(&self, _page: usize, _dpi: u32) -> Result<Vec<u8>> {
            bail!("no raster")
        }
    }

    impl DocumentSource for OnePage {
        fn page_count(&self) -> usize {
            1
        }

        fn native_text(&self, _page: usize) -> Result<String> {
            Ok("queued text".to_string())
        }

        fn page_dimensions(&self, _page: usize) -> Result<PageDimensions> {
            Ok(PageDimensions {
                width: 612.0,
                height: 792.0,
            })
        }
    }

    struct OnePageOpener;

    impl SourceOpener for OnePageOpener {
        fn open(&self, _path: &Path) -> Result<Box<dyn DocumentSource>> {
            Ok(Box::new(OnePage))
        }
    }

    fn pipeline(dir: &Path) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            Arc::new(DocumentRepository::open_in_memory().unwrap()),
            TextStore::new(dir.join("texts"), 1024),
            Arc::new(OnePageOpener),
            None,
            ExtractOptions::default(),
        ))
    }

    fn registered_job(pipeline: &Pipeline, id: &str) -> ProcessingJob {
        pipeline
            .repository()
            .register(&NewDocument {
                id: id.to_string(),
                filename: format!("{id}.pdf"),
                source_path: format!("/uploads/{id}.pdf"),
                size_bytes: 1,
            })
            .unwrap();
        ProcessingJob {
            task_id: new_task_id(id),
            document_id: id.to_string(),
            source_path: PathBuf::from(format!("/uploads/{id}.pdf")),
        }
    }

    fn status(pipeline: &Pipeline, id: &str) -> DocumentStatus {
        pipeline.repository().get(id).unwrap().unwrap().status
    }

    #[test]
    fn task_ids_are_unique() {
        let first = new_task_id("doc");
        let second = new_task_id("doc");
        assert_ne!(first, second);
        assert_eq!(first.len(), "20260101T000000Z-".len() + 12);
    }

    #[test]
    fn in_process_strategy_runs_jobs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let strategy = InProcessStrategy::new(Arc::clone(&pipeline));

        strategy.submit(registered_job(&pipeline, "a")).unwrap();
        strategy.submit(registered_job(&pipeline, "b")).unwrap();
        strategy.wait_idle().unwrap();

        assert_eq!(status(&pipeline, "a"), DocumentStatus::Completed);
        assert_eq!(status(&pipeline, "b"), DocumentStatus::Completed);
    }

    #[test]
    fn queued_jobs_wait_for_a_worker_drain() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("queue");
        let pipeline = pipeline(dir.path());
        let strategy = SpoolQueueStrategy::new(&queue_dir);

        strategy.submit(registered_job(&pipeline, "a")).unwrap();
        strategy.wait_idle().unwrap();
        assert_eq!(status(&pipeline, "a"), DocumentStatus::Pending);

        assert_eq!(drain_queue(&queue_dir, &pipeline).unwrap(), 1);
        assert_eq!(status(&pipeline, "a"), DocumentStatus::Completed);
        assert_eq!(drain_queue(&queue_dir, &pipeline).unwrap(), 0);
    }

    #[test]
    fn unreadable_job_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("queue");
        let pending = queue_dir.join(PENDING_DIR);
        fs::create_dir_all(&pending).unwrap();
        fs::write(pending.join("broken.json"), b"{ not json").unwrap();

        let pipeline = pipeline(dir.path());
        assert_eq!(drain_queue(&queue_dir, &pipeline).unwrap(), 0);
        assert!(queue_dir.join(REJECTED_DIR).join("broken.json").is_file());
    }

    #[test]
    fn heartbeat_freshness_selects_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("queue");
        let pipeline = pipeline(dir.path());

        assert!(!worker_alive(&queue_dir, HEARTBEAT_STALE_AFTER));
        let chosen = select_strategy(ExecutionMode::Auto, &queue_dir, || Ok(Arc::clone(&pipeline)))
            .unwrap();
        assert_eq!(chosen.name(), "in_process");

        touch_heartbeat(&queue_dir).unwrap();
        assert!(worker_alive(&queue_dir, HEARTBEAT_STALE_AFTER));
        let chosen = select_strategy(ExecutionMode::Auto, &queue_dir, || Ok(Arc::clone(&pipeline)))
            .unwrap();
        assert_eq!(chosen.name(), "queue");

        let forced = select_strategy(ExecutionMode::InProcess, &queue_dir, || {
            Ok(Arc::clone(&pipeline))
        })
        .unwrap();
        assert_eq!(forced.name(), "in_process");

        clear_heartbeat(&queue_dir);
        assert!(!worker_alive(&queue_dir, HEARTBEAT_STALE_AFTER));
    }

    #[test]
    fn ticker_keeps_heartbeat_fresh_past_the_staleness_window() {
        let dir = tempfile::tempdir().unwrap();
        let stale_after = Duration::from_millis(150);
        let ticker =
            HeartbeatTicker::start(dir.path(), Duration::from_millis(20), CancelFlag::default())
                .unwrap();

        // Stands in for a job that runs longer than the staleness window.
        std::thread::sleep(Duration::from_millis(400));
        assert!(worker_alive(dir.path(), stale_after));

        drop(ticker);
        assert!(!worker_alive(dir.path(), HEARTBEAT_STALE_AFTER));
    }

    #[test]
    fn stop_request_cancels_the_pipeline_through_the_ticker() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("queue");
        let pipeline = pipeline(dir.path());
        let _ticker =
            HeartbeatTicker::start(&queue_dir, Duration::from_millis(10), pipeline.cancel_flag())
                .unwrap();

        request_stop(&queue_dir).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !pipeline.cancel_flag().is_cancelled() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(pipeline.cancel_flag().is_cancelled());

        clear_stop_request(&queue_dir);
        assert!(!stop_requested(&queue_dir));
    }

    #[test]
    fn cancelled_worker_leaves_queued_jobs_pending() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("queue");
        let pipeline = pipeline(dir.path());
        SpoolQueueStrategy::new(&queue_dir)
            .submit(registered_job(&pipeline, "a"))
            .unwrap();

        pipeline.cancel_flag().cancel();
        assert_eq!(drain_queue(&queue_dir, &pipeline).unwrap(), 0);
        assert_eq!(status(&pipeline, "a"), DocumentStatus::Pending);
        assert_eq!(fs::read_dir(queue_dir.join(PENDING_DIR)).unwrap().count(), 1);
    }

    #[test]
    fn zero_staleness_window_treats_old_heartbeats_as_dead() {
        let dir = tempfile::tempdir().unwrap();
        touch_heartbeat(dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!worker_alive(dir.path(), Duration::ZERO));
    }
}
