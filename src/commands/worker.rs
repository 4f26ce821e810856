use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::cli::WorkerArgs;
use crate::config::{extract_options, ocr_capability, text_store};
use crate::pipeline::{Pipeline, PopplerOpener};
use crate::repository::DocumentRepository;
use crate::tasks::{
    HEARTBEAT_INTERVAL, HeartbeatTicker, clear_stop_request, drain_queue, request_stop,
};
use crate::util::ensure_directory;

pub fn run(args: WorkerArgs) -> Result<()> {
    let queue_dir = args.store.queue_dir();
    if args.stop {
        request_stop(&queue_dir)?;
        info!(queue_dir = %queue_dir.display(), "stop requested");
        return Ok(());
    }
    ensure_directory(&queue_dir)?;
    clear_stop_request(&queue_dir);

    let pipeline = Pipeline::new(
        Arc::new(DocumentRepository::open(&args.store.resolved_db_path())?),
        text_store(&args.store),
        Arc::new(PopplerOpener),
        ocr_capability(&args.extraction),
        extract_options(&args.extraction),
    );
    let cancel = pipeline.cancel_flag();
    let poll = Duration::from_secs(args.poll_secs.max(1));
    let ticker = HeartbeatTicker::start(&queue_dir, HEARTBEAT_INTERVAL, cancel.clone())?;
    info!(queue_dir = %queue_dir.display(), once = args.once, "worker started");

    loop {
        let processed = drain_queue(&queue_dir, &pipeline)?;
        if processed > 0 {
            info!(processed, "queue drained");
        }
        if args.once || cancel.is_cancelled() {
            break;
        }
        thread::sleep(poll);
    }

    drop(ticker);
    clear_stop_request(&queue_dir);
    info!(cancelled = cancel.is_cancelled(), "worker stopped");
    Ok(())
}
