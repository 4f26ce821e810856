use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

static OCR_INPUT_SEQ: AtomicU64 = AtomicU64::new(0);

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Raw recognition backend. Implementations may fail or hang; callers go
/// through [`OcrCapability`], which never propagates either.
///
/// `timeout` is the budget for this call. Engines should stop their own work
/// once it is spent so nothing keeps running after the caller gave up.
pub trait OcrEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn recognize(&self, image: &[u8], language: &str, timeout: Option<Duration>) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct TesseractEngine {
    command: PathBuf,
    scratch_dir: PathBuf,
    oem: u8,
    psm: u8,
}

impl TesseractEngine {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            scratch_dir: std::env::temp_dir(),
            oem: 3,
            psm: 3,
        }
    }

    #[cfg(test)]
    fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.command).arg("--version").output().is_ok()
    }

    pub fn available_languages(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.command)
            .arg("--list-langs")
            .output()
            .with_context(|| format!("failed to run {} --list-langs", self.command.display()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .skip(1)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }

    pub fn verify_language(&self, language: &str) {
        match self.available_languages() {
            Ok(languages) => {
                info!(languages = %languages.join(","), "tesseract languages available");
                let missing = language
                    .split('+')
                    .filter(|wanted| !languages.iter().any(|have| have == wanted))
                    .collect::<Vec<_>>();
                if !missing.is_empty() {
                    warn!(missing = %missing.join(","), "tesseract language data not installed");
                }
            }
            Err(error) => warn!(error = %error, "could not list tesseract languages"),
        }
    }

    // Output goes to `<output_base>.txt` rather than a pipe, so a long page
    // cannot block the child while it is polled.
    fn run(
        &self,
        image_path: &Path,
        output_base: &Path,
        language: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut child = Command::new(&self.command)
            .arg(image_path)
            .arg(output_base)
            .arg("-l")
            .arg(language)
            .arg("--oem")
            .arg(self.oem.to_string())
            .arg("--psm")
            .arg(self.psm.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute {}", self.command.display()))?;

        let status = wait_with_deadline(&mut child, timeout)
            .with_context(|| format!("{} did not finish", self.command.display()))?;
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            bail!("tesseract returned non-zero exit status: {}", stderr.trim());
        }
        Ok(())
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &[u8], language: &str, timeout: Option<Duration>) -> Result<String> {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let output_base = self.scratch_dir.join(format!(
            "folio_ocr_{}_{}_{}",
            std::process::id(),
            OCR_INPUT_SEQ.fetch_add(1, Ordering::Relaxed),
            stamp
        ));
        let image_path = output_base.with_extension("png");
        let text_path = output_base.with_extension("txt");

        fs::write(&image_path, image)
            .with_context(|| format!("failed to write OCR input {}", image_path.display()))?;

        let recognized = self
            .run(&image_path, &output_base, language, timeout)
            .and_then(|()| {
                fs::read(&text_path)
                    .with_context(|| format!("failed to read OCR output {}", text_path.display()))
            });

        let _ = fs::remove_file(&image_path);
        let _ = fs::remove_file(&text_path);

        Ok(String::from_utf8_lossy(&recognized?)
            .replace('\u{0000}', "")
            .trim()
            .to_string())
    }
}

/// Waits for `child`; once `timeout` has elapsed the child is killed and
/// reaped before the error is returned.
fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return child.wait().context("failed to wait for child process");
    };

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("failed to poll child process")? {
            return Ok(status);
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            bail!("timed out after {:.1}s", timeout.as_secs_f64());
        }
        thread::sleep(CHILD_POLL_INTERVAL);
    }
}

/// Best-effort OCR: failures, panics and timeouts all come back as empty text.
#[derive(Clone)]
pub struct OcrCapability {
    engine: Arc<dyn OcrEngine>,
    timeout: Option<Duration>,
}

impl OcrCapability {
    pub fn new(engine: Arc<dyn OcrEngine>, timeout: Option<Duration>) -> Self {
        Self { engine, timeout }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn recognize(&self, image: Vec<u8>, language: &str, page: usize) -> String {
        let Some(timeout) = self.timeout else {
            return settle(self.engine.recognize(&image, language, None), page);
        };

        let engine = Arc::clone(&self.engine);
        let language = language.to_string();
        let (sender, receiver) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name(format!("ocr-page-{page}"))
            .spawn(move || {
                let result = engine.recognize(&image, &language, Some(timeout));
                let _ = sender.send(result);
            });
        if let Err(error) = spawned {
            warn!(page, error = %error, "failed to start OCR call");
            return String::new();
        }

        match receiver.recv_timeout(timeout) {
            Ok(result) => settle(result, page),
            Err(RecvTimeoutError::Timeout) => {
                warn!(page, timeout_secs = timeout.as_secs_f64(), "OCR timed out");
                String::new()
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(page, "OCR call ended without a result");
                String::new()
            }
        }
    }
}

fn settle(result: Result<String>, page: usize) -> String {
    match result {
        Ok(text) => text.trim().to_string(),
        Err(error) => {
            warn!(page, error = %format!("{error:#}"), "OCR failed");
            String::new()
        }
    }
}
