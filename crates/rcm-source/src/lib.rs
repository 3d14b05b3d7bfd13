//! rcm-source
//!
//! Document Source Adapter (§6): the boundary between the remote
//! document source (SOAP client, out of scope) and the orchestrator's
//! bounded queue. `DocumentFetcher` is the inbound contract, `Acker` the
//! outbound one. Only a local-filesystem fetcher ships here, good enough
//! to drive the pipeline end-to-end without the SOAP client.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

/// One item handed from a [`DocumentFetcher`] to the orchestrator's queue.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// External file id as the source system knows it.
    pub file_id: String,
    pub display_name: String,
    /// Only meaningful when stage-to-disk is enabled (spec §6).
    pub source_path: Option<PathBuf>,
    pub bytes: Vec<u8>,
    pub origin: String,
}

#[derive(Debug)]
pub enum FetcherError {
    Io(String),
    Config(String),
}

impl fmt::Display for FetcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetcherError::Io(msg) => write!(f, "fetcher io error: {msg}"),
            FetcherError::Config(msg) => write!(f, "fetcher config error: {msg}"),
        }
    }
}

impl std::error::Error for FetcherError {}

/// Inbound document source contract (spec §6). `start` begins delivering
/// items on `enqueue` and returns once the background work is launched;
/// it does not block for the fetcher's lifetime. `pause`/`resume` are
/// called by the orchestrator under backpressure.
pub trait DocumentFetcher: Send + Sync {
    fn start(&self, enqueue: Sender<FetchedDocument>) -> Result<(), FetcherError>;
    fn pause(&self);
    fn resume(&self);
}

/// Outbound acknowledgment contract (spec §6). Implementations may fan
/// out to remote endpoints; acks are best-effort, so failures here must
/// never fail the file they're reporting on.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn maybe_ack(&self, file_id: &str, success: bool) -> anyhow::Result<()>;
}

/// Watches `ready_dir` on a fixed interval and enqueues every file found
/// there (spec §6 `localfs.readyDir`). A found file is immediately
/// renamed to a dot-prefixed sibling so a slow consumer or a fetcher
/// restart never re-enqueues it; that claimed path is what flows through
/// as `source_path` for the later archive-to-ok/fail step.
pub struct LocalFsFetcher {
    ready_dir: PathBuf,
    poll_interval: Duration,
    paused: Arc<AtomicBool>,
}

impl LocalFsFetcher {
    pub fn new(ready_dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self { ready_dir: ready_dir.into(), poll_interval, paused: Arc::new(AtomicBool::new(false)) }
    }
}

impl DocumentFetcher for LocalFsFetcher {
    fn start(&self, enqueue: Sender<FetchedDocument>) -> Result<(), FetcherError> {
        if !self.ready_dir.exists() {
            return Err(FetcherError::Config(format!(
                "ready dir does not exist: {}",
                self.ready_dir.display()
            )));
        }

        let ready_dir = self.ready_dir.clone();
        let poll_interval = self.poll_interval;
        let paused = self.paused.clone();

        tokio::spawn(async move {
            loop {
                if paused.load(Ordering::Relaxed) {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
                match scan_once(&ready_dir, &enqueue).await {
                    Ok(0) => {}
                    Ok(n) => debug!(n, dir = %ready_dir.display(), "enqueued documents from ready dir"),
                    Err(e) => warn!(error = %e, dir = %ready_dir.display(), "ready dir scan failed"),
                }
                tokio::time::sleep(poll_interval).await;
            }
        });

        Ok(())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        info!("localfs fetcher paused");
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        info!("localfs fetcher resumed");
    }
}

async fn scan_once(ready_dir: &Path, enqueue: &Sender<FetchedDocument>) -> anyhow::Result<usize> {
    let mut entries = tokio::fs::read_dir(ready_dir).await?;
    let mut enqueued = 0usize;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|s| s.to_str()) {
            Some(n) if !n.starts_with('.') => n.to_string(),
            _ => continue,
        };

        let claimed_path = ready_dir.join(format!(".claimed-{name}"));
        if tokio::fs::rename(&path, &claimed_path).await.is_err() {
            // Lost a race with another fetcher instance over the same file.
            continue;
        }

        let bytes = tokio::fs::read(&claimed_path).await?;
        let doc = FetchedDocument {
            file_id: name.clone(),
            display_name: name,
            source_path: Some(claimed_path),
            bytes,
            origin: "localfs".to_string(),
        };

        if enqueue.send(doc).await.is_err() {
            break;
        }
        enqueued += 1;
    }

    Ok(enqueued)
}

/// Discards acknowledgment entirely, for `ack.enabled = false` (spec §6).
pub struct NoopAcker;

#[async_trait]
impl Acker for NoopAcker {
    async fn maybe_ack(&self, _file_id: &str, _success: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Records the ack outcome via `tracing` instead of calling out anywhere,
/// for environments with no remote ack endpoint wired up.
pub struct LogAcker;

#[async_trait]
impl Acker for LogAcker {
    async fn maybe_ack(&self, file_id: &str, success: bool) -> anyhow::Result<()> {
        info!(file_id, success, "file acknowledgment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct MockFetcher {
        docs: Mutex<Vec<FetchedDocument>>,
        pause_calls: AtomicBool,
    }

    impl DocumentFetcher for MockFetcher {
        fn start(&self, enqueue: Sender<FetchedDocument>) -> Result<(), FetcherError> {
            let docs = std::mem::take(&mut *self.docs.lock().unwrap());
            tokio::spawn(async move {
                for doc in docs {
                    let _ = enqueue.send(doc).await;
                }
            });
            Ok(())
        }

        fn pause(&self) {
            self.pause_calls.store(true, Ordering::Relaxed);
        }

        fn resume(&self) {
            self.pause_calls.store(false, Ordering::Relaxed);
        }
    }

    fn sample_doc(id: &str) -> FetchedDocument {
        FetchedDocument {
            file_id: id.to_string(),
            display_name: format!("{id}.xml"),
            source_path: None,
            bytes: b"<Claim.Submission/>".to_vec(),
            origin: "mock".to_string(),
        }
    }

    #[tokio::test]
    async fn mock_fetcher_delivers_queued_docs() {
        let fetcher = MockFetcher { docs: Mutex::new(vec![sample_doc("a"), sample_doc("b")]), pause_calls: AtomicBool::new(false) };
        let (tx, mut rx) = mpsc::channel(8);
        fetcher.start(tx).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.file_id, "a");
        assert_eq!(second.file_id, "b");
    }

    #[tokio::test]
    async fn noop_acker_always_succeeds() {
        let acker = NoopAcker;
        acker.maybe_ack("file-1", false).await.unwrap();
    }

    #[tokio::test]
    async fn log_acker_always_succeeds() {
        let acker = LogAcker;
        acker.maybe_ack("file-1", true).await.unwrap();
    }

    #[tokio::test]
    async fn localfs_fetcher_claims_and_enqueues_ready_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("claim_001.xml"), b"<Claim.Submission/>").await.unwrap();

        let fetcher = LocalFsFetcher::new(dir.path(), Duration::from_millis(10));
        let (tx, mut rx) = mpsc::channel(8);
        fetcher.start(tx).unwrap();

        let doc = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(doc.file_id, "claim_001.xml");
        assert_eq!(doc.bytes, b"<Claim.Submission/>");
        let claimed = doc.source_path.unwrap();
        assert!(claimed.file_name().unwrap().to_str().unwrap().starts_with(".claimed-"));
        assert!(!dir.path().join("claim_001.xml").exists());
    }

    #[tokio::test]
    async fn localfs_fetcher_rejects_missing_dir() {
        let fetcher = LocalFsFetcher::new("/no/such/ready/dir", Duration::from_millis(10));
        let (tx, _rx) = mpsc::channel(8);
        assert!(fetcher.start(tx).is_err());
    }

    #[test]
    fn pause_resume_toggle_atomic_flag() {
        let fetcher = LocalFsFetcher::new("/tmp", Duration::from_secs(1));
        fetcher.pause();
        assert!(fetcher.paused.load(Ordering::Relaxed));
        fetcher.resume();
        assert!(!fetcher.paused.load(Ordering::Relaxed));
    }
}
