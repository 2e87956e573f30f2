use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, SendTimeoutError, Sender};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::models::config::ScanConfig;
use crate::models::error::ScanError;
use crate::models::recording_result::{RecordingMetadata, RecordingResult};
use crate::storage::metadata;
use crate::traits::chunk_consumer::{Chunk, ChunkConsumer};

/// Chunks buffered between the poll thread and the writer thread.
const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Streaming delimited-text writer for scan chunks.
///
/// ## File Format
///
/// ```text
/// Channel 0,Channel 1,...
/// 0.12345,-1.00000,...      ← one row per scan, 5 decimals
/// ```
///
/// `accept` copies the chunk onto a bounded queue; a dedicated thread does
/// the formatting and disk I/O so a slow disk never stalls the poll loop.
/// Any failure is local to the sink: it is reported as `WriteError` from
/// the next `accept` or from `close`.
pub struct CsvFileSink {
    file_path: PathBuf,
    scan: ScanConfig,
    sender: Option<Sender<Vec<f64>>>,
    // yields the hex SHA-256 of everything written, header included
    worker: Option<thread::JoinHandle<Result<String, ScanError>>>,
    failure: Arc<Mutex<Option<ScanError>>>,
    send_timeout: Duration,
    samples_written: u64,
    write_sidecar: bool,
}

impl CsvFileSink {
    /// Create the file, write the header row and start the writer thread.
    pub fn create(file_path: impl Into<PathBuf>, scan: &ScanConfig) -> Result<Self, ScanError> {
        let file_path = file_path.into();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ScanError::FileUnwritable(format!("failed to create directory: {}", e)))?;
        }

        let file = File::create(&file_path)
            .map_err(|e| ScanError::FileUnwritable(format!("{}: {}", file_path.display(), e)))?;
        let mut out = HashingWriter::new(BufWriter::new(file));
        writeln!(out, "{}", scan.channel_labels().join(","))
            .map_err(|e| ScanError::FileUnwritable(format!("failed to write header: {}", e)))?;

        let (sender, receiver) = bounded::<Vec<f64>>(DEFAULT_QUEUE_DEPTH);
        let failure = Arc::new(Mutex::new(None));
        let channel_count = scan.channel_count();

        let worker_failure = Arc::clone(&failure);
        let worker = thread::Builder::new()
            .name("csv-writer".into())
            .spawn(move || {
                let result = (|| -> std::io::Result<String> {
                    for samples in receiver.iter() {
                        write_rows(&mut out, &samples, channel_count)?;
                    }
                    out.flush()?;
                    Ok(out.hex_digest())
                })()
                .map_err(|e| ScanError::WriteError(e.to_string()));
                if let Err(ref e) = result {
                    log::error!("csv writer failed: {}", e);
                    *worker_failure.lock() = Some(e.clone());
                }
                result
            })
            .map_err(|e| ScanError::FileUnwritable(format!("failed to spawn writer thread: {}", e)))?;

        log::info!("recording {} channels to {}", channel_count, file_path.display());

        Ok(Self {
            file_path,
            scan: scan.clone(),
            sender: Some(sender),
            worker: Some(worker),
            failure,
            send_timeout: Duration::from_millis(100),
            samples_written: 0,
            write_sidecar: true,
        })
    }

    /// How long `accept` may wait on a full queue before failing.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Skip the JSON metadata sidecar on close.
    pub fn without_sidecar(mut self) -> Self {
        self.write_sidecar = false;
        self
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Samples handed to the writer thread so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    fn stored_failure(&self) -> Option<ScanError> {
        self.failure.lock().clone()
    }

    /// Close the queue and wait for the writer. `None` if already joined.
    fn join_worker(&mut self) -> Result<Option<String>, ScanError> {
        self.sender = None;
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ScanError::WriteError("writer thread panicked".into()))?
                .map(Some),
            None => Ok(None),
        }
    }
}

impl ChunkConsumer for CsvFileSink {
    fn name(&self) -> &str {
        "csv-file"
    }

    fn accept(&mut self, chunk: &Chunk<'_>) -> Result<(), ScanError> {
        if let Some(e) = self.stored_failure() {
            return Err(e);
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ScanError::WriteError("file sink is closed".into()))?;

        match sender.send_timeout(chunk.samples.to_vec(), self.send_timeout) {
            Ok(()) => {
                self.samples_written += chunk.len() as u64;
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(ScanError::WriteError(format!(
                "writer queue full for {:?}; disk is falling behind",
                self.send_timeout
            ))),
            Err(SendTimeoutError::Disconnected(_)) => Err(self
                .stored_failure()
                .unwrap_or_else(|| ScanError::WriteError("writer thread exited".into()))),
        }
    }

    fn close(&mut self) -> Result<Option<RecordingResult>, ScanError> {
        let checksum = match self.join_worker()? {
            Some(checksum) => checksum,
            None => return Ok(None),
        };
        let metadata = RecordingMetadata::for_scan(
            &self.scan,
            &self.file_path.to_string_lossy(),
            self.samples_written,
            &checksum,
        );
        if self.write_sidecar {
            metadata::write_metadata(&metadata, &self.file_path)?;
        }

        Ok(Some(RecordingResult {
            file_path: self.file_path.clone(),
            duration_secs: metadata.duration_secs,
            samples_written: self.samples_written,
            metadata,
            checksum,
        }))
    }
}

impl Drop for CsvFileSink {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.join_worker();
        }
    }
}

fn write_rows<W: Write>(out: &mut W, samples: &[f64], channel_count: usize) -> std::io::Result<()> {
    for frame in samples.chunks(channel_count) {
        for (i, value) in frame.iter().enumerate() {
            if i > 0 {
                out.write_all(b",")?;
            }
            write!(out, "{:.5}", value)?;
        }
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Writer that hashes every byte on its way to `inner`.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn hex_digest(self) -> String {
        hex_encode(&self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
