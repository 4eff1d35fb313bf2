//! In-process container engine.
//!
//! "Images" are the staged artifact kept in memory; "containers" are worker
//! threads running the [`Entrypoint`] against an [`EntryResolver`]. Useful for
//! local development and for exercising the full execution path without a
//! docker daemon.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::container::builder::DOCKERFILE;
use crate::container::{ContainerEngine, ImageHandle, RunningContainer};
use crate::error::PlatformError;
use crate::execution::entrypoint::{EntryResolver, Entrypoint};

type SharedResolver = Arc<dyn EntryResolver + Send + Sync>;

#[derive(Default)]
struct Counters {
    builds: AtomicUsize,
    runs: AtomicUsize,
    live: AtomicUsize,
}

pub struct InMemoryEngine {
    resolver: SharedResolver,
    /// Image id to artifact bytes.
    images: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    counters: Arc<Counters>,
    refuse_runs: AtomicBool,
}

impl InMemoryEngine {
    pub fn new(resolver: SharedResolver) -> Self {
        InMemoryEngine {
            resolver,
            images: Mutex::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
            refuse_runs: AtomicBool::new(false),
        }
    }

    pub fn builds(&self) -> usize {
        self.counters.builds.load(Ordering::SeqCst)
    }

    /// Containers started so far.
    pub fn runs(&self) -> usize {
        self.counters.runs.load(Ordering::SeqCst)
    }

    /// Containers started and not yet stopped.
    pub fn live_containers(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn image_count(&self) -> usize {
        self.images.lock().len()
    }

    /// Makes every subsequent `run` fail like an unreachable engine.
    pub fn refuse_runs(&self, refuse: bool) {
        self.refuse_runs.store(refuse, Ordering::SeqCst);
    }
}

/// The artifact is the last argument of the exec-form `CMD`.
fn artifact_name(dockerfile: &str) -> Option<String> {
    let cmd = dockerfile
        .lines()
        .find_map(|line| line.strip_prefix("CMD "))?;
    let argv: Vec<String> = serde_json::from_str(cmd.trim()).ok()?;
    argv.last().cloned()
}

impl ContainerEngine for InMemoryEngine {
    fn build_image(&self, context_dir: &Path, tag: &str) -> Result<ImageHandle, PlatformError> {
        let dockerfile = fs::read_to_string(context_dir.join(DOCKERFILE))
            .map_err(|e| PlatformError::ImageBuildFailed(format!("read {}: {}", DOCKERFILE, e)))?;
        let name = artifact_name(&dockerfile)
            .ok_or_else(|| PlatformError::ImageBuildFailed("no exec-form CMD".into()))?;
        let artifact = fs::read(context_dir.join(&name))
            .map_err(|e| PlatformError::ImageBuildFailed(format!("read {}: {}", name, e)))?;
        let id = format!("sha256:{}", Uuid::new_v4().simple());
        self.images.lock().insert(id.clone(), Arc::new(artifact));
        self.counters.builds.fetch_add(1, Ordering::SeqCst);
        Ok(ImageHandle {
            id,
            tag: tag.to_string(),
        })
    }

    fn run(&self, image: &ImageHandle) -> Result<Box<dyn RunningContainer>, PlatformError> {
        if self.refuse_runs.load(Ordering::SeqCst) {
            return Err(PlatformError::Container("engine unavailable".into()));
        }
        let artifact = self
            .images
            .lock()
            .get(&image.id)
            .cloned()
            .ok_or_else(|| PlatformError::Container(format!("no such image: {}", image.id)))?;

        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>();
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>();
        let entrypoint = Entrypoint::new(self.resolver.clone());
        let id = format!("memory-{}", Uuid::new_v4().simple());
        let worker_id = id.clone();
        thread::Builder::new()
            .name(format!("container-{}", &id[7..15]))
            .spawn(move || {
                // Runs once stdin is closed.
                let Ok(request) = input_rx.recv() else { return };
                let mut response = Vec::new();
                if let Err(e) = entrypoint.run(&artifact, &mut request.as_slice(), &mut response) {
                    tracing::warn!(container = %worker_id, error = %e, "entrypoint failed to respond");
                    return;
                }
                let _ = output_tx.send(response);
            })
            .map_err(|e| PlatformError::Container(format!("spawn container thread: {}", e)))?;

        self.counters.runs.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryContainer {
            id,
            stdin: Some(StdinPipe {
                buf: Vec::new(),
                tx: Some(input_tx),
            }),
            stdout: Some(StdoutPipe {
                rx: output_rx,
                buf: Vec::new(),
                pos: 0,
            }),
            counters: self.counters.clone(),
            stopped: false,
        }))
    }

    fn remove_image(&self, image: &ImageHandle) -> Result<(), PlatformError> {
        self.images
            .lock()
            .remove(&image.id)
            .map(|_| ())
            .ok_or_else(|| PlatformError::Container(format!("no such image: {}", image.id)))
    }
}

struct MemoryContainer {
    id: String,
    stdin: Option<StdinPipe>,
    stdout: Option<StdoutPipe>,
    counters: Arc<Counters>,
    stopped: bool,
}

impl RunningContainer for MemoryContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.stdin.take().map(|s| Box::new(s) as Box<dyn Write + Send>)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        if !self.stopped {
            self.stopped = true;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Buffers everything written; delivers it to the container when dropped.
struct StdinPipe {
    buf: Vec<u8>,
    tx: Option<Sender<Vec<u8>>>,
}

impl Write for StdinPipe {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.tx.is_none() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for StdinPipe {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(std::mem::take(&mut self.buf));
        }
    }
}

/// Blocks until the container writes its response; EOF once it exits.
struct StdoutPipe {
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for StdoutPipe {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.buf.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
