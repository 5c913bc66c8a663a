//! Ordered device execution queue.
//!
//! A [`Stream`] owns one host thread that runs enqueued work strictly in
//! issuance order. Enqueueing never blocks on the work itself; the only
//! blocking call is [`Stream::synchronize`], which waits for everything
//! issued so far and reports the first failure since the previous sync.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};

use crate::{BatchError, Device, Result};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

enum Command {
    Run(&'static str, Job),
    Sync(mpsc::Sender<()>),
}

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

struct StreamInner {
    id: u64,
    device: Device,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    failure: Arc<Mutex<Option<BatchError>>>,
    pending: Arc<AtomicUsize>,
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Handle to an ordered execution queue. Clones share the same queue.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device.id())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(device: &Device) -> Result<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Command>();
        let failure = Arc::new(Mutex::new(None));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_failure = failure.clone();
        let worker_pending = pending.clone();
        let handle = thread::Builder::new()
            .name(format!("chunkbatch-stream-{id}"))
            .spawn(move || run_queue(id, rx, worker_failure, worker_pending))
            .map_err(|e| BatchError::Device(format!("failed to start stream worker: {e}")))?;

        debug!(stream = id, device = device.id(), "created stream");
        Ok(Self {
            inner: Arc::new(StreamInner {
                id,
                device: device.clone(),
                sender: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(handle)),
                failure,
                pending,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Operations enqueued but not yet finished.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Non-blocking completion query.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Enqueue `job` behind everything already issued on this stream.
    pub(crate) fn enqueue<F>(&self, label: &'static str, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        let sent = self.send(Command::Run(label, Box::new(job)));
        if sent.is_err() {
            self.inner.pending.fetch_sub(1, Ordering::AcqRel);
        }
        trace!(stream = self.inner.id, label, "enqueued");
        sent
    }

    /// Block until every operation issued so far has completed.
    ///
    /// Returns the first error raised by any of them since the previous
    /// synchronization; the error is cleared once reported.
    pub fn synchronize(&self) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(Command::Sync(ack_tx))?;
        ack_rx
            .recv()
            .map_err(|_| BatchError::Device("stream worker exited".into()))?;
        let mut failure = self
            .inner
            .failure
            .lock()
            .map_err(|_| BatchError::Device("stream state poisoned".into()))?;
        match failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn send(&self, cmd: Command) -> Result<()> {
        let sender = self
            .inner
            .sender
            .lock()
            .map_err(|_| BatchError::Device("stream state poisoned".into()))?;
        sender
            .as_ref()
            .ok_or_else(|| BatchError::Device("stream closed".into()))?
            .send(cmd)
            .map_err(|_| BatchError::Device("stream worker exited".into()))
    }
}

fn run_queue(
    id: u64,
    rx: mpsc::Receiver<Command>,
    failure: Arc<Mutex<Option<BatchError>>>,
    pending: Arc<AtomicUsize>,
) {
    for cmd in rx {
        match cmd {
            Command::Run(label, job) => {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
                    Ok(result) => result,
                    Err(_) => Err(BatchError::Device(format!("kernel '{label}' aborted"))),
                };
                if let Err(err) = outcome {
                    error!(stream = id, label, %err, "stream operation failed");
                    if let Ok(mut slot) = failure.lock() {
                        slot.get_or_insert(err);
                    }
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Command::Sync(ack) => {
                let _ = ack.send(());
            }
        }
    }
    trace!(stream = id, "stream worker exiting");
}
