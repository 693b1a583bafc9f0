//! Worker units: one dedicated thread per capability.
//!
//! A worker owns its backend exclusively. Requests arrive on its own FIFO
//! channel; responses go to the coordinator's shared response channel with
//! the request's id and tick copied verbatim. Workers never look at the
//! current tick and never abandon a request once started: staleness is the
//! gate's business.
//!
//! Thread creation failure is the only fatal condition. Backend faults are
//! turned into failure responses by the individual `Worker` impls, and a
//! panicking backend is answered with `Worker::interrupted` so the request
//! still gets its terminal response.

pub mod download;
pub mod enrich;
pub mod listing;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use log::{debug, error, warn};

use crate::protocol::{Envelope, RequestId, Response};
use crate::tick::Tick;

pub use download::DownloadWorker;
pub use enrich::EnrichWorker;
pub use listing::ListingWorker;

/// Blocking operation performed for each request.
pub trait Worker: Send + 'static {
    type Job: Clone + Send + 'static;

    /// Handle one job. `emit` must be called with exactly one terminal
    /// response, optionally preceded by progress responses.
    fn perform(&mut self, job: Self::Job, emit: &mut dyn FnMut(Response));

    /// Terminal failure response for a job whose `perform` panicked before
    /// answering.
    fn interrupted(&self, job: Self::Job, reason: &str) -> Response;
}

/// Run `worker.perform`, catching a backend panic. If the job panicked
/// before its terminal response, `Worker::interrupted` supplies one.
pub(crate) fn perform_guarded<W: Worker>(
    worker: &mut W,
    job: W::Job,
    emit: &mut dyn FnMut(Response),
) {
    let fallback = job.clone();
    let mut answered = false;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        worker.perform(job, &mut |response| {
            answered |= response.is_terminal();
            emit(response);
        })
    }));
    if let Err(payload) = outcome {
        let reason = panic_message(payload.as_ref());
        error!("worker: backend panicked: {reason}");
        if !answered {
            emit(worker.interrupted(fallback, &reason));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Submission failed because the worker thread is gone.
#[derive(Debug, thiserror::Error)]
#[error("worker '{0}' is not running")]
pub struct WorkerGone(pub &'static str);

/// Requester side of a worker unit.
pub struct WorkerHandle<J> {
    name: &'static str,
    tx: Option<mpsc::Sender<Envelope<J>>>,
    thread: Option<JoinHandle<()>>,
}

impl<J: Send + 'static> WorkerHandle<J> {
    /// Start `worker` on a new named thread.
    pub fn spawn<W>(
        name: &'static str,
        mut worker: W,
        responses: mpsc::Sender<Envelope<Response>>,
    ) -> anyhow::Result<Self>
    where
        W: Worker<Job = J>,
    {
        let (tx, rx) = mpsc::channel::<Envelope<J>>();
        let thread = thread::Builder::new()
            .name(format!("worker-{name}"))
            .spawn(move || {
                debug!("{name} worker: started");
                while let Ok(Envelope { id, tick, body }) = rx.recv() {
                    debug!("{name} worker: request {id} (tick {tick})");
                    perform_guarded(&mut worker, body, &mut |response| {
                        let _ = responses.send(Envelope {
                            id,
                            tick,
                            body: response,
                        });
                    });
                }
                debug!("{name} worker: channel closed, exiting");
            })
            .with_context(|| format!("failed to start {name} worker thread"))?;
        Ok(Self {
            name,
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Hand `job` to the worker. Never blocks.
    pub fn submit(&self, id: RequestId, tick: Tick, job: J) -> Result<(), WorkerGone> {
        let tx = self.tx.as_ref().ok_or(WorkerGone(self.name))?;
        tx.send(Envelope { id, tick, body: job })
            .map_err(|_| WorkerGone(self.name))
    }

    /// Close the request channel and wait for the in-flight job to finish.
    pub fn join(mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("{} worker: thread panicked", self.name);
        }
    }
}

impl<J> Drop for WorkerHandle<J> {
    // Detach: the thread exits by itself once its queue drains.
    fn drop(&mut self) {
        self.tx.take();
    }
}
