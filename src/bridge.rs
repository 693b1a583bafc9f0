//! Cross-process bridge: listing runs in a forked fetch process.
//!
//! ```text
//!   UI process                                 fetch process
//!   ----------                                 -------------
//!   submit() -> mpsc -> [writer thread] == fetch_requests ==> serve()
//!                                                               | ListingWorker
//!   mpsc <- [reader thread] <======== fetch_responses ==========+
//!     ^ drained by Coordinator::poll()
//!
//!   shared tick cell (MAP_SHARED page): written by the UI process only
//! ```
//!
//! Both queues are Unix socket pairs carrying `frame`s. The writer and reader
//! threads keep the coordinator from ever blocking on a socket.
//!
//! `Bridge::start` forks, so it must run before the process spawns any other
//! thread: only the calling thread exists in the child.

use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use log::{debug, error, info, warn};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Envelope, ListJob, RequestId, Response};
use crate::source::ListingBackend;
use crate::tick::{Tick, TickReader};
use crate::worker::{ListingWorker, Worker, WorkerGone, perform_guarded};

const BRIDGE_NAME: &str = "fetch-process";
const REAP_POLL: Duration = Duration::from_millis(10);

/// UI process -> fetch process.
#[derive(Debug, Serialize, Deserialize)]
pub enum ToFetcher {
    List(Envelope<ListJob>),
    Shutdown,
}

/// Fetch process -> UI process. The first frame is always `Ready` or `InitFailed`.
#[derive(Debug, Serialize, Deserialize)]
pub enum FromFetcher {
    Ready { paged_filtering: bool },
    InitFailed(String),
    Response(Envelope<Response>),
}

/// Builds the listing backend inside the fetch process.
pub type ListingFactory = Box<dyn FnOnce() -> anyhow::Result<Box<dyn ListingBackend>>>;

pub struct Bridge {
    child: Pid,
    requests: Option<mpsc::Sender<ToFetcher>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    paged_filtering: bool,
    grace: Duration,
    stopped: bool,
}

impl Bridge {
    /// Fork the fetch process and wait for it to report ready.
    ///
    /// Responses are forwarded to `responses`. Fails if the fork fails or the
    /// listing backend cannot be built in the child.
    pub fn start(
        factory: ListingFactory,
        ticks: TickReader,
        responses: mpsc::Sender<Envelope<Response>>,
        grace: Duration,
    ) -> anyhow::Result<Self> {
        let (req_parent, req_child) =
            UnixStream::pair().context("failed to create fetch_requests queue")?;
        let (resp_child, resp_parent) =
            UnixStream::pair().context("failed to create fetch_responses queue")?;

        // SAFETY: the child runs only `fetch_main` on this thread and leaves
        // through `_exit`, never returning into the parent's stack.
        match unsafe { fork() }.context("failed to fork fetch process")? {
            ForkResult::Child => {
                drop(req_parent);
                drop(resp_parent);
                // A panic must not unwind back into the parent's code.
                let code = panic::catch_unwind(AssertUnwindSafe(|| {
                    fetch_main(factory, ticks, req_child, resp_child)
                }))
                .unwrap_or(101);
                // SAFETY: skips atexit handlers and destructors owned by the parent.
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => {
                drop(req_child);
                drop(resp_child);
                drop(factory);
                info!("bridge: fetch process {child} started");
                Self::attach(child, req_parent, resp_parent, responses, grace)
                    .inspect_err(|_| {
                        let _ = kill(child, Signal::SIGKILL);
                        let _ = waitpid(child, None);
                    })
            }
        }
    }

    fn attach(
        child: Pid,
        mut req_stream: UnixStream,
        mut resp_stream: UnixStream,
        responses: mpsc::Sender<Envelope<Response>>,
        grace: Duration,
    ) -> anyhow::Result<Self> {
        let paged_filtering = match read_frame::<_, FromFetcher>(&mut resp_stream) {
            Ok(Some(FromFetcher::Ready { paged_filtering })) => paged_filtering,
            Ok(Some(FromFetcher::InitFailed(msg))) => {
                bail!("fetch process failed to initialize: {msg}")
            }
            Ok(other) => bail!("fetch process did not report ready: {other:?}"),
            Err(e) => return Err(e).context("fetch process did not report ready"),
        };
        debug!("bridge: fetch process ready (paged_filtering={paged_filtering})");

        let alive = Arc::new(AtomicBool::new(true));

        let (tx, rx) = mpsc::channel::<ToFetcher>();
        let writer_alive = Arc::clone(&alive);
        let writer = thread::Builder::new()
            .name("bridge-writer".into())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    let last = matches!(msg, ToFetcher::Shutdown);
                    if let Err(e) = write_frame(&mut req_stream, &msg) {
                        error!("bridge: failed to send to fetch process: {e}");
                        writer_alive.store(false, Ordering::Release);
                        break;
                    }
                    if last {
                        break;
                    }
                }
                debug!("bridge: writer exiting");
            })
            .context("failed to start bridge writer thread")?;

        let reader_alive = Arc::clone(&alive);
        let reader = thread::Builder::new()
            .name("bridge-reader".into())
            .spawn(move || {
                loop {
                    match read_frame::<_, FromFetcher>(&mut resp_stream) {
                        Ok(Some(FromFetcher::Response(envelope))) => {
                            if responses.send(envelope).is_err() {
                                break;
                            }
                        }
                        Ok(Some(other)) => warn!("bridge: unexpected frame {other:?}"),
                        Ok(None) => {
                            info!("bridge: fetch process closed fetch_responses");
                            break;
                        }
                        Err(e) => {
                            error!("bridge: reading fetch_responses failed: {e}");
                            break;
                        }
                    }
                }
                reader_alive.store(false, Ordering::Release);
            })
            .context("failed to start bridge reader thread")?;

        Ok(Self {
            child,
            requests: Some(tx),
            writer: Some(writer),
            reader: Some(reader),
            alive,
            paged_filtering,
            grace,
            stopped: false,
        })
    }

    pub fn pid(&self) -> Pid {
        self.child
    }

    /// Capability flag reported by the fetch process's listing backend.
    pub fn supports_paged_filtering(&self) -> bool {
        self.paged_filtering
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Queue a listing request. Never blocks.
    pub fn submit(&self, id: RequestId, tick: Tick, job: ListJob) -> Result<(), WorkerGone> {
        if !self.is_alive() {
            return Err(WorkerGone(BRIDGE_NAME));
        }
        let tx = self.requests.as_ref().ok_or(WorkerGone(BRIDGE_NAME))?;
        tx.send(ToFetcher::List(Envelope { id, tick, body: job }))
            .map_err(|_| WorkerGone(BRIDGE_NAME))
    }

    /// Ask the fetch process to exit, kill it if it overruns the grace period,
    /// and reap it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some(tx) = self.requests.take() {
            let _ = tx.send(ToFetcher::Shutdown);
        }

        let deadline = Instant::now() + self.grace;
        loop {
            match waitpid(self.child, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) if Instant::now() < deadline => thread::sleep(REAP_POLL),
                Ok(WaitStatus::StillAlive) => {
                    warn!(
                        "bridge: fetch process {} overran {}ms grace, killing",
                        self.child,
                        self.grace.as_millis()
                    );
                    let _ = kill(self.child, Signal::SIGKILL);
                    let _ = waitpid(self.child, None);
                    break;
                }
                Ok(status) => {
                    info!("bridge: fetch process exited: {status:?}");
                    break;
                }
                Err(e) => {
                    warn!("bridge: waitpid({}) failed: {e}", self.child);
                    break;
                }
            }
        }
        self.alive.store(false, Ordering::Release);

        // The child is gone, so both sockets are closed on its side.
        for handle in [self.writer.take(), self.reader.take()].into_iter().flatten() {
            let _ = handle.join();
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the fetch process. Returns the exit code.
fn fetch_main(
    factory: ListingFactory,
    ticks: TickReader,
    mut requests: UnixStream,
    mut responses: UnixStream,
) -> i32 {
    let backend = match factory() {
        Ok(backend) => backend,
        Err(e) => {
            let _ = write_frame(&mut responses, &FromFetcher::InitFailed(format!("{e:#}")));
            return 2;
        }
    };
    let mut worker = ListingWorker::new(backend);
    let ready = FromFetcher::Ready {
        paged_filtering: worker.supports_paged_filtering(),
    };
    if write_frame(&mut responses, &ready).is_err() {
        return 1;
    }
    match serve(&mut worker, &ticks, &mut requests, &mut responses) {
        Ok(()) => 0,
        Err(e) => {
            error!("fetch: {e}");
            1
        }
    }
}

/// Request loop of the fetch process: block for a request, run it, send the
/// tagged response. Returns on `Shutdown` or when the UI side closes the queue.
pub fn serve<W, R, O>(
    worker: &mut W,
    ticks: &TickReader,
    input: &mut R,
    output: &mut O,
) -> Result<(), FrameError>
where
    W: Worker<Job = ListJob>,
    R: std::io::Read,
    O: std::io::Write,
{
    loop {
        let envelope = match read_frame::<_, ToFetcher>(input)? {
            Some(ToFetcher::List(envelope)) => envelope,
            Some(ToFetcher::Shutdown) | None => {
                debug!("fetch: shutting down");
                return Ok(());
            }
        };
        let Envelope { id, tick, body } = envelope;
        let current = ticks.current();
        if tick != current {
            debug!("fetch: request {id} is for tick {tick}, current is {current}");
        }
        let mut sent = Ok(());
        perform_guarded(worker, body, &mut |response| {
            if sent.is_ok() {
                sent = write_frame(
                    output,
                    &FromFetcher::Response(Envelope {
                        id,
                        tick,
                        body: response,
                    }),
                );
            }
        });
        sent?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::model::EntryPayload;
    use crate::tick::TickCounter;
    use std::io::Cursor;

    struct Pages;

    impl ListingBackend for Pages {
        fn list(&mut self, page: u32, filter: &str) -> Result<Vec<EntryPayload>, FetchError> {
            if filter == "broken" {
                return Err(FetchError::ParseFailure("unexpected markup".into()));
            }
            if filter == "panic" {
                panic!("backend bug on page {page}");
            }
            Ok(vec![EntryPayload {
                id: format!("p{page}").as_str().into(),
                title: format!("page {page}"),
                download_url: String::new(),
            }])
        }
    }

    fn list(id: u64, tick: Tick, page: u32, filter: &str) -> ToFetcher {
        ToFetcher::List(Envelope {
            id: RequestId(id),
            tick,
            body: ListJob {
                page,
                filter: filter.into(),
            },
        })
    }

    fn run(requests: &[ToFetcher]) -> Vec<FromFetcher> {
        let mut input = Vec::new();
        for r in requests {
            write_frame(&mut input, r).unwrap();
        }
        let ticks = TickCounter::new();
        let mut output = Vec::new();
        let mut worker = ListingWorker::new(Pages);
        serve(&mut worker, &ticks.reader(), &mut Cursor::new(input), &mut output).unwrap();

        let mut out = Cursor::new(output);
        let mut frames = Vec::new();
        while let Some(frame) = read_frame::<_, FromFetcher>(&mut out).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn answers_each_request_with_its_tag() {
        let frames = run(&[list(1, 0, 0, ""), list(2, 5, 3, "")]);
        let tags: Vec<_> = frames
            .iter()
            .map(|f| match f {
                FromFetcher::Response(e) => (e.id.0, e.tick),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(tags, vec![(1, 0), (2, 5)]);
    }

    #[test]
    fn failure_is_forwarded_not_fatal() {
        let frames = run(&[list(1, 0, 0, "broken"), list(2, 0, 0, "")]);
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            &frames[0],
            FromFetcher::Response(Envelope {
                body: Response::Listing(Err(FetchError::ParseFailure(_))),
                ..
            })
        ));
        assert!(matches!(
            &frames[1],
            FromFetcher::Response(Envelope {
                body: Response::Listing(Ok(_)),
                ..
            })
        ));
    }

    #[test]
    fn panicking_backend_is_answered_and_serving_continues() {
        let frames = run(&[list(1, 2, 4, "panic"), list(2, 2, 0, "")]);
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            FromFetcher::Response(Envelope {
                id,
                tick,
                body: Response::Listing(Err(FetchError::SourceUnavailable(msg))),
            }) => {
                assert_eq!((*id, *tick), (RequestId(1), 2));
                assert!(msg.contains("backend bug on page 4"), "{msg}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            &frames[1],
            FromFetcher::Response(Envelope {
                body: Response::Listing(Ok(_)),
                ..
            })
        ));
    }

    #[test]
    fn stops_at_shutdown() {
        let frames = run(&[list(1, 0, 0, ""), ToFetcher::Shutdown, list(2, 0, 0, "")]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn stops_when_queue_closes() {
        assert!(run(&[]).is_empty());
    }
}
