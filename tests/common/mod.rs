#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use series_list::coordinator::{Backends, Coordinator, ListingSetup};
use series_list::error::FetchError;
use series_list::model::{Entry, EntryId, EntryPayload};
use series_list::source::{DownloadBackend, EnrichmentProvider, ListingBackend};
use series_list::surface::UiSurface;

pub const DEADLINE: Duration = Duration::from_secs(5);

// --- UI surface ---

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Added(EntryId),
    Cleared,
    NoNewData,
    Wrong(String),
    Progress(EntryId, f32),
    Updated(Entry),
}

#[derive(Default)]
pub struct Recorder {
    pub events: Vec<Event>,
}

impl Recorder {
    pub fn added(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Added(id) => Some(id.0.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn wrongs(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Wrong(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }
}

impl UiSurface for Recorder {
    fn add_entry(&mut self, entry: &Entry) {
        self.events.push(Event::Added(entry.id.clone()));
    }

    fn clear(&mut self) {
        self.events.push(Event::Cleared);
    }

    fn no_new_data(&mut self) {
        self.events.push(Event::NoNewData);
    }

    fn something_wrong(&mut self, message: &str) {
        self.events.push(Event::Wrong(message.to_string()));
    }

    fn update_progress(&mut self, entry: &Entry, value: f32) {
        self.events.push(Event::Progress(entry.id.clone(), value));
    }

    fn entry_updated(&mut self, entry: &Entry) {
        self.events.push(Event::Updated(entry.clone()));
    }
}

// --- Backends ---

pub fn payload(id: &str) -> EntryPayload {
    EntryPayload {
        id: id.into(),
        title: format!("Show {id}"),
        download_url: format!("https://example.invalid/{id}.mkv"),
    }
}

pub fn payloads(ids: &[&str]) -> Vec<EntryPayload> {
    ids.iter().map(|id| payload(id)).collect()
}

pub type Listed = Result<Vec<EntryPayload>, FetchError>;

/// Listing backend that reports each call and blocks until the test replies.
pub struct ScriptedListing {
    calls: Sender<(u32, String)>,
    replies: Receiver<Listed>,
    paged_filtering: bool,
}

pub struct ListingControl {
    calls: Receiver<(u32, String)>,
    replies: Sender<Listed>,
}

pub fn scripted_listing(paged_filtering: bool) -> (ScriptedListing, ListingControl) {
    let (calls_tx, calls_rx) = mpsc::channel();
    let (replies_tx, replies_rx) = mpsc::channel();
    (
        ScriptedListing {
            calls: calls_tx,
            replies: replies_rx,
            paged_filtering,
        },
        ListingControl {
            calls: calls_rx,
            replies: replies_tx,
        },
    )
}

impl ListingBackend for ScriptedListing {
    fn list(&mut self, page: u32, filter: &str) -> Listed {
        let _ = self.calls.send((page, filter.to_string()));
        self.replies
            .recv()
            .unwrap_or_else(|_| Err(FetchError::SourceUnavailable("test ended".into())))
    }

    fn supports_paged_filtering(&self) -> bool {
        self.paged_filtering
    }
}

impl ListingControl {
    /// Wait for the backend to be called.
    pub fn expect_call(&self) -> (u32, String) {
        self.calls
            .recv_timeout(DEADLINE)
            .expect("listing backend was not called")
    }

    pub fn assert_no_call(&self) {
        assert!(
            self.calls.recv_timeout(Duration::from_millis(100)).is_err(),
            "listing backend was called unexpectedly"
        );
    }

    pub fn reply(&self, listed: Listed) {
        self.replies.send(listed).expect("listing backend is gone");
    }
}

/// Static catalog: substring filter on the title, fixed page size.
pub struct CannedListing {
    pub entries: Vec<EntryPayload>,
    pub page_size: usize,
    pub paged_filtering: bool,
}

impl ListingBackend for CannedListing {
    fn list(&mut self, page: u32, filter: &str) -> Listed {
        let matching: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.title.contains(filter))
            .cloned()
            .collect();
        Ok(matching
            .chunks(self.page_size)
            .nth(page as usize)
            .map(<[EntryPayload]>::to_vec)
            .unwrap_or_default())
    }

    fn supports_paged_filtering(&self) -> bool {
        self.paged_filtering
    }
}

pub enum Step {
    Progress(f32),
    Finish(Result<PathBuf, FetchError>),
}

/// Download backend driven step by step from the test.
pub struct ScriptedDownload {
    steps: Receiver<Step>,
}

pub fn scripted_download() -> (ScriptedDownload, Sender<Step>) {
    let (tx, rx) = mpsc::channel();
    (ScriptedDownload { steps: rx }, tx)
}

impl DownloadBackend for ScriptedDownload {
    fn start(
        &mut self,
        _entry: &Entry,
        progress: &mut dyn FnMut(f32),
    ) -> Result<PathBuf, FetchError> {
        loop {
            match self.steps.recv() {
                Ok(Step::Progress(v)) => progress(v),
                Ok(Step::Finish(outcome)) => return outcome,
                Err(_) => return Err(FetchError::DownloadFailed("test ended".into())),
            }
        }
    }
}

pub type Answer = fn(&Entry) -> Result<Option<PathBuf>, FetchError>;

pub fn miss(_: &Entry) -> Result<Option<PathBuf>, FetchError> {
    Ok(None)
}

/// Poster/subtitle provider with a fixed answer. `held` makes every fetch
/// wait for a release from the test first.
pub struct Assets {
    answer: Answer,
    release: Option<Receiver<()>>,
    calls: Arc<AtomicUsize>,
}

impl Assets {
    pub fn instant(answer: Answer) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                answer,
                release: None,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    pub fn held(answer: Answer) -> (Self, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                answer,
                release: Some(rx),
                calls: Arc::new(AtomicUsize::new(0)),
            },
            tx,
        )
    }
}

impl EnrichmentProvider for Assets {
    fn fetch(&mut self, entry: &Entry) -> Result<Option<PathBuf>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(release) = &self.release {
            let _ = release.recv();
        }
        (self.answer)(entry)
    }
}

// --- Coordinator helpers ---

pub struct Parts {
    pub listing: Box<dyn ListingBackend>,
    pub download: Box<dyn DownloadBackend>,
    pub poster: Box<dyn EnrichmentProvider>,
    pub subtitle: Box<dyn EnrichmentProvider>,
}

impl Parts {
    pub fn new(listing: impl ListingBackend + 'static) -> Self {
        Self {
            listing: Box::new(listing),
            download: Box::new(scripted_download().0),
            poster: Box::new(Assets::instant(miss).0),
            subtitle: Box::new(Assets::instant(miss).0),
        }
    }

    pub fn start(self) -> Coordinator<Recorder> {
        let backends = Backends {
            listing: ListingSetup::InProcess(self.listing),
            download: self.download,
            poster: self.poster,
            subtitle: self.subtitle,
        };
        Coordinator::start(backends, Recorder::default(), Duration::from_secs(1))
            .expect("coordinator should start")
    }
}

/// Poll until `done` holds, failing the test after `DEADLINE`.
pub fn wait_until<U: UiSurface>(
    coordinator: &mut Coordinator<U>,
    what: &str,
    done: impl Fn(&Coordinator<U>) -> bool,
) {
    let start = Instant::now();
    loop {
        coordinator.poll();
        if done(coordinator) {
            return;
        }
        assert!(start.elapsed() < DEADLINE, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Keep polling for a short while so late responses get a chance to land.
pub fn settle<U: UiSurface>(coordinator: &mut Coordinator<U>) {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(100) {
        coordinator.poll();
        thread::sleep(Duration::from_millis(2));
    }
}
