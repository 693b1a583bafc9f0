//! The application object: owns the tick, starts the workers (or the fetch
//! process) and applies admitted results to the UI surface.
//!
//! All methods run on one thread and never block. Responses are collected by
//! `poll()`, which drains the shared response channel with `try_recv()`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use log::{debug, info, warn};

use crate::bridge::{Bridge, ListingFactory};
use crate::error::FetchError;
use crate::gate::Gate;
use crate::model::{Enrichment, Entry, EntryId, EntryPayload, EntrySet};
use crate::protocol::{Envelope, ListJob, RequestId, Response};
use crate::source::{DownloadBackend, EnrichmentProvider, ListingBackend};
use crate::surface::UiSurface;
use crate::tick::{Tick, TickCounter};
use crate::worker::{DownloadWorker, EnrichWorker, ListingWorker, WorkerGone, WorkerHandle};

/// Where listing runs.
pub enum ListingSetup {
    /// A worker thread in this process.
    InProcess(Box<dyn ListingBackend>),
    /// A forked fetch process; the backend is built in the child.
    Forked(ListingFactory),
}

pub struct Backends {
    pub listing: ListingSetup,
    pub download: Box<dyn DownloadBackend>,
    pub poster: Box<dyn EnrichmentProvider>,
    pub subtitle: Box<dyn EnrichmentProvider>,
}

/// Intent epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Idle { tick: Tick },
    Loading { tick: Tick, page: u32, filter: String },
}

enum ListingRoute {
    Thread(WorkerHandle<ListJob>),
    Process(Bridge),
}

impl ListingRoute {
    fn submit(&self, id: RequestId, tick: Tick, job: ListJob) -> Result<(), WorkerGone> {
        match self {
            ListingRoute::Thread(handle) => handle.submit(id, tick, job),
            ListingRoute::Process(bridge) => bridge.submit(id, tick, job),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            ListingRoute::Thread(_) => true,
            ListingRoute::Process(bridge) => bridge.is_alive(),
        }
    }
}

/// Outcome of `Coordinator::need_download`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStart {
    Started,
    AlreadyRunning,
    UnknownEntry,
    /// The download worker is gone; already reported through `something_wrong`.
    NotSent,
}

/// What an outstanding request was for.
#[derive(Debug)]
enum Pending {
    Listing { page: u32, filter: String },
    Download(EntryId),
    Enrich(Enrichment, EntryId),
}

pub struct Coordinator<U> {
    ui: U,
    ticks: TickCounter,
    gate: Gate,
    intent: Intent,
    filter: String,
    next_page: u32,
    paged_filtering: bool,

    listing: ListingRoute,
    download: WorkerHandle<Entry>,
    poster: WorkerHandle<Entry>,
    subtitle: WorkerHandle<Entry>,
    responses: mpsc::Receiver<Envelope<Response>>,

    next_id: u64,
    pending: HashMap<RequestId, (Tick, Pending)>,
    latest_listing: Option<RequestId>,

    displayed: EntrySet,
    downloading: HashMap<EntryId, Entry>,
    fetcher_lost: bool,
}

impl<U: UiSurface> Coordinator<U> {
    /// Start every worker unit. With `ListingSetup::Forked` the fetch process
    /// is forked first, so call this before the process spawns other threads.
    pub fn start(backends: Backends, ui: U, shutdown_grace: Duration) -> anyhow::Result<Self> {
        let (tx, responses) = mpsc::channel();

        let (ticks, listing, paged_filtering) = match backends.listing {
            ListingSetup::Forked(factory) => {
                let ticks = TickCounter::shared()?;
                let bridge = Bridge::start(factory, ticks.reader(), tx.clone(), shutdown_grace)
                    .context("failed to start fetch process")?;
                let paged = bridge.supports_paged_filtering();
                (ticks, ListingRoute::Process(bridge), paged)
            }
            ListingSetup::InProcess(backend) => {
                let worker = ListingWorker::new(backend);
                let paged = worker.supports_paged_filtering();
                let handle = WorkerHandle::spawn("listing", worker, tx.clone())?;
                (TickCounter::new(), ListingRoute::Thread(handle), paged)
            }
        };

        let download =
            WorkerHandle::spawn("download", DownloadWorker::new(backends.download), tx.clone())?;
        let poster = WorkerHandle::spawn(
            "poster",
            EnrichWorker::new(Enrichment::Poster, backends.poster),
            tx.clone(),
        )?;
        let subtitle = WorkerHandle::spawn(
            "subtitle",
            EnrichWorker::new(Enrichment::Subtitle, backends.subtitle),
            tx,
        )?;

        info!(
            "coordinator: started (listing in {}, paged_filtering={paged_filtering})",
            match listing {
                ListingRoute::Thread(_) => "thread",
                ListingRoute::Process(_) => "fetch process",
            }
        );

        let gate = Gate::new(ticks.reader());
        Ok(Self {
            ui,
            intent: Intent::Idle {
                tick: ticks.current(),
            },
            ticks,
            gate,
            filter: String::new(),
            next_page: 0,
            paged_filtering,
            listing,
            download,
            poster,
            subtitle,
            responses,
            next_id: 0,
            pending: HashMap::new(),
            latest_listing: None,
            displayed: EntrySet::new(),
            downloading: HashMap::new(),
            fetcher_lost: false,
        })
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn current_tick(&self) -> Tick {
        self.ticks.current()
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn displayed(&self) -> &EntrySet {
        &self.displayed
    }

    pub fn supports_paged_filtering(&self) -> bool {
        self.paged_filtering
    }

    /// Results discarded by the staleness gate so far.
    pub fn dropped(&self) -> u64 {
        self.gate.dropped()
    }

    /// Requests still waiting for their terminal response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// New filter text: new intent epoch, empty display, page 0.
    pub fn filter_changed(&mut self, filter: &str) {
        info!("coordinator: filter {:?} -> {filter:?}", self.filter);
        self.filter = filter.to_string();
        self.restart();
    }

    /// Same filter, fresh listing from page 0.
    pub fn refresh(&mut self) {
        info!("coordinator: refresh");
        self.restart();
    }

    fn restart(&mut self) {
        self.ticks.advance();
        self.displayed.clear();
        self.ui.clear();
        self.next_page = 0;
        self.load_page(0);
    }

    /// Request the page after the last one that was listed. A page that
    /// failed is requested again; a page already loading is not.
    pub fn need_more(&mut self) -> bool {
        if let Intent::Loading { page, .. } = self.intent
            && page == self.next_page
        {
            debug!("coordinator: page {page} is already loading");
            return false;
        }
        self.load_page(self.next_page)
    }

    /// Request `page` under the current tick. Pages past 0 are refused while
    /// a filter is active unless the backend pages filtered results.
    pub fn load_page(&mut self, page: u32) -> bool {
        if page > 0 && !self.filter.is_empty() && !self.paged_filtering {
            debug!("coordinator: page {page} refused, backend cannot page filtered results");
            self.ui.no_new_data();
            return false;
        }
        let tick = self.ticks.current();
        let id = self.next_request_id();
        let job = ListJob {
            page,
            filter: self.filter.clone(),
        };
        if let Err(e) = self.listing.submit(id, tick, job) {
            warn!("coordinator: listing request {id} not sent: {e}");
            self.ui.something_wrong(&e.to_string());
            return false;
        }
        debug!("coordinator: listing {id} page {page} filter {:?} tick {tick}", self.filter);
        self.pending.insert(
            id,
            (
                tick,
                Pending::Listing {
                    page,
                    filter: self.filter.clone(),
                },
            ),
        );
        self.latest_listing = Some(id);
        self.intent = Intent::Loading {
            tick,
            page,
            filter: self.filter.clone(),
        };
        true
    }

    /// Start downloading a displayed entry. Downloads are not tied to the
    /// intent epoch and always report back.
    pub fn need_download(&mut self, id: &EntryId) -> DownloadStart {
        let Some(entry) = self.displayed.get(id) else {
            warn!("coordinator: download requested for unknown entry {id}");
            return DownloadStart::UnknownEntry;
        };
        if self.downloading.contains_key(id) {
            debug!("coordinator: {id} is already downloading");
            return DownloadStart::AlreadyRunning;
        }
        let entry = entry.clone();
        let tick = self.ticks.current();
        let request = self.next_request_id();
        if let Err(e) = self.download.submit(request, tick, entry.clone()) {
            warn!("coordinator: download {request} not sent: {e}");
            self.ui.something_wrong(&e.to_string());
            return DownloadStart::NotSent;
        }
        info!("coordinator: download {request} for {id}");
        self.pending
            .insert(request, (tick, Pending::Download(id.clone())));
        self.downloading.insert(id.clone(), entry);
        DownloadStart::Started
    }

    /// Apply everything currently waiting on the response channel. Returns
    /// the number of responses handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.responses.try_recv() {
            self.dispatch(envelope);
            handled += 1;
        }
        if !self.fetcher_lost && !self.listing.is_alive() {
            self.fetcher_lost = true;
            warn!("coordinator: fetch process is gone");
            self.pending
                .retain(|_, (_, pending)| !matches!(pending, Pending::Listing { .. }));
            self.latest_listing = None;
            self.intent = Intent::Idle {
                tick: self.ticks.current(),
            };
            self.ui.something_wrong("fetch process exited; listing is unavailable");
        }
        handled
    }

    /// Close every request queue and stop the fetch process. Worker threads
    /// are detached and exit once their current job finishes.
    pub fn shutdown(self) {
        info!(
            "coordinator: shutting down ({} requests in flight)",
            self.pending.len()
        );
        let Self {
            listing,
            download,
            poster,
            subtitle,
            ..
        } = self;
        if let ListingRoute::Process(bridge) = listing {
            bridge.shutdown();
        }
        drop((download, poster, subtitle));
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }

    fn dispatch(&mut self, envelope: Envelope<Response>) {
        let Envelope { id, tick, body } = envelope;

        let continuation = if body.is_terminal() {
            self.pending.remove(&id)
        } else {
            None
        };
        let listed_page = match &continuation {
            Some((_, Pending::Listing { page, .. })) => Some(*page),
            _ => None,
        };
        match &continuation {
            Some((issued, Pending::Listing { page, filter })) => {
                debug!("coordinator: listing {id} (page {page}, filter {filter:?}, tick {issued}) answered");
                if self.latest_listing == Some(id) {
                    self.latest_listing = None;
                    self.intent = Intent::Idle {
                        tick: self.ticks.current(),
                    };
                }
            }
            Some((issued, Pending::Download(entry))) => {
                debug!("coordinator: download {id} for {entry} (tick {issued}) finished");
            }
            Some((issued, Pending::Enrich(kind, entry))) => {
                debug!("coordinator: {kind} {id} for {entry} (tick {issued}) answered");
            }
            None if body.is_terminal() => {
                debug!("coordinator: response {id} has no pending request");
            }
            None => {}
        }

        let gate = self.gate.clone();
        match body {
            Response::Listing(result) => {
                gate.call(tick, result, |result| self.apply_listing(listed_page, result));
            }
            Response::Enriched {
                kind,
                entry,
                outcome,
            } => {
                gate.call(tick, outcome, |outcome| {
                    self.apply_enrichment(kind, &entry, outcome)
                });
            }
            Response::Progress { entry, value } => self.apply_progress(&entry, value),
            Response::Downloaded { entry, outcome } => self.apply_downloaded(&entry, outcome),
        }
    }

    fn apply_listing(
        &mut self,
        page: Option<u32>,
        result: Result<Vec<EntryPayload>, FetchError>,
    ) {
        let payloads = match result {
            Ok(payloads) => payloads,
            Err(e) => {
                self.ui.something_wrong(&e.to_string());
                return;
            }
        };
        // Only a listed page moves paging on; a failed one is asked for again.
        if let Some(page) = page {
            self.next_page = self.next_page.max(page.saturating_add(1));
        }
        if payloads.is_empty() {
            self.ui.no_new_data();
            return;
        }

        // Enrichment is tagged with the tick current now, not the listing's.
        let tick = self.ticks.current();
        for payload in payloads {
            let mut entry = Entry::from(payload);
            if let Some(active) = self.downloading.get(&entry.id) {
                entry.progress = active.progress;
            }
            if !self.displayed.upsert(entry.clone()) {
                debug!("coordinator: {} already displayed", entry.id);
                continue;
            }
            self.ui.add_entry(&entry);
            self.request_enrichment(Enrichment::Poster, &entry, tick);
            self.request_enrichment(Enrichment::Subtitle, &entry, tick);
        }
    }

    fn request_enrichment(&mut self, kind: Enrichment, entry: &Entry, tick: Tick) {
        if entry.enrichment(kind).is_some() {
            return;
        }
        let id = self.next_request_id();
        let handle = match kind {
            Enrichment::Poster => &self.poster,
            Enrichment::Subtitle => &self.subtitle,
        };
        match handle.submit(id, tick, entry.clone()) {
            Ok(()) => {
                self.pending
                    .insert(id, (tick, Pending::Enrich(kind, entry.id.clone())));
            }
            Err(e) => warn!("coordinator: {kind} request for {} not sent: {e}", entry.id),
        }
    }

    fn apply_enrichment(
        &mut self,
        kind: Enrichment,
        id: &EntryId,
        outcome: Result<Option<PathBuf>, FetchError>,
    ) {
        let path = match outcome {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!("coordinator: no {kind} for {id}");
                return;
            }
            Err(e) => {
                debug!("coordinator: {kind} for {id} failed: {e}");
                return;
            }
        };
        let Some(entry) = self.displayed.get_mut(id) else {
            debug!("coordinator: {kind} for {id} arrived after it left the display");
            return;
        };
        if entry.set_enrichment(kind, path) {
            self.ui.entry_updated(entry);
        }
    }

    fn apply_progress(&mut self, id: &EntryId, value: f32) {
        let Some(active) = self.downloading.get_mut(id) else {
            debug!("coordinator: progress for {id} with no download running");
            return;
        };
        let value = active.set_progress(value);
        match self.displayed.get_mut(id) {
            Some(shown) => {
                shown.set_progress(value);
                self.ui.update_progress(shown, value);
            }
            None => self.ui.update_progress(active, value),
        }
    }

    fn apply_downloaded(&mut self, id: &EntryId, outcome: Result<PathBuf, FetchError>) {
        let Some(mut finished) = self.downloading.remove(id) else {
            debug!("coordinator: completion for {id} with no download running");
            return;
        };
        match outcome {
            Ok(path) => {
                info!("coordinator: {id} downloaded to {}", path.display());
                finished.set_progress(1.0);
                finished.file = Some(path.clone());
                let shown = match self.displayed.get_mut(id) {
                    Some(shown) => {
                        shown.set_progress(1.0);
                        shown.file = Some(path);
                        shown
                    }
                    None => &mut finished,
                };
                self.ui.update_progress(shown, 1.0);
                self.ui.entry_updated(shown);
            }
            Err(e) => {
                warn!("coordinator: download of {id} failed: {e}");
                self.ui
                    .something_wrong(&format!("{}: {e}", finished.title));
            }
        }
    }
}
