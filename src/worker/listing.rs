use log::warn;

use super::Worker;
use crate::error::FetchError;
use crate::protocol::{ListJob, Response};
use crate::source::ListingBackend;

/// Lists one page per request. Also runs inside the fetch process.
pub struct ListingWorker<B> {
    backend: B,
}

impl<B: ListingBackend + 'static> ListingWorker<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn supports_paged_filtering(&self) -> bool {
        self.backend.supports_paged_filtering()
    }
}

impl<B: ListingBackend + 'static> Worker for ListingWorker<B> {
    type Job = ListJob;

    fn perform(&mut self, job: ListJob, emit: &mut dyn FnMut(Response)) {
        let result = self.backend.list(job.page, &job.filter);
        if let Err(e) = &result {
            warn!("listing: page {} filter {:?} failed: {e}", job.page, job.filter);
        }
        emit(Response::Listing(result));
    }

    fn interrupted(&self, _job: ListJob, reason: &str) -> Response {
        Response::Listing(Err(FetchError::unavailable(format_args!(
            "listing backend crashed: {reason}"
        ))))
    }
}
