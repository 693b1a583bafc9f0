use log::debug;

use super::Worker;
use crate::error::FetchError;
use crate::model::{Enrichment, Entry};
use crate::protocol::Response;
use crate::source::EnrichmentProvider;

/// Poster or subtitle lookup. One instance per enrichment kind, so each
/// entry field has exactly one writer.
pub struct EnrichWorker<P> {
    kind: Enrichment,
    provider: P,
}

impl<P: EnrichmentProvider + 'static> EnrichWorker<P> {
    pub fn new(kind: Enrichment, provider: P) -> Self {
        Self { kind, provider }
    }
}

impl<P: EnrichmentProvider + 'static> Worker for EnrichWorker<P> {
    type Job = Entry;

    fn perform(&mut self, entry: Entry, emit: &mut dyn FnMut(Response)) {
        let outcome = self.provider.fetch(&entry);
        match &outcome {
            Ok(Some(path)) => debug!("{}: {} -> {}", self.kind, entry.id, path.display()),
            Ok(None) => debug!("{}: nothing for {}", self.kind, entry.id),
            Err(e) => debug!("{}: {} failed: {e}", self.kind, entry.id),
        }
        emit(Response::Enriched {
            kind: self.kind,
            entry: entry.id,
            outcome,
        });
    }

    fn interrupted(&self, entry: Entry, reason: &str) -> Response {
        Response::Enriched {
            kind: self.kind,
            entry: entry.id,
            outcome: Err(FetchError::unavailable(format_args!(
                "{} provider crashed: {reason}",
                self.kind
            ))),
        }
    }
}
