use log::{info, warn};

use super::Worker;
use crate::error::FetchError;
use crate::model::Entry;
use crate::protocol::Response;
use crate::source::DownloadBackend;

/// Runs downloads one at a time, streaming progress ahead of the terminal
/// `Downloaded` response. Progress is forced non-decreasing whatever the
/// backend reports.
pub struct DownloadWorker<B> {
    backend: B,
}

impl<B: DownloadBackend + 'static> DownloadWorker<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: DownloadBackend + 'static> Worker for DownloadWorker<B> {
    type Job = Entry;

    fn perform(&mut self, entry: Entry, emit: &mut dyn FnMut(Response)) {
        info!("download: starting {} ({})", entry.id, entry.title);
        let mut last = 0.0_f32;
        let outcome = self.backend.start(&entry, &mut |value| {
            let value = value.clamp(0.0, 1.0);
            if value > last {
                last = value;
                emit(Response::Progress {
                    entry: entry.id.clone(),
                    value,
                });
            }
        });
        if let Err(e) = &outcome {
            warn!("download: {} failed: {e}", entry.id);
        }
        emit(Response::Downloaded {
            entry: entry.id,
            outcome,
        });
    }

    fn interrupted(&self, entry: Entry, reason: &str) -> Response {
        Response::Downloaded {
            entry: entry.id,
            outcome: Err(FetchError::download(format_args!("backend crashed: {reason}"))),
        }
    }
}
