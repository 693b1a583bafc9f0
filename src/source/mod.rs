//! Blocking backends the workers drive: listing, downloading, enrichment.
//!
//! Backends know nothing about ticks or channels. Each is moved into its
//! worker's thread (or built inside the fetch process) and used from there only.

pub mod catalog;
pub mod http;

use std::path::PathBuf;

use crate::error::FetchError;
use crate::model::{Entry, EntryPayload};

pub use catalog::CatalogSource;
pub use http::{HttpAssetProvider, HttpDownloader};

pub trait ListingBackend: Send {
    fn list(&mut self, page: u32, filter: &str) -> Result<Vec<EntryPayload>, FetchError>;

    /// Whether pages beyond 0 can be requested while a filter is active.
    fn supports_paged_filtering(&self) -> bool {
        false
    }
}

pub trait DownloadBackend: Send {
    /// Download `entry`, reporting progress in [0, 1] along the way.
    fn start(
        &mut self,
        entry: &Entry,
        progress: &mut dyn FnMut(f32),
    ) -> Result<PathBuf, FetchError>;
}

/// Poster or subtitle source. `Ok(None)` means nothing was found.
pub trait EnrichmentProvider: Send {
    fn fetch(&mut self, entry: &Entry) -> Result<Option<PathBuf>, FetchError>;
}

impl<T: ListingBackend + ?Sized> ListingBackend for Box<T> {
    fn list(&mut self, page: u32, filter: &str) -> Result<Vec<EntryPayload>, FetchError> {
        (**self).list(page, filter)
    }

    fn supports_paged_filtering(&self) -> bool {
        (**self).supports_paged_filtering()
    }
}

impl<T: DownloadBackend + ?Sized> DownloadBackend for Box<T> {
    fn start(
        &mut self,
        entry: &Entry,
        progress: &mut dyn FnMut(f32),
    ) -> Result<PathBuf, FetchError> {
        (**self).start(entry, progress)
    }
}

impl<T: EnrichmentProvider + ?Sized> EnrichmentProvider for Box<T> {
    fn fetch(&mut self, entry: &Entry) -> Result<Option<PathBuf>, FetchError> {
        (**self).fetch(entry)
    }
}
