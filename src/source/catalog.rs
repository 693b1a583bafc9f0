//! Listing backend over a TOML catalog, read from disk or fetched over HTTP.
//!
//! ```toml
//! [[entry]]
//! id = "show-s01e01"
//! title = "Show S01E01"
//! download_url = "https://example.invalid/show-s01e01.torrent"
//! ```
//!
//! The catalog is re-read on every request so a refresh sees new items.

use std::path::PathBuf;

use log::debug;
use regex::RegexBuilder;
use serde::Deserialize;
use ureq::Agent;

use super::ListingBackend;
use crate::error::FetchError;
use crate::model::EntryPayload;

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "entry")]
    entries: Vec<EntryPayload>,
}

enum Location {
    File(PathBuf),
    Url(String),
}

pub struct CatalogSource {
    location: Location,
    agent: Agent,
    page_size: usize,
    paged_filtering: bool,
}

impl CatalogSource {
    /// `location` is a filesystem path or an `http(s)://` URL.
    pub fn new(location: &str, agent: Agent, page_size: usize, paged_filtering: bool) -> Self {
        let location = if location.starts_with("http://") || location.starts_with("https://") {
            Location::Url(location.to_string())
        } else {
            Location::File(PathBuf::from(location))
        };
        Self {
            location,
            agent,
            page_size: page_size.max(1),
            paged_filtering,
        }
    }

    /// Construct and check the catalog can be loaded once.
    pub fn open(
        location: &str,
        agent: Agent,
        page_size: usize,
        paged_filtering: bool,
    ) -> Result<Self, FetchError> {
        let source = Self::new(location, agent, page_size, paged_filtering);
        let n = source.load()?.len();
        debug!("catalog: {location} holds {n} entries");
        Ok(source)
    }

    fn load(&self) -> Result<Vec<EntryPayload>, FetchError> {
        let text = match &self.location {
            Location::File(path) => std::fs::read_to_string(path).map_err(|e| {
                FetchError::unavailable(format!("failed to read {}: {e}", path.display()))
            })?,
            Location::Url(url) => self
                .agent
                .get(url)
                .call()
                .map_err(FetchError::unavailable)?
                .body_mut()
                .read_to_string()
                .map_err(FetchError::unavailable)?,
        };
        let file: CatalogFile = toml::from_str(&text).map_err(FetchError::parse)?;
        Ok(file.entries)
    }
}

impl ListingBackend for CatalogSource {
    fn list(&mut self, page: u32, filter: &str) -> Result<Vec<EntryPayload>, FetchError> {
        let entries = self.load()?;
        let matcher = if filter.is_empty() {
            None
        } else {
            Some(
                RegexBuilder::new(&regex::escape(filter))
                    .case_insensitive(true)
                    .build()
                    .map_err(FetchError::parse)?,
            )
        };
        let Some(skip) = (page as usize).checked_mul(self.page_size) else {
            debug!("catalog: page {page} is past any catalog");
            return Ok(Vec::new());
        };
        let listed: Vec<EntryPayload> = entries
            .into_iter()
            .filter(|e| matcher.as_ref().is_none_or(|re| re.is_match(&e.title)))
            .skip(skip)
            .take(self.page_size)
            .collect();
        debug!("catalog: page {page} filter {filter:?} -> {} entries", listed.len());
        Ok(listed)
    }

    fn supports_paged_filtering(&self) -> bool {
        self.paged_filtering
    }
}
