//! Request/response messages exchanged between the coordinator and workers.
//!
//! Every message travels inside an `Envelope` carrying the tick it was issued
//! under. Workers copy the tick from request to response verbatim.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::model::{Enrichment, EntryId, EntryPayload};
use crate::tick::Tick;

/// Pairs a response with the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: RequestId,
    pub tick: Tick,
    pub body: T,
}

/// Payload of a listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListJob {
    pub page: u32,
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Terminal response of a listing request.
    Listing(Result<Vec<EntryPayload>, FetchError>),
    /// Non-terminal download progress in [0, 1].
    Progress { entry: EntryId, value: f32 },
    /// Terminal response of a download request.
    Downloaded {
        entry: EntryId,
        outcome: Result<PathBuf, FetchError>,
    },
    /// Terminal response of a poster/subtitle request. `Ok(None)` is a miss.
    Enriched {
        kind: Enrichment,
        entry: EntryId,
        outcome: Result<Option<PathBuf>, FetchError>,
    },
}

impl Response {
    /// Whether this response ends its request.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Progress { .. })
    }
}
