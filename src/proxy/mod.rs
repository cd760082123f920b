//! Read-through cache in front of the upstream.
//!
//! [`CacheProxy::dispatch`] serves a stored artifact when one exists and
//! otherwise runs [`CacheProxy::populate`] (fetch, optional repair, atomic
//! write) before serving what was written. Concurrent misses for the same
//! target are not coalesced: each fetches and writes on its own, and the
//! last complete write wins.

use bytes::Bytes;
use thiserror::Error;
use tracing::{error, warn};

use crate::cache::{CacheKey, CacheStore, StoreError};
use crate::config::Config;
use crate::http::{Request, Response, StatusCode};
use crate::repair::{HelmRepair, RepairError};
use crate::upstream::{FetchOutcome, Fetcher, Upstream};

mod content_type;

pub use content_type::content_type_for;

/// Response header telling whether the body came straight from storage.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Why a cache entry could not be populated.
#[derive(Debug, Error)]
pub enum PopulateError {
    #[error("upstream answered {0}")]
    Upstream(StatusCode),

    #[error(transparent)]
    Repair(#[from] RepairError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl PopulateError {
    /// The status relayed to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Upstream(status) => *status,
            Self::Repair(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors raised while assembling a proxy from configuration.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// The fetch-repair-store pipeline plus the read-through front.
#[derive(Debug)]
pub struct CacheProxy<F = Upstream> {
    store: CacheStore,
    fetcher: F,
    repair: HelmRepair,
}

impl CacheProxy<Upstream> {
    /// Opens the storage root and builds the upstream client from `config`.
    pub async fn from_config(config: &Config) -> Result<Self, InitError> {
        let store = CacheStore::open(&config.storage_dir).await?;
        let upstream = Upstream::new(config)?;
        Ok(Self::new(store, upstream, HelmRepair::default()))
    }
}

impl<F: Fetcher> CacheProxy<F> {
    pub fn new(store: CacheStore, fetcher: F, repair: HelmRepair) -> Self {
        Self {
            store,
            fetcher,
            repair,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Fetches `target`, repairs it if its route calls for it, and stores it.
    ///
    /// Nothing is written unless every step succeeds.
    pub async fn populate(&self, target: &str) -> Result<(), PopulateError> {
        let payload = match self.fetcher.fetch(target).await {
            FetchOutcome::Success(payload) => payload,
            FetchOutcome::Failure(status) => return Err(PopulateError::Upstream(status)),
        };

        let payload = if self.repair.applies_to(target) {
            self.repair.repair(&self.fetcher, target, payload).await?
        } else {
            payload
        };

        self.store.write(&CacheKey::for_target(target), payload).await?;
        Ok(())
    }

    /// Serves `target` from storage, populating it first on a miss.
    ///
    /// A failed populate is answered with its status and an empty body.
    pub async fn dispatch(&self, target: &str) -> Response {
        let key = CacheKey::for_target(target);

        match self.store.read(&key).await {
            Ok(Some(body)) => return serve(target, body, "HIT"),
            Ok(None) => {}
            Err(e) => {
                error!(target = %target, error = %e, "cache read failed");
                return Response::new(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        if let Err(e) = self.populate(target).await {
            let status = e.status();
            match &e {
                PopulateError::Upstream(_) => warn!(
                    url = %self.fetcher.url(target),
                    status = status.as_u16(),
                    "upstream fetch failed"
                ),
                _ => error!(url = %self.fetcher.url(target), error = %e, "populate failed"),
            }
            return Response::new(status);
        }

        match self.store.read(&key).await {
            Ok(Some(body)) => serve(target, body, "MISS"),
            Ok(None) => {
                error!(target = %target, "cache entry missing right after populate");
                Response::new(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Err(e) => {
                error!(target = %target, error = %e, "cache read failed");
                Response::new(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Endpoint adapter: every method keys on the raw request target.
    pub async fn handle(&self, request: Request) -> Response {
        self.dispatch(request.target()).await
    }
}

fn serve(target: &str, body: Bytes, cache_status: &'static str) -> Response {
    Response::new(StatusCode::OK)
        .header("Content-Type", content_type_for(target))
        .header(CACHE_STATUS_HEADER, cache_status)
        .body_bytes(body)
}
