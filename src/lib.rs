//! # modelcache
//!
//! A transparent read-through caching reverse proxy for model viewer assets.
//!
//! Each request target is served from a flat on-disk store when present;
//! otherwise it is fetched from the configured upstream under a hard timeout,
//! optionally repaired (helm geoset flags in tbc/wrath armor metadata), written
//! atomically, and then served. Entries never expire.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use modelcache::{CacheProxy, Config, Server};
//! use modelcache::middleware::{AccessLog, Cors, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("https://wow.zamimg.com");
//!     let proxy = Arc::new(CacheProxy::from_config(&config).await?);
//!
//!     let handler = Pipeline::new(move |req| {
//!         let proxy = Arc::clone(&proxy);
//!         async move { proxy.handle(req).await }
//!     })
//!     .layer(AccessLog)
//!     .layer(Cors::default())
//!     .into_handler();
//!
//!     Server::bind(config.listen_addr()).await?.run(handler).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod http;
pub mod middleware;
pub mod proxy;
pub mod repair;
pub mod server;
pub mod upstream;

pub use cache::{CacheKey, CacheStore};
pub use config::Config;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use proxy::{CacheProxy, PopulateError};
pub use repair::HelmRepair;
pub use server::{Server, ServerError};
pub use upstream::{FetchOutcome, Fetcher, Upstream};
