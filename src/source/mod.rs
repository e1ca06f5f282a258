//! Remote board source: JSON models and the HTTP client reading them.
//!
//! - [`BoardSource`] - async trait the harvester talks to
//! - [`SourceClient`] - implementation over `catalog.json` / `res/{num}.json`
//! - [`build_http_client`] - shared reqwest client with the auth cookies

mod client;
mod error;
mod model;

pub use client::{BoardSource, SourceClient, build_http_client};
pub use error::SourceError;
pub use model::{BoardInfo, Catalog, CatalogThread, Post, PostFile, PostGroup, ThreadPage};
