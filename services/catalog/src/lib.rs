//! Scenario Catalog Service
//!
//! Backend for the driving-scenario catalog. Users search recorded near-miss
//! scenarios by type, section, location and date, open a scenario to watch
//! its video and see its data files, and download scenario or
//! machine-learning archives through time-limited CDN URLs.
//!
//! ## Features
//!
//! - **Authorized Search**: Paged, counted search restricted to the sections
//!   a caller may see, each result carrying a signed thumbnail URL
//! - **Scenario Detail**: Signed video/thumbnail URLs plus the archives the
//!   caller may download, classified by data division and sized
//! - **Signed Downloads**: Canned-policy CDN URLs for one archive, recorded
//!   in an append-only download history
//! - **Search Form Codes**: Near-miss types, sections and locations
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum)
//! ┌──────────────┐
//! │ API          │
//! └──────────────┘
//!    │        │
//!    ▼        ▼
//! ┌────────┐ ┌──────────┐        ┌──────────────┐
//! │Catalog │ │ Download │───────▶│ URL Signer   │──▶ CDN canned policy
//! │Service │ │ Service  │        └──────────────┘
//! └────────┘ └──────────┘               ▲
//!    │   │        │                     │
//!    │   └────────┼─────────────────────┘
//!    ▼            ▼
//! ┌──────────────┐           ┌──────────────┐
//! │ Object       │──────────▶│ S3 Bucket    │
//! │ Locator      │           │ scenario/... │
//! └──────────────┘           └──────────────┘
//! ┌──────────────┐           ┌──────────────┐
//! │ Catalog      │──────────▶│ PostgreSQL   │
//! │ Store        │           │              │
//! └──────────────┘           └──────────────┘
//! ```

pub mod api;
pub mod catalog_service;
pub mod catalog_store;
pub mod config;
pub mod data_division;
pub mod download_service;
pub mod error;
pub mod frontend_log;
pub mod object_locator;
pub mod url_signer;

pub use api::{AppState, ErrorResponse};
pub use catalog_service::{CatalogService, ScenarioDetail, SearchRequest, SearchResult};
pub use catalog_store::{CatalogStore, PgCatalogStore, ScenarioFilter};
pub use config::{Config, StorageLayout};
pub use data_division::{classify, format_size, DataDivision};
pub use download_service::{DownloadResult, DownloadService};
pub use error::{CatalogError, CatalogResult, MessageCatalog};
pub use object_locator::{ObjectLocator, ObjectStore, S3ObjectStore, StorageObject};
pub use url_signer::{CloudFrontSigner, SigningError, UrlSigner};
