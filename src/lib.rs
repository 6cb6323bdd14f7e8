//! Incremental Azure inventory collection
//!
//! Fetches a region's inventory at a cost proportional to what changed since
//! the last run: deployments whose timestamps match the previous snapshot reuse
//! the snapshot's resources, linked templates are downloaded once per URI, and
//! joins between resource kinds go through per-run indexes.
//!
//! - [`azure`] - Cloud API capability and its Resource Manager implementation
//! - [`collector`] - The collection engine
//! - [`snapshot`] - Read-only access to the previous run
//! - [`config`] - Collector settings
//! - [`error`] - Error types and the soft-failure policy

pub mod azure;
pub mod collector;
pub mod config;
pub mod error;
pub mod snapshot;

pub use collector::{CollectionScope, CollectionSummary, Collector};
pub use config::CollectorConfig;
pub use error::{ApiError, CollectorError};
