//! Build engine for kiln sites
//!
//! Turns a site root (`site.toml`, `assets.toml`, `layouts/`, `posts/`,
//! `pages/`) into the output directory `out/`.
//!
//! # Overview
//!
//! The build consists of:
//! - **Pool**: bounded fan-out of independent tasks with first-error capture
//! - **Assets**: resolution of `$name` references, hashing and materializing
//! - **Writer**: output files plus gzip and brotli siblings
//! - **Cache**: parsed pages and posts keyed by file fingerprint
//! - **Pipeline**: one full pass over the site
//! - **Coordinator**: one build at a time, requested from any thread
//!
//! # Example
//!
//! ```ignore
//! use kiln::build::{BuildContext, Site};
//!
//! let mut site = Site::open(BuildContext::new(site_root));
//! let summary = site.build()?;
//! println!("{}", summary);
//! ```

pub mod assets;
pub mod cache;
pub mod context;
pub mod coordinator;
pub mod pipeline;
pub mod pool;
pub mod result;
pub mod writer;

pub use assets::{content_hash, AssetCollection, AssetError, AssetIndex, AssetRef};
pub use cache::{CacheStats, StalenessCache};
pub use context::*;
pub use coordinator::{Coordinator, CoordinatorHandle, SiteBuilder};
pub use pipeline::{clean_output, BuildError, Site};
pub use pool::Pool;
pub use result::*;
pub use writer::{FileWriter, WriteError};
