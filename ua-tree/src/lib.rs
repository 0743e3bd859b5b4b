//! # ua-tree
//!
//! Lazy-loading, cached tree over a remote hierarchical namespace such as an
//! OPC UA address space.
//!
//! ## Features
//! - `test-support`: Enables `MockNodeSource` via `mockall`
//!
//! ## Example
//! ```
//! use std::sync::Arc;
//! use ua_tree::{LazyTreeCache, NodeId, SnapshotSource};
//!
//! # tokio_test_block_on(async {
//! let mut cache = LazyTreeCache::new(Arc::new(SnapshotSource::demo()));
//! let root = cache.set_root(&NodeId::new("i=84")).await?;
//! let objects = cache.children_of(root).await?[0];
//! assert_eq!(cache.path_to(objects)?, ["Objects"]);
//! # Ok::<(), ua_tree::TreeError>(())
//! # }).unwrap();
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

mod cache;
mod error;
mod node;
pub mod presentation;
mod snapshot;
mod source;

// Stable public API
pub use cache::{Entry, EntryId, FetchStart, FetchTicket, LazyTreeCache};
pub use error::{TreeError, TreeResult, friendly_hint};
pub use node::{NodeClass, NodeDescription, NodeId};
pub use snapshot::{SnapshotError, SnapshotSource};
pub use source::NodeSource;

// Test support re-export
#[cfg(feature = "test-support")]
pub use source::MockNodeSource;
