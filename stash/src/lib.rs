//! A pluggable, single-flight cache for computed values and byte streams.
//!
//! # Features
//! - **Single-flight builds**: concurrent lookups of a missing key run its
//!   builder once and share the result, or the failure.
//! - **Pluggable stores**: an in-memory store and a disk store with a sharded
//!   (one file per key) or aggregated (one `cache.json`) layout, behind the
//!   [`Store`](store::Store) trait.
//! - **Freshness**: time-to-live, time-to-idle and caller-supplied version
//!   stamps.
//! - **Streaming**: entries can hold a [`Reader`] instead of a value, and a
//!   read stream can be handed out before its lookup has finished.
//! - **Observability**: `tracing` events and a [`MetricsSnapshot`].

// Public modules that form the API
pub mod builder;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod handles;
pub mod manager;
pub mod metrics;
pub mod store;
pub mod stream;
pub mod value;

// Internal, crate-only modules
mod expiry;
mod hold;
mod shared;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use codec::{EntryCodec, JsonCodec};
pub use config::CacheConfigRaw;
pub use entry::{CacheEntry, EntryMeta};
pub use error::{BoxError, BuildError, CacheError, Result};
pub use handles::{Built, Cache, GetOptions, PutOptions};
pub use manager::CacheManager;
pub use metrics::MetricsSnapshot;
pub use store::{DiskOptions, DiskStore, MemoryStore, Store};
pub use stream::DelayedStream;
pub use value::{ByteStream, Encoding, Payload, Reader, Value};
