//! # Rivulet Adapt
//!
//! Bridges between rivulet pipelines and the async Rust ecosystem.
//!
//! - [`MultiAdaptExt::to_stream`] exposes a Multi as a `futures::Stream`
//! - [`UniAdaptExt::to_future`] exposes a Uni as a `Future`
//! - [`multi_from_stream`] and [`uni_from_future`] go the other way, driving
//!   async code on a tokio runtime
//!
//! Demand, cancellation and exactly-once terminal delivery hold on both
//! sides of the boundary.
//!
//! ## Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use rivulet_adapt::{MultiAdaptExt, UniAdaptExt};
//! use rivulet_core::{Multi, Uni};
//!
//! let total: i64 = Multi::range(0, 100)
//!     .to_stream()
//!     .filter_map(|r| async move { r.ok() })
//!     .fold(0, |acc, n| async move { acc + n })
//!     .await;
//!
//! let answer = Uni::item(42).to_future().await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
mod future;
mod source;
mod stream;

pub use config::{StreamConfig, StreamConfigBuilder, DEFAULT_PREFETCH};
pub use error::{AdaptError, Result};
pub use future::{UniAdaptExt, UniFuture};
pub use source::{multi_from_stream, uni_from_future};
pub use stream::{MultiAdaptExt, MultiStream};
