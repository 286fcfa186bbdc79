//! # Rivulet Core
//!
//! A reactive engine with two composable, cold abstractions:
//!
//! - **[`Uni`]**: a single eventual value (one item, one failure, or never)
//! - **[`Multi`]**: a demand-driven stream of items followed by exactly one
//!   terminal signal
//!
//! ## Design Principles
//!
//! 1. **Exactly-once terminals** - every pipeline instance owns a terminal
//!    guard; racing producers cannot deliver two terminal signals
//! 2. **Consumer-driven demand** - nothing is emitted beyond `request(n)`
//! 3. **No locks across callbacks** - user code may re-enter `request` or
//!    `cancel` from inside any callback
//! 4. **No threads** - the engine runs on whatever thread calls into it
//!
//! ## Example
//!
//! ```rust,ignore
//! use rivulet_core::{Multi, Uni};
//!
//! let handle = Multi::range(1, 4)
//!     .map(|n| n * 2)
//!     .on_completion()
//!     .invoke_async(|| Uni::item(()))
//!     .subscribe_with(|n| println!("{n}"));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod multi;
pub mod signal;
pub mod subscription;
pub mod testing;
pub mod uni;

pub use config::{BackpressureStrategy, EmitterConfig};
pub use error::{Error, Failure, Result};
pub use multi::{Multi, MultiEmitter, Publisher, Subscriber};
pub use signal::Signal;
pub use subscription::{Cancellable, Subscription, SubscriptionHandle};
pub use uni::{Uni, UniEmitter, UniPublisher, UniSubscriber};
