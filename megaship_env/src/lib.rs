//! Megaship Tracker Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the tracker engine
//! to run against both the **Production** relay (tokio + ZeroMQ) and a
//! **Simulation** harness (virtual clock + replayed frames).
//!
//! # Core Concept: The Reactor Pattern
//!
//! Every source of non-determinism the engine touches is intercepted:
//! - Time (`now()`, `system_time()`, `sleep()`)
//! - Task spawning (`spawn()`) for detached sink delivery
//! - Feed transport (`recv_frame()`)
//!
//! The engine itself never reads the clock directly, so a scenario replayed
//! against a virtual clock produces the same events every time.
//!
//! # Example
//!
//! ```ignore
//! use megaship_env::{TrackerContext, FeedSource};
//!
//! async fn processing_loop<Ctx: TrackerContext>(ctx: &Ctx, rx: &mut Receiver<Message>) {
//!     loop {
//!         tokio::select! {
//!             msg = rx.recv() => handle(msg, ctx.utc_now()),
//!             _ = ctx.sleep(Duration::from_secs(1)) => check_shutdown(),
//!         }
//!     }
//! }
//! ```

mod context;
mod feed;
mod types;
mod error;
mod tokio_impl;

pub use context::TrackerContext;
pub use feed::FeedSource;
pub use types::UploaderId;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
