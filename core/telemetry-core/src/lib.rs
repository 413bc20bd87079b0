//! # telemetry-core
//!
//! Client-side core of a desktop-tool usage-analytics pipeline: durable
//! event spooling, HTTPS publishing with backoff, a settings/salt
//! subsystem, and the lifecycle coordinator that ties them together.
//!
//! ## Design principles
//!
//! - **Synchronous**: no async runtime dependency; all I/O happens on a
//!   caller-supplied [`scheduler::Scheduler`], so a host can run this
//!   crate's logic on its own thread model.
//! - **No hidden globals**: the [`lifecycle::Lifecycle`] coordinator is a
//!   value a host constructs and owns, not a `static`. Tests construct a
//!   fresh one per scenario.
//! - **Opt-out is absolute**: the [`tracker::NullTracker`] and
//!   [`publisher::NullPublisher`] variants never touch disk or network.
//! - **Deterministic by construction**: [`scheduler::VirtualScheduler`]
//!   makes every time-driven behavior in this crate steppable in tests.

pub mod anonymizer;
pub mod date_provider;
pub mod env;
pub mod error;
pub mod fs_lock;
mod hex;
pub mod lifecycle;
pub mod logger;
pub mod paths;
pub mod publisher;
pub mod scheduler;
pub mod settings;
pub mod tracker;

pub use error::{AnalyticsError, Result};
pub use lifecycle::Lifecycle;
pub use logger::{Logger, TracingLogger};
pub use publisher::{ActivePublisher, ConnectionFactory, NullPublisher, Publisher};
pub use scheduler::{Scheduler, SystemScheduler, VirtualScheduler};
pub use settings::{Settings, SettingsCache};
pub use tracker::{JournalingTracker, NullTracker, Tracker};
