//! ticket-core library.
//!
//! Tickets are stored as chains of operation packs in a git-like object
//! store. Current state is never persisted: a [`snapshot::Snapshot`] is
//! compiled by replaying every operation in a deterministic order.
//!
//! # Conventions
//!
//! - **Errors**: per-module `thiserror` enums, aggregated by [`error::Error`].
//!   `anyhow` is only used where files are loaded from disk.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).

pub mod canonical;
pub mod checklist;
pub mod config;
pub mod error;
pub mod id;
pub mod identity;
pub mod label;
pub mod operation;
pub mod pack;
pub mod repository;
pub mod review;
pub mod settings;
pub mod snapshot;
pub mod status;
pub mod ticket;
pub mod timeline;
pub mod workflow;

pub use error::{Error, ErrorCode, Result};
pub use id::Id;
pub use identity::Identity;
pub use operation::Operation;
pub use settings::Settings;
pub use snapshot::Snapshot;
pub use ticket::Ticket;
