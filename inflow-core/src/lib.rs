//! # Inflow Core
//!
//! Core library for the Inflow upload-completion notifier: the folder
//! lifecycle state machine, the background monitors that drive it, and the
//! ports it talks through.
//!
//! ## Overview
//!
//! Inflow watches object-creation events on an incoming bucket, groups them
//! into logical folders, and tracks each folder through a monotone lifecycle:
//!
//! - **Open**: files are still arriving; an upload monitor debounces
//!   activity until the folder goes quiet.
//! - **UploadFinal**: the upload settled; a processing monitor compares the
//!   incoming file count against the downstream processor's outputs.
//! - **ProcessingComplete**: counts converged; the folder's notification is
//!   updated one last time and downstream artifacts are generated.
//!
//! Every transition is a compare-and-set against the durable metadata store,
//! so duplicated event delivery and concurrent service instances agree on a
//! single winner per transition. A durable work queue plus a periodic
//! reconciliation sweep recover folders whose in-process monitors died.
//!
//! ## Architecture
//!
//! - [`service::FolderWatchService`]: the facade wiring events, monitors,
//!   and background jobs together
//! - [`gate`]: transactional metadata store port (Firestore and in-memory)
//! - [`store`]: object storage port (GCS and in-memory)
//! - [`notify`]: notification port (Slack bot / webhook / disabled)
//! - [`sweep`]: work-queue reconciliation
//! - [`analytics`] and [`artifact`]: best-effort post-completion outputs

pub mod analytics;
pub mod artifact;
pub mod classify;
pub mod error;
pub mod format;
pub mod gate;
pub mod gcp;
mod monitor;
pub mod notify;
pub mod record;
pub mod registry;
pub mod service;
pub mod settings;
pub mod stats;
pub mod store;
pub mod sweep;
pub mod testsupport;

pub use error::{InflowError, Result};
pub use service::{FolderWatchService, ObjectCreatedEvent};
pub use settings::WatchConfig;
