//! Core of a store-and-forward bundle daemon.
//!
//! All bundle state changes happen on a single event loop ([`daemon::Daemon`]).
//! Convergence layers, registrations, timers and storage run on their own
//! tasks and only ever talk to the loop by posting [`event::Event`]s.

mod actions;
mod contacts;
mod custody;
mod fragment;
mod stats;

pub mod admin;
pub mod bundle;
pub mod cla;
pub mod config;
pub mod daemon;
pub mod eid;
pub mod event;
pub mod link;
pub mod reg;
pub mod router;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use actions::BundleActions;
pub use custody::CustodyTimerSpec;
pub use stats::{BundleStats, DaemonStats};

use std::sync::Arc;
use trace_err::*;
use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "instrument")]
use tracing::instrument;

pub use bytes::Bytes;
pub use async_trait::async_trait;
