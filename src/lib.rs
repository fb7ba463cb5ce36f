//! The Rust SDK for JENTIS, a server-side tracking platform.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that collects tracking events and delivers them to a
//! JENTIS collection endpoint described by a [`TrackConfig`]. Events are pushed as loose
//! [`Properties`] and sent together by [`Client::submit`]. Visitor consent decisions are sent
//! with [`Client::set_consents`].
//!
//! The client keeps a persistent visitor identifier, a consent identifier and a session that
//! expires after a period of inactivity. Identifiers and configuration are kept in a [`Storage`];
//! use [`FileStorage`] to retain them across process restarts.
//!
//! Hosts with a foreground/background lifecycle (mobile and desktop apps) should forward those
//! signals through [`AppLifecycle`] so sessions expire correctly while the app is suspended.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! In production, it is recommended to log and otherwise ignore errors, as tracking should not be
//! critical enough to cause application failures. Events of a failed submission stay queued and
//! are sent with the next one.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `jentis` target. Consider integrating a `log`-compatible logger implementation for better
//! visibility into SDK operations.
//!
//! # Examples
//!
//! See `demos/simple/main.rs` in the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod clock;
mod config;
mod configuration_store;
mod error;
mod events;
mod identity;
mod model;
mod payload;
mod session;
mod storage;
mod transport;

pub use client::{AppLifecycle, Client};
pub use clock::{Clock, SystemClock};
pub use config::{ClientConfig, Environment, TrackConfig};
pub use error::{Error, Result};
pub use events::{Properties, PropertyValue, PushedEvent};
pub use model::{Action, ConsentRecord, ConsentStatus, EnrichmentPlugin, Variables};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use transport::{HttpTransport, Request, Transport};
