// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! o2lite: a lightweight client that bridges a single process into one O2
//! ensemble over TCP and UDP.
//!
//! Discovers the ensemble host via mDNS/DNS-SD (or a built-in UDP broadcast
//! fallback, selected at compile time via Cargo feature), speaks O2's binary
//! wire protocol, and keeps a clock synchronized to the host's reference time
//! via periodic RTT-sampled pings. Everything runs on one thread behind a
//! single non-blocking [`Endpoint::poll`] call; there is no background I/O
//! thread, since there is exactly one peer to talk to.
//!
//! ```no_run
//! use o2lite::{new_default, EndpointConfig};
//!
//! let config = EndpointConfig::new("my-ensemble");
//! let mut endpoint = new_default(config).expect("endpoint init");
//! endpoint.set_services("metronome");
//!
//! loop {
//!     endpoint.poll();
//!     if endpoint.is_synchronized() {
//!         break;
//!     }
//! }
//! ```

mod clock;
mod config;
mod discovery;
mod endpoint;
mod error;
mod handler;
mod wire;

pub use config::{DebugFlags, DiscoveryBackendKind, EndpointConfig};
pub use discovery::{active_backend, DiscoveryBackend, HostCandidate};
pub use endpoint::new_default;
pub use endpoint::platform::{LocalIpSource, MonotonicClock, SystemClock, SystemLocalIp};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use handler::HandlerCallback;
pub use wire::{Decoder, Encoder, Transport};

#[cfg(feature = "mdns")]
pub use discovery::mdns::MdnsBackend;

#[cfg(feature = "broadcast")]
pub use discovery::broadcast::BroadcastBackend;
