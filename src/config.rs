// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! o2lite configuration — single source of truth for wire/timing constants.
//!
//! Mirrors this codebase's split between static, compile-time constants and a
//! small per-endpoint runtime configuration struct.

use std::time::Duration;

/// Capacity, in bytes, of the inbound/outbound message buffers.
///
/// The repository this client is modeled on shipped several copies of the
/// endpoint with diverging buffer sizes (256 vs 4096) and mixed endianness in
/// a few spots. 4096 bytes, all big-endian, is the canonical choice.
pub const MAX_MSG_LEN: usize = 4096;

/// Number of most-recent RTT samples the clock synchronizer keeps.
pub const CLOCK_SYNC_HISTORY_LEN: usize = 5;

/// Maximum length, in bytes, of a single service name.
pub const MAX_SERVICE_NAME_LEN: usize = 31;

/// How long a discovery TXT record's `name` value must be to be valid.
pub const PROC_NAME_LEN: usize = 28;

/// Idle period after which discovery is restarted if no host has been found
/// and no bridge is connected.
pub const DISCOVERY_IDLE_TIMEOUT: Duration = Duration::from_secs(20);

/// Delay from connect (receiving `!_o2/id`) to the first clock ping.
pub const CLOCK_FIRST_PING_DELAY: Duration = Duration::from_millis(50);

/// Steady-state delay between clock pings before 1s of syncing has elapsed.
pub const CLOCK_PING_INTERVAL: Duration = Duration::from_millis(100);

/// Additional delay added to the ping interval after 1s of syncing.
pub const CLOCK_PING_BACKOFF_1S: Duration = Duration::from_millis(400);

/// Additional delay added to the ping interval after 5s of syncing
/// (on top of the 1s backoff).
pub const CLOCK_PING_BACKOFF_5S: Duration = Duration::from_millis(9_500);

/// Bounded slew step applied to `global_minus_local` once synchronized.
pub const CLOCK_SLEW_STEP_SECS: f64 = 0.002;

/// Well-known UDP port the broadcast discovery backend sends/listens on.
pub const BROADCAST_PORT: u16 = 56439;

/// Used for the UDP receive socket only if the platform fails to report the
/// OS-assigned port of a just-bound ephemeral socket (normally unreachable).
pub const FALLBACK_UDP_RECV_PORT: u16 = 63366;

/// mDNS / broadcast service type this client browses for.
pub const SERVICE_TYPE: &str = "_o2proc._tcp";
/// mDNS domain the service type is scoped to.
pub const SERVICE_DOMAIN: &str = "local.";

/// Sentinel value returned by `time_get()` before the clock is synchronized.
pub const UNSYNCHRONIZED_TIME: f64 = -1.0;

/// Bridge id value meaning "no active TCP connection".
pub const NO_BRIDGE_ID: i32 = -1;

/// Set of optional diagnostic categories a caller can request, independent of
/// the ambient `log`/`RUST_LOG` level. Mirrors the language-neutral
/// `debug_flags` set from the public API: bytes-of-messages, sends, receives,
/// discovery, general, all-except-bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    /// `b` — log the raw bytes of every message sent/received.
    pub bytes: bool,
    /// `s` — log every send.
    pub sends: bool,
    /// `r` — log every receive.
    pub receives: bool,
    /// `d` — log discovery adapter activity.
    pub discovery: bool,
    /// `g` — log general endpoint lifecycle events.
    pub general: bool,
}

impl DebugFlags {
    /// Parse a debug-flag set from a string over `{b,s,r,d,g,a}`, where `a`
    /// means "all except bytes".
    pub fn parse(flags: &str) -> Self {
        let mut out = Self::default();
        for c in flags.chars() {
            match c {
                'b' => out.bytes = true,
                's' => out.sends = true,
                'r' => out.receives = true,
                'd' => out.discovery = true,
                'g' => out.general = true,
                'a' => {
                    out.sends = true;
                    out.receives = true;
                    out.discovery = true;
                    out.general = true;
                }
                _ => log::warn!("[o2lite::config] ignoring unknown debug flag '{c}'"),
            }
        }
        out
    }

    /// No categories enabled.
    pub const fn none() -> Self {
        Self {
            bytes: false,
            sends: false,
            receives: false,
            discovery: false,
            general: false,
        }
    }
}

/// Discovery backend selection. Only one backend is compiled in at a time
/// (selected by Cargo feature); this enum exists so callers can assert which
/// one is active without `cfg!` littering call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryBackendKind {
    /// mDNS/DNS-SD browse of `_o2proc._tcp.local.`.
    Mdns,
    /// Built-in UDP broadcast fallback.
    Broadcast,
}

/// Builder-style configuration for a new [`crate::Endpoint`], mirroring the
/// builder-configuration shape this codebase uses for its other top-level
/// entities.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub(crate) ensemble_name: String,
    pub(crate) debug_flags: DebugFlags,
    pub(crate) recv_buffer_len: usize,
}

impl EndpointConfig {
    /// Start building a configuration for the given ensemble name.
    pub fn new(ensemble_name: impl Into<String>) -> Self {
        Self {
            ensemble_name: ensemble_name.into(),
            debug_flags: DebugFlags::none(),
            recv_buffer_len: MAX_MSG_LEN,
        }
    }

    /// Set which diagnostic categories should be logged.
    pub fn debug_flags(mut self, flags: DebugFlags) -> Self {
        self.debug_flags = flags;
        self
    }

    /// Override the receive buffer capacity (defaults to [`MAX_MSG_LEN`]).
    pub fn recv_buffer_len(mut self, len: usize) -> Self {
        self.recv_buffer_len = len;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_individual_flags() {
        let flags = DebugFlags::parse("ds");
        assert!(flags.discovery);
        assert!(flags.sends);
        assert!(!flags.bytes);
        assert!(!flags.receives);
        assert!(!flags.general);
    }

    #[test]
    fn all_except_bytes_sets_everything_but_bytes() {
        let flags = DebugFlags::parse("a");
        assert!(flags.sends && flags.receives && flags.discovery && flags.general);
        assert!(!flags.bytes);
    }

    #[test]
    fn builder_defaults_recv_buffer_to_max_msg_len() {
        let cfg = EndpointConfig::new("test-ensemble");
        assert_eq!(cfg.recv_buffer_len, MAX_MSG_LEN);
        assert_eq!(cfg.ensemble_name, "test-ensemble");
    }
}
