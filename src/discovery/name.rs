// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Validation and parsing of the discovery TXT record `name` field.
//!
//! Format (28 ASCII characters): `@PPPPPPPP:IIIIIIII:TTTT:UUUU` where `P` is
//! the public IP as 8 hex digits, `I` the internal IP as 8 hex digits, `T`
//! the TCP port as 4 hex digits, and `U` the UDP port as 4 hex digits. Only
//! the UDP port is extracted here; the TCP port and address arrive on the
//! mDNS record itself.

use crate::config::PROC_NAME_LEN;
use std::net::Ipv4Addr;

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Validate the 28-character `@...` TXT value and, if valid, return the
/// decoded UDP port. Mirrors the reference implementation's own checks: it
/// validates the public/internal IP hex fields and their separating colons,
/// but not the TCP port field, before reading the trailing 4 hex digits.
pub fn validate_and_extract_udp_port(name: &str) -> Option<u16> {
    if name.len() != PROC_NAME_LEN {
        return None;
    }
    let bytes = name.as_bytes();
    if bytes[0] != b'@' {
        return None;
    }
    if !is_hex(&name[1..9]) || bytes[9] != b':' {
        return None;
    }
    if !is_hex(&name[10..18]) || bytes[18] != b':' {
        return None;
    }
    let udp_hex = &name[24..28];
    if !is_hex(udp_hex) {
        return None;
    }
    u16::from_str_radix(udp_hex, 16).ok()
}

/// Full decode of the `@...` name string: internal IP, TCP port, UDP port.
///
/// The mDNS backend only needs [`validate_and_extract_udp_port`] because the
/// address and TCP port arrive on the resolved mDNS record itself. The
/// broadcast backend has no such record — the name string it receives is
/// the only source of that information, so it decodes all three fields.
pub fn parse_broadcast_name(name: &str) -> Option<(Ipv4Addr, u16, u16)> {
    if name.len() != PROC_NAME_LEN {
        return None;
    }
    let bytes = name.as_bytes();
    if bytes[0] != b'@' || bytes[9] != b':' || bytes[18] != b':' || bytes[23] != b':' {
        return None;
    }
    if !is_hex(&name[10..18]) || !is_hex(&name[19..23]) || !is_hex(&name[24..28]) {
        return None;
    }
    let internal_ip = u32::from_str_radix(&name[10..18], 16).ok()?;
    let tcp_port = u16::from_str_radix(&name[19..23], 16).ok()?;
    let udp_port = u16::from_str_radix(&name[24..28], 16).ok()?;
    Some((Ipv4Addr::from(internal_ip), tcp_port, udp_port))
}
