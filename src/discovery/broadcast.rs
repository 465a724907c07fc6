// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Built-in UDP broadcast discovery backend.
//!
//! Purely cooperative: a single non-blocking UDP socket is polled in step
//! with the endpoint, so no locking is needed (contrast [`super::mdns`],
//! whose daemon runs on a background thread). Hosts broadcast the same
//! `@...` name string used on the mDNS TXT record; since there is no
//! resolved mDNS record to source the address and TCP port from, this
//! backend decodes them straight out of the payload.

use super::name::parse_broadcast_name;
use super::{CandidateQueue, DiscoveryBackend, HostCandidate};
use crate::config::BROADCAST_PORT;
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

pub struct BroadcastBackend {
    socket: Option<UdpSocket>,
    queue: CandidateQueue,
    recv_buf: [u8; 64],
}

impl BroadcastBackend {
    pub fn new() -> Self {
        Self {
            socket: None,
            queue: CandidateQueue::default(),
            recv_buf: [0u8; 64],
        }
    }

    fn bind(&mut self) -> Result<()> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, BROADCAST_PORT);
        socket
            .bind(&addr.into())
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        self.socket = Some(socket.into());
        Ok(())
    }

    fn handle_datagram(&mut self, from: SocketAddr, len: usize) {
        let Ok(text) = std::str::from_utf8(&self.recv_buf[..len]) else {
            return;
        };
        let Some((_internal_ip, tcp_port, udp_port)) = parse_broadcast_name(text) else {
            return;
        };
        let SocketAddr::V4(from_v4) = from else {
            return;
        };
        self.queue.push(HostCandidate {
            addr: *from_v4.ip(),
            tcp_port,
            udp_port,
        });
    }
}

impl Default for BroadcastBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryBackend for BroadcastBackend {
    fn start(&mut self) -> Result<()> {
        self.bind()
    }

    fn poll(&mut self) {
        if self.socket.is_none() {
            return;
        }
        loop {
            let result = match &self.socket {
                Some(socket) => socket.recv_from(&mut self.recv_buf),
                None => return,
            };
            match result {
                Ok((len, from)) => self.handle_datagram(from, len),
                Err(_) => break,
            }
        }
    }

    fn get_host(&mut self) -> Option<HostCandidate> {
        self.queue.pop()
    }

    fn restart(&mut self) -> Result<()> {
        self.socket = None;
        self.bind()
    }
}
