// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The endpoint: a single-threaded, cooperative-poll bridge to one O2
//! ensemble host.
//!
//! Mirrors this codebase's usual non-blocking I/O shape (an `mio::Poll`
//! driving a handful of registered sources, `poll()` never blocking) rather
//! than a dedicated I/O thread: there is exactly one peer, so there is
//! nothing to fan out to a thread pool for.
//!
//! ```text
//! poll() tick:
//!   1. sample the monotonic clock
//!   2. drain discovery backend events into the candidate queue
//!   3. send a clock ping if one is due and we have a bridge id
//!   4. if not connected: take a candidate and connect, or track the idle
//!      timeout and restart discovery
//!   5. zero-timeout mio poll over { UDP recv, TCP }, dispatching every
//!      complete message
//! ```

pub mod frame;
pub mod platform;

use crate::clock::{ClockSync, ReplyEvent};
use crate::config::{
    DebugFlags, EndpointConfig, DISCOVERY_IDLE_TIMEOUT, FALLBACK_UDP_RECV_PORT, MAX_SERVICE_NAME_LEN,
    NO_BRIDGE_ID,
};
use crate::discovery::{DiscoveryBackend, HostCandidate};
use crate::error::{Error, Result};
use crate::handler::{strip_sigil, Builtin, HandlerCallback, HandlerTable};
use crate::wire::{Decoder, Encoder, Transport};
use frame::FrameReader;
use mio::net::{TcpStream as MioTcpStream, UdpSocket as MioUdpSocket};
use mio::{Events, Interest, Poll, Token};
use platform::{LocalIpSource, MonotonicClock, SystemClock, SystemLocalIp};
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream as StdTcpStream, UdpSocket as StdUdpSocket};
use std::time::Duration;

const UDP_TOKEN: Token = Token(0);
const TCP_TOKEN: Token = Token(1);
const CON_ADDRESS: &str = "!_o2/o2lite/con";
const CS_GET_ADDRESS: &str = "!_o2/o2lite/cs/get";
const CS_GET_REPLY_TO: &str = "!_o2/cs/put";
const CS_ACK_ADDRESS: &str = "!_o2/o2lite/cs/cs";
const SV_ADDRESS: &str = "!_o2/o2lite/sv";

/// A lightweight client bridged to one O2 ensemble host over TCP and UDP.
///
/// Generic over the discovery backend so the mDNS and broadcast
/// implementations share this exact poll loop; [`new_default`] picks
/// whichever one the `mdns`/`broadcast` Cargo feature selected.
pub struct Endpoint<D: DiscoveryBackend> {
    ensemble_name: String,
    debug: DebugFlags,
    internal_ip: Ipv4Addr,
    bridge_id: i32,
    services: Vec<String>,
    handlers: HandlerTable,
    clock: ClockSync,
    discovery: D,
    clock_src: Box<dyn MonotonicClock>,

    poll: Poll,
    events: Events,

    udp_send: StdUdpSocket,
    udp_recv: MioUdpSocket,
    udp_recv_port: u16,
    udp_host_addr: Option<SocketAddr>,

    tcp: Option<MioTcpStream>,
    frame_reader: FrameReader,

    encoder: Encoder,
    recv_scratch: Vec<u8>,

    local_now: f64,
    idle_since: Option<f64>,
}

impl<D: DiscoveryBackend> Endpoint<D> {
    /// Build an endpoint with the real system clock and local-IP source.
    pub fn new(config: EndpointConfig, discovery: D) -> Result<Self> {
        Self::new_with(config, discovery, Box::new(SystemClock::new()), &SystemLocalIp)
    }

    /// Build an endpoint with injected platform collaborators, for tests.
    pub fn new_with(
        config: EndpointConfig,
        mut discovery: D,
        clock_src: Box<dyn MonotonicClock>,
        local_ip_source: &dyn LocalIpSource,
    ) -> Result<Self> {
        let udp_send = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;

        let std_recv = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        let udp_recv_port = std_recv
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(FALLBACK_UDP_RECV_PORT);
        std_recv.set_nonblocking(true)?;
        let mut udp_recv = MioUdpSocket::from_std(std_recv);

        let internal_ip = local_ip_source.local_ip()?;

        let poll = Poll::new().map_err(|e| Error::BindFailed(e.to_string()))?;
        poll.registry()
            .register(&mut udp_recv, UDP_TOKEN, Interest::READABLE)
            .map_err(|e| Error::BindFailed(e.to_string()))?;

        discovery.start()?;

        if config.debug_flags.general {
            log::debug!("[o2lite::endpoint] joining ensemble '{}'", config.ensemble_name);
        }

        let recv_buffer_len = config.recv_buffer_len;
        Ok(Self {
            ensemble_name: config.ensemble_name,
            debug: config.debug_flags,
            internal_ip,
            bridge_id: NO_BRIDGE_ID,
            services: Vec::new(),
            handlers: default_handlers(),
            clock: ClockSync::new(),
            discovery,
            clock_src,
            poll,
            events: Events::with_capacity(8),
            udp_send,
            udp_recv,
            udp_recv_port,
            udp_host_addr: None,
            tcp: None,
            frame_reader: FrameReader::new(recv_buffer_len),
            encoder: Encoder::new(recv_buffer_len),
            recv_scratch: vec![0u8; recv_buffer_len],
            local_now: 0.0,
            idle_since: None,
        })
    }

    /// Register a user handler for inbound messages at `path`. `path` may
    /// carry a leading `/` or `!`; both are accepted and stripped the same
    /// way an inbound address is before matching.
    pub fn method_new(
        &mut self,
        path: &str,
        typespec: Option<&str>,
        full: bool,
        handler: HandlerCallback,
    ) {
        self.handlers.method_new(path, typespec, full, handler);
    }

    /// Declare the comma-separated list of services this process offers.
    /// Names longer than [`MAX_SERVICE_NAME_LEN`] bytes are rejected with a
    /// logged diagnostic and dropped from the list, not fatal to the call.
    /// If a bridge id is already assigned, announces the (valid) services
    /// immediately; otherwise they are sent as soon as `!_o2/id` arrives.
    pub fn set_services(&mut self, comma_separated: &str) {
        self.services = comma_separated
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter(|s| {
                let ok = s.len() <= MAX_SERVICE_NAME_LEN;
                if !ok {
                    log::warn!(
                        "[o2lite::endpoint] service name '{s}' exceeds {MAX_SERVICE_NAME_LEN} bytes, dropping"
                    );
                }
                ok
            })
            .map(str::to_string)
            .collect();
        if self.bridge_id != NO_BRIDGE_ID {
            self.send_services();
        }
    }

    /// The ensemble name this endpoint was configured to join. Informational
    /// only: membership is implicit in the host's own configuration, so this
    /// is never used to filter discovery candidates.
    pub fn ensemble_name(&self) -> &str {
        &self.ensemble_name
    }

    /// The bridge id assigned by the host, or [`NO_BRIDGE_ID`] while
    /// disconnected.
    pub fn bridge_id(&self) -> i32 {
        self.bridge_id
    }

    pub fn is_synchronized(&self) -> bool {
        self.clock.is_synchronized()
    }

    /// Best estimate of the ensemble's reference time, or the unsynchronized
    /// sentinel before the first clock sync completes.
    pub fn time_get(&self) -> f64 {
        self.clock.time_get(self.local_now)
    }

    /// Begin building an outbound message for UDP delivery. Follow with
    /// `encoder_mut()` calls to add each typed field, then [`Self::send_finish`].
    pub fn send(&mut self, address: &str, timestamp: f64, typespec: &str) -> Result<()> {
        self.encoder.start(address, timestamp, typespec, Transport::Udp)
    }

    /// Begin building an outbound message for TCP delivery (use for anything
    /// that must arrive reliably and in order, e.g. service announcements).
    pub fn send_cmd(&mut self, address: &str, timestamp: f64, typespec: &str) -> Result<()> {
        self.encoder.start(address, timestamp, typespec, Transport::Tcp)
    }

    /// The in-progress outbound message, for `add_i32`/`add_string`/etc.
    pub fn encoder_mut(&mut self) -> &mut Encoder {
        &mut self.encoder
    }

    /// Flush the message built since [`Self::send`]/[`Self::send_cmd`] over
    /// the transport it was started with. A no-op (logged) if the encoder
    /// reports an error, or if the required socket isn't ready (no TCP
    /// connection yet for a `send_cmd`, no known host address yet for a
    /// `send`).
    pub fn send_finish(&mut self) {
        match self.encoder.transport() {
            Transport::Udp => self.flush_udp(),
            Transport::Tcp => self.flush_tcp(),
        }
    }

    /// Run one non-blocking iteration of discovery, clock sync, and I/O.
    /// Never blocks; call in a loop (see [`Self::sleep`] for a blocking wait
    /// that still pumps this).
    pub fn poll(&mut self) {
        self.local_now = self.clock_src.now_secs();

        self.discovery.poll();

        if self.bridge_id != NO_BRIDGE_ID && self.clock.due(self.local_now) {
            self.send_clock_ping();
        }

        if self.tcp.is_none() {
            self.pursue_connection();
        }

        if let Err(e) = self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            log::warn!("[o2lite::endpoint] mio poll error: {e}");
            return;
        }

        let tokens: Vec<Token> = self.events.iter().map(|ev| ev.token()).collect();
        for token in tokens {
            match token {
                UDP_TOKEN => self.drain_udp(),
                TCP_TOKEN => self.drain_tcp(),
                _ => {}
            }
        }
    }

    /// Pump `poll()` until at least `seconds` have elapsed.
    pub fn sleep(&mut self, seconds: f64) {
        let deadline = self.clock_src.now_secs() + seconds;
        loop {
            self.poll();
            if self.clock_src.now_secs() >= deadline {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn pursue_connection(&mut self) {
        if let Some(candidate) = self.discovery.get_host() {
            self.idle_since = None;
            if let Err(e) = self.connect_tcp(candidate) {
                log::warn!("[o2lite::endpoint] connect to {candidate:?} failed: {e}");
            }
            return;
        }
        let idle_since = *self.idle_since.get_or_insert(self.local_now);
        if self.local_now - idle_since >= DISCOVERY_IDLE_TIMEOUT.as_secs_f64() {
            if self.debug.discovery {
                log::debug!("[o2lite::discovery] idle timeout, restarting discovery");
            }
            if let Err(e) = self.discovery.restart() {
                log::warn!("[o2lite::discovery] restart failed: {e}");
            }
            self.idle_since = None;
        }
    }

    fn connect_tcp(&mut self, candidate: HostCandidate) -> Result<()> {
        let addr = SocketAddr::V4(SocketAddrV4::new(candidate.addr, candidate.tcp_port));
        let std_stream = StdTcpStream::connect(addr)?;
        let _ = std_stream.set_nodelay(true);
        std_stream.set_nonblocking(true)?;
        let mut mio_stream = MioTcpStream::from_std(std_stream);
        self.poll
            .registry()
            .register(&mut mio_stream, TCP_TOKEN, Interest::READABLE)
            .map_err(|e| Error::BindFailed(e.to_string()))?;

        self.tcp = Some(mio_stream);
        self.frame_reader.reset();
        self.udp_host_addr = Some(SocketAddr::V4(SocketAddrV4::new(candidate.addr, candidate.udp_port)));

        if self.debug.general {
            log::debug!("[o2lite::endpoint] connected to {addr}");
        }

        let ip_str = self.internal_ip.to_string();
        let udp_recv_port = self.udp_recv_port as i32;
        self.encoder.start(CON_ADDRESS, self.local_now, "si", Transport::Tcp)?;
        self.encoder.add_string(&ip_str)?;
        self.encoder.add_i32(udp_recv_port)?;
        self.flush_tcp();
        Ok(())
    }

    fn close_tcp(&mut self) {
        if let Some(mut tcp) = self.tcp.take() {
            let _ = self.poll.registry().deregister(&mut tcp);
        }
        self.bridge_id = NO_BRIDGE_ID;
        self.udp_host_addr = None;
        self.clock.reset();
        self.frame_reader.reset();
    }

    fn drain_udp(&mut self) {
        loop {
            match self.udp_recv.recv_from(&mut self.recv_scratch) {
                Ok((len, _from)) => {
                    if self.debug.receives {
                        log::debug!("[o2lite::wire] udp recv {len} bytes");
                    }
                    let msg = self.recv_scratch[..len].to_vec();
                    self.handle_incoming(msg);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[o2lite::endpoint] udp recv error: {e}");
                    break;
                }
            }
        }
    }

    fn drain_tcp(&mut self) {
        loop {
            let Some(tcp) = self.tcp.as_mut() else {
                return;
            };
            match self.frame_reader.try_read_frame(tcp) {
                Ok(Some(msg)) => self.handle_incoming(msg),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[o2lite::endpoint] tcp connection lost: {e}");
                    self.close_tcp();
                    break;
                }
            }
        }
    }

    fn handle_incoming(&mut self, msg: Vec<u8>) {
        if self.debug.bytes {
            log::trace!("[o2lite::wire] inbound {} bytes: {:?}", msg.len(), msg);
        }
        let mut decoder = match Decoder::start_parse(&msg) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("[o2lite::wire] dropping unparseable message: {e}");
                return;
            }
        };
        let address = strip_sigil(decoder.address()).to_string();
        let typespec = decoder.typespec().to_string();
        let Some(idx) = self.handlers.find_match(&address, &typespec) else {
            log::debug!("[o2lite::handler] no handler for {address} ({typespec})");
            return;
        };
        match self.handlers.builtin_at(idx) {
            Some(builtin) => self.handle_builtin(builtin, &mut decoder),
            None => self.handlers.invoke_user_at(idx, &address, &typespec, &mut decoder),
        }
    }

    fn handle_builtin(&mut self, builtin: Builtin, decoder: &mut Decoder<'_>) {
        match builtin {
            Builtin::Id => match decoder.get_int32() {
                Ok(id) => {
                    self.bridge_id = id;
                    if self.debug.general {
                        log::debug!("[o2lite::endpoint] assigned bridge id {id}");
                    }
                    self.send_services();
                    self.clock.schedule_after_connect(self.local_now);
                }
                Err(e) => log::debug!("[o2lite::endpoint] malformed !_o2/id: {e}"),
            },
            Builtin::ClockPut => {
                let reply = match decoder.get_int32() {
                    Ok(id) => decoder.get_time().map(|t| (id, t)),
                    Err(e) => Err(e),
                };
                match reply {
                    Ok((id, host_time)) => {
                        let event = self.clock.on_reply(id, host_time, self.local_now);
                        if event == ReplyEvent::FirstSync {
                            self.send_cs_ack();
                        }
                    }
                    Err(e) => log::debug!("[o2lite::endpoint] malformed !_o2/cs/put: {e}"),
                }
            }
        }
    }

    /// Builds the ping with `start`/`add_*`; a bad typespec or overflow just
    /// sets the encoder's sticky error flag, which `flush_udp` checks and
    /// logs before dropping the send — no per-field error handling needed.
    fn send_clock_ping(&mut self) {
        let sync_id = self.clock.begin_ping(self.local_now);
        let bridge_id = self.bridge_id;
        let _ = self
            .encoder
            .start(CS_GET_ADDRESS, self.local_now, "iis", Transport::Udp);
        let _ = self.encoder.add_i32(bridge_id);
        let _ = self.encoder.add_i32(sync_id);
        let _ = self.encoder.add_string(CS_GET_REPLY_TO);
        self.flush_udp();
    }

    fn send_cs_ack(&mut self) {
        if self.debug.general {
            log::debug!(
                "[o2lite::clock] synchronized, global_minus_local={:.6}",
                self.clock.global_minus_local()
            );
        }
        let _ = self.encoder.start(CS_ACK_ADDRESS, self.local_now, "", Transport::Tcp);
        self.flush_tcp();
    }

    fn send_services(&mut self) {
        if self.bridge_id == NO_BRIDGE_ID {
            return;
        }
        for name in self.services.clone() {
            let _ = self.encoder.start(SV_ADDRESS, self.local_now, "siisi", Transport::Tcp);
            let _ = self.encoder.add_string(&name);
            let _ = self.encoder.add_i32(1);
            let _ = self.encoder.add_i32(1);
            let _ = self.encoder.add_string("");
            let _ = self.encoder.add_i32(0);
            self.flush_tcp();
        }
    }

    fn flush_tcp(&mut self) {
        if self.encoder.has_error() {
            log::warn!("[o2lite::wire] dropping invalid outbound tcp message");
            return;
        }
        let frame = match self.encoder.tcp_frame() {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[o2lite::wire] {e}");
                return;
            }
        };
        let Some(tcp) = self.tcp.as_mut() else {
            log::debug!("[o2lite::wire] dropping tcp send, not connected");
            return;
        };
        if self.debug.sends {
            log::debug!("[o2lite::wire] tcp send {} bytes", frame.len());
        }
        if let Err(e) = write_all_best_effort(tcp, frame) {
            log::warn!("[o2lite::endpoint] tcp send failed, closing connection: {e}");
            self.close_tcp();
        }
    }

    fn flush_udp(&mut self) {
        if self.encoder.has_error() {
            log::warn!("[o2lite::wire] dropping invalid outbound udp message");
            return;
        }
        let Some(host_addr) = self.udp_host_addr else {
            log::debug!("[o2lite::wire] dropping udp send, host address unknown");
            return;
        };
        let payload = self.encoder.udp_payload();
        if self.debug.sends {
            log::debug!("[o2lite::wire] udp send {} bytes to {host_addr}", payload.len());
        }
        if let Err(e) = self.udp_send.send_to(payload, host_addr) {
            log::warn!("[o2lite::endpoint] udp send failed: {e}");
        }
    }
}

fn default_handlers() -> HandlerTable {
    let mut table = HandlerTable::new();
    table.register_builtin("!_o2/id", "i", true, Builtin::Id);
    table.register_builtin("!_o2/cs/put", "it", true, Builtin::ClockPut);
    table
}

fn write_all_best_effort(stream: &mut MioTcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "tcp write wrote 0 bytes")),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Build an endpoint using whichever discovery backend the `mdns`/`broadcast`
/// Cargo feature selected.
#[cfg(feature = "mdns")]
pub fn new_default(config: EndpointConfig) -> Result<Endpoint<crate::discovery::mdns::MdnsBackend>> {
    let debug = config.debug_flags;
    Endpoint::new(config, crate::discovery::mdns::MdnsBackend::new(debug))
}

#[cfg(all(feature = "broadcast", not(feature = "mdns")))]
pub fn new_default(config: EndpointConfig) -> Result<Endpoint<crate::discovery::broadcast::BroadcastBackend>> {
    Endpoint::new(config, crate::discovery::broadcast::BroadcastBackend::new())
}
