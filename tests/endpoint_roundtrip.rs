// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end exercise of `Endpoint` against a hand-rolled fake host over
//! real loopback sockets: connect, bridge id assignment, clock sync, and a
//! user-registered handler receiving a message sent from the host side.

use o2lite::{
    DebugFlags, DiscoveryBackend, Encoder, EndpointConfig, HostCandidate, Transport,
};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Feeds exactly one [`HostCandidate`] the first time it's polled, then never
/// offers another (restart is a no-op since the test host only accepts once).
struct OneShotDiscovery {
    candidate: Option<HostCandidate>,
    started: bool,
}

impl OneShotDiscovery {
    fn new(candidate: HostCandidate) -> Self {
        Self {
            candidate: Some(candidate),
            started: false,
        }
    }
}

impl DiscoveryBackend for OneShotDiscovery {
    fn start(&mut self) -> o2lite::Result<()> {
        self.started = true;
        Ok(())
    }

    fn poll(&mut self) {}

    fn get_host(&mut self) -> Option<HostCandidate> {
        self.candidate.take()
    }

    fn restart(&mut self) -> o2lite::Result<()> {
        Ok(())
    }
}

struct FixedClock {
    epoch: Instant,
}

impl o2lite::MonotonicClock for FixedClock {
    fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

struct FixedLocalIp(Ipv4Addr);

impl o2lite::LocalIpSource for FixedLocalIp {
    fn local_ip(&self) -> o2lite::Result<Ipv4Addr> {
        Ok(self.0)
    }
}

fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).ok()?;
    let len = u32::from_be_bytes(header) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).ok()?;
    Some(body)
}

/// Runs a fake O2 host on a background thread: accepts one connection,
/// assigns a bridge id, answers one clock ping, then sends a user message to
/// `/endpoint-roundtrip/note`.
fn spawn_fake_host(bridge_id: i32) -> HostCandidate {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let tcp_port = listener.local_addr().unwrap().port();
    let udp_socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let udp_port = udp_socket.local_addr().unwrap().port();

    std::thread::spawn(move || {
        let (mut stream, peer) = listener.accept().unwrap();
        stream.set_nodelay(true).ok();

        let con_body = read_frame(&mut stream).unwrap();
        let mut dec = o2lite::Decoder::start_parse(&con_body).unwrap();
        assert_eq!(dec.address(), "!_o2/o2lite/con");
        let _internal_ip = dec.get_string().unwrap();
        let udp_recv_port = u16::try_from(dec.get_int32().unwrap()).unwrap();
        let client_udp_addr = SocketAddr::new(peer.ip(), udp_recv_port);

        let mut enc = Encoder::new(64);
        enc.start("!_o2/id", 0.0, "i", Transport::Tcp).unwrap();
        enc.add_i32(bridge_id).unwrap();
        stream.write_all(enc.tcp_frame().unwrap()).unwrap();

        // Answer clock pings (the synchronizer needs a full window of replies
        // before it reports synchronized) on a dedicated thread, since they
        // keep arriving after the first sync too.
        std::thread::spawn(move || {
            let mut ping_buf = [0u8; 128];
            loop {
                let Ok((len, _from)) = udp_socket.recv_from(&mut ping_buf) else {
                    break;
                };
                let Ok(mut ping_dec) = o2lite::Decoder::start_parse(&ping_buf[..len]) else {
                    continue;
                };
                if ping_dec.address() != "!_o2/o2lite/cs/get" {
                    continue;
                }
                let (Ok(_bridge), Ok(sync_id), Ok(reply_to)) = (
                    ping_dec.get_int32(),
                    ping_dec.get_int32(),
                    ping_dec.get_string(),
                ) else {
                    continue;
                };

                let host_time = 42.0;
                let mut reply_enc = Encoder::new(64);
                if reply_enc.start(reply_to, host_time, "it", Transport::Udp).is_err() {
                    continue;
                }
                let _ = reply_enc.add_i32(sync_id);
                let _ = reply_enc.add_time(host_time);
                let _ = udp_socket.send_to(reply_enc.udp_payload(), client_udp_addr);
            }
        });

        // Wait for the o2lite/cs/cs ack the endpoint sends on first sync.
        let ack_body = read_frame(&mut stream).unwrap();
        let ack_dec = o2lite::Decoder::start_parse(&ack_body).unwrap();
        assert_eq!(ack_dec.address(), "!_o2/o2lite/cs/cs");

        // Send a user message the registered handler should observe.
        let mut note_enc = Encoder::new(64);
        note_enc
            .start("/endpoint-roundtrip/note", 0.0, "i", Transport::Tcp)
            .unwrap();
        note_enc.add_i32(99).unwrap();
        stream.write_all(note_enc.tcp_frame().unwrap()).unwrap();

        // Keep the connection open a little longer so the client can drain it.
        std::thread::sleep(Duration::from_millis(500));
    });

    HostCandidate {
        addr: Ipv4Addr::LOCALHOST,
        tcp_port,
        udp_port,
    }
}

/// Like [`spawn_fake_host`], but writes an oversized frame and a well-formed
/// `/endpoint-roundtrip/note` frame back-to-back in a single `write_all`
/// call, so both land in the same TCP read on the client side. Exercises the
/// edge-triggered-epoll hazard directly: if draining the oversized frame ever
/// stopped short of the well-formed frame sitting right behind it in the same
/// read, the endpoint would have no further readiness event to wake it up,
/// and the handler below would never fire before the test's deadline.
fn spawn_fake_host_oversized_then_wellformed(bridge_id: i32, oversized_len: usize) -> HostCandidate {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let tcp_port = listener.local_addr().unwrap().port();
    let udp_socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let udp_port = udp_socket.local_addr().unwrap().port();

    std::thread::spawn(move || {
        let (mut stream, peer) = listener.accept().unwrap();
        stream.set_nodelay(true).ok();

        let con_body = read_frame(&mut stream).unwrap();
        let mut dec = o2lite::Decoder::start_parse(&con_body).unwrap();
        assert_eq!(dec.address(), "!_o2/o2lite/con");
        let _internal_ip = dec.get_string().unwrap();
        let udp_recv_port = u16::try_from(dec.get_int32().unwrap()).unwrap();
        let client_udp_addr = SocketAddr::new(peer.ip(), udp_recv_port);

        let mut enc = Encoder::new(64);
        enc.start("!_o2/id", 0.0, "i", Transport::Tcp).unwrap();
        enc.add_i32(bridge_id).unwrap();
        stream.write_all(enc.tcp_frame().unwrap()).unwrap();

        std::thread::spawn(move || {
            let mut ping_buf = [0u8; 128];
            loop {
                let Ok((len, _from)) = udp_socket.recv_from(&mut ping_buf) else {
                    break;
                };
                let Ok(mut ping_dec) = o2lite::Decoder::start_parse(&ping_buf[..len]) else {
                    continue;
                };
                if ping_dec.address() != "!_o2/o2lite/cs/get" {
                    continue;
                }
                let (Ok(_bridge), Ok(sync_id), Ok(reply_to)) = (
                    ping_dec.get_int32(),
                    ping_dec.get_int32(),
                    ping_dec.get_string(),
                ) else {
                    continue;
                };

                let host_time = 42.0;
                let mut reply_enc = Encoder::new(64);
                if reply_enc.start(reply_to, host_time, "it", Transport::Udp).is_err() {
                    continue;
                }
                let _ = reply_enc.add_i32(sync_id);
                let _ = reply_enc.add_time(host_time);
                let _ = udp_socket.send_to(reply_enc.udp_payload(), client_udp_addr);
            }
        });

        // Build an oversized frame (a length header past the endpoint's
        // configured receive buffer, followed by that many junk bytes) and a
        // well-formed note frame, and push both out in one write so they
        // arrive in the same readiness event on the client side.
        let mut combined = Vec::new();
        combined.extend_from_slice(&(oversized_len as u32).to_be_bytes());
        combined.extend(std::iter::repeat(0xAAu8).take(oversized_len));

        let mut note_enc = Encoder::new(64);
        note_enc
            .start("/endpoint-roundtrip/note", 0.0, "i", Transport::Tcp)
            .unwrap();
        note_enc.add_i32(99).unwrap();
        combined.extend_from_slice(note_enc.tcp_frame().unwrap());

        stream.write_all(&combined).unwrap();

        // Wait for the o2lite/cs/cs ack so the connection isn't torn down
        // before the client has had a chance to process the frames above.
        let ack_body = read_frame(&mut stream).unwrap();
        let ack_dec = o2lite::Decoder::start_parse(&ack_body).unwrap();
        assert_eq!(ack_dec.address(), "!_o2/o2lite/cs/cs");

        std::thread::sleep(Duration::from_millis(500));
    });

    HostCandidate {
        addr: Ipv4Addr::LOCALHOST,
        tcp_port,
        udp_port,
    }
}

#[test]
fn oversized_frame_drain_does_not_stall_a_wellformed_frame_behind_it() {
    let candidate = spawn_fake_host_oversized_then_wellformed(3, 256);
    let discovery = OneShotDiscovery::new(candidate);
    let config = EndpointConfig::new("test-ensemble")
        .debug_flags(DebugFlags::none())
        .recv_buffer_len(64);

    let mut endpoint = o2lite::Endpoint::new_with(
        config,
        discovery,
        Box::new(FixedClock {
            epoch: Instant::now(),
        }),
        &FixedLocalIp(Ipv4Addr::new(127, 0, 0, 1)),
    )
    .unwrap();

    let received = Arc::new(AtomicI32::new(-1));
    let received_clone = received.clone();
    endpoint.method_new(
        "/endpoint-roundtrip/note",
        None,
        true,
        Box::new(move |_address, _typespec, decoder| {
            if let Ok(v) = decoder.get_int32() {
                received_clone.store(v, Ordering::SeqCst);
            }
        }),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while received.load(Ordering::SeqCst) == -1 && Instant::now() < deadline {
        endpoint.poll();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(
        received.load(Ordering::SeqCst),
        99,
        "well-formed frame buffered behind an oversized one was never dispatched"
    );
}

#[test]
fn connects_syncs_and_dispatches_user_handler() {
    let candidate = spawn_fake_host(7);
    let discovery = OneShotDiscovery::new(candidate);
    let config = EndpointConfig::new("test-ensemble").debug_flags(DebugFlags::none());

    let mut endpoint = o2lite::Endpoint::new_with(
        config,
        discovery,
        Box::new(FixedClock {
            epoch: Instant::now(),
        }),
        &FixedLocalIp(Ipv4Addr::new(127, 0, 0, 1)),
    )
    .unwrap();

    let received = Arc::new(AtomicI32::new(-1));
    let received_clone = received.clone();
    endpoint.method_new(
        "/endpoint-roundtrip/note",
        None,
        true,
        Box::new(move |_address, _typespec, decoder| {
            if let Ok(v) = decoder.get_int32() {
                received_clone.store(v, Ordering::SeqCst);
            }
        }),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while received.load(Ordering::SeqCst) == -1 && Instant::now() < deadline {
        endpoint.poll();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(endpoint.bridge_id(), 7);
    assert!(endpoint.is_synchronized());
    assert_eq!(received.load(Ordering::SeqCst), 99);
}

#[test]
fn oversized_service_name_does_not_panic_on_a_live_endpoint() {
    let candidate = spawn_fake_host(1);
    let discovery = OneShotDiscovery::new(candidate);
    let config = EndpointConfig::new("test-ensemble");

    let mut endpoint = o2lite::Endpoint::new_with(
        config,
        discovery,
        Box::new(FixedClock {
            epoch: Instant::now(),
        }),
        &FixedLocalIp(Ipv4Addr::new(127, 0, 0, 1)),
    )
    .unwrap();

    let too_long = "x".repeat(64);
    endpoint.set_services(&format!("ok-service,{too_long}"));

    let deadline = Instant::now() + Duration::from_secs(3);
    while !endpoint.is_synchronized() && Instant::now() < deadline {
        endpoint.poll();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(endpoint.is_synchronized());
}
