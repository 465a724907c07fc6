// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! o2lite-host-stub - minimal fake O2 host for exercising an o2lite client
//! by hand, without a full ensemble.
//!
//! Advertises itself over mDNS exactly as a real host would, accepts one
//! o2lite TCP connection, assigns it a bridge id, and answers clock-sync
//! pings with the local wall clock as the reference time. This is a test
//! fixture for one client at a time, not a reimplementation of a real O2
//! host: no multi-client support, no message routing beyond connect and
//! clock sync.

use clap::Parser;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use o2lite::{Decoder, Encoder, Transport};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::Instant;

/// Run a minimal stand-in O2 host for manual o2lite client testing.
#[derive(Parser, Debug)]
#[command(name = "o2lite-host-stub")]
#[command(version = "0.1.0")]
#[command(about = "Minimal fake O2 host for exercising an o2lite client")]
struct Args {
    /// Bridge id to assign the connecting client
    #[arg(long, default_value = "1")]
    bridge_id: i32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("bind tcp listener");
    let tcp_port = listener.local_addr().unwrap().port();

    let udp_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("bind udp socket");
    let udp_port = udp_socket.local_addr().unwrap().port();

    let local_ip = local_ip_address::local_ip()
        .ok()
        .and_then(|ip| match ip {
            std::net::IpAddr::V4(v4) => Some(v4),
            _ => None,
        })
        .unwrap_or(Ipv4Addr::LOCALHOST);

    let daemon = ServiceDaemon::new().expect("start mdns daemon");
    let name_txt = format!(
        "@{}:{}:{:04x}:{:04x}",
        ip_to_hex(local_ip),
        ip_to_hex(local_ip),
        tcp_port,
        udp_port
    );
    let service_info = ServiceInfo::new(
        "_o2proc._tcp.local.",
        "o2lite-host-stub",
        "o2lite-host-stub.local.",
        local_ip,
        tcp_port,
        [("name", name_txt.as_str())].as_slice(),
    )
    .expect("build mdns service info");
    daemon.register(service_info).expect("register mdns service");

    println!(">>> host stub listening: tcp={tcp_port} udp={udp_port}, advertising via mDNS");

    let (mut stream, peer) = listener.accept().expect("accept tcp connection");
    stream.set_nodelay(true).ok();
    println!("    accepted connection from {peer}");

    let client_udp_addr = match read_frame(&mut stream) {
        Some(body) => match parse_con_message(&body) {
            Some(udp_recv_port) => SocketAddr::new(peer.ip(), udp_recv_port),
            None => {
                eprintln!("    expected !_o2/o2lite/con, got something else; exiting");
                return;
            }
        },
        None => {
            eprintln!("    client closed connection before sending con message");
            return;
        }
    };
    println!("    client udp recv address: {client_udp_addr}");

    send_tcp_id(&mut stream, args.bridge_id);

    // A real host also handles service announcements and other app-level
    // messages over this connection; the stub just drains and logs them.
    let mut log_stream = stream.try_clone().expect("clone tcp stream");
    std::thread::spawn(move || loop {
        match read_frame(&mut log_stream) {
            Some(body) => {
                if let Ok(dec) = Decoder::start_parse(&body) {
                    println!("    tcp recv {} ({})", dec.address(), dec.typespec());
                }
            }
            None => break,
        }
    });

    let start = Instant::now();
    let mut recv_buf = [0u8; 256];
    loop {
        let Ok((len, _from)) = udp_socket.recv_from(&mut recv_buf) else {
            continue;
        };
        respond_to_ping(&udp_socket, &recv_buf[..len], client_udp_addr, start);
    }
}

fn ip_to_hex(ip: Ipv4Addr) -> String {
    ip.octets().iter().map(|b| format!("{b:02x}")).collect()
}

/// Blocking read of one length-prefixed frame. `None` on connection close.
fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).ok()?;
    let len = u32::from_be_bytes(header) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).ok()?;
    Some(body)
}

fn parse_con_message(body: &[u8]) -> Option<u16> {
    let mut dec = Decoder::start_parse(body).ok()?;
    if dec.address() != "!_o2/o2lite/con" {
        return None;
    }
    let _internal_ip = dec.get_string().ok()?;
    let udp_recv_port = dec.get_int32().ok()?;
    u16::try_from(udp_recv_port).ok()
}

fn send_tcp_id(stream: &mut TcpStream, bridge_id: i32) {
    let mut enc = Encoder::new(64);
    if enc.start("!_o2/id", 0.0, "i", Transport::Tcp).is_err() {
        return;
    }
    if enc.add_i32(bridge_id).is_err() {
        return;
    }
    if let Ok(frame) = enc.tcp_frame() {
        let _ = stream.write_all(frame);
    }
}

fn respond_to_ping(socket: &UdpSocket, payload: &[u8], client_udp_addr: SocketAddr, start: Instant) {
    let Ok(mut dec) = Decoder::start_parse(payload) else {
        return;
    };
    if dec.address() != "!_o2/o2lite/cs/get" {
        return;
    }
    let (Ok(_bridge_id), Ok(sync_id)) = (dec.get_int32(), dec.get_int32()) else {
        return;
    };
    let Ok(reply_to) = dec.get_string() else {
        return;
    };

    let host_time = start.elapsed().as_secs_f64();
    let mut enc = Encoder::new(64);
    if enc.start(reply_to, host_time, "it", Transport::Udp).is_err() {
        return;
    }
    if enc.add_i32(sync_id).is_err() || enc.add_time(host_time).is_err() {
        return;
    }
    let _ = socket.send_to(enc.udp_payload(), client_udp_addr);
}
