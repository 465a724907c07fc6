// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! o2lite-client - connect to an O2 ensemble and report clock sync status.
//!
//! Discovers the ensemble host, announces one service, and prints the
//! estimated ensemble time once synchronized, then keeps echoing any message
//! sent to `/o2lite-client/note`.

use clap::Parser;
use o2lite::{new_default, DebugFlags, EndpointConfig};
use std::time::Duration;

/// Connect to an O2 ensemble as an o2lite bridge client.
#[derive(Parser, Debug)]
#[command(name = "o2lite-client")]
#[command(version = "0.1.0")]
#[command(about = "Connect to an O2 ensemble and report clock sync status")]
struct Args {
    /// Ensemble name to join
    ensemble: String,

    /// Comma-separated list of services to announce once connected
    #[arg(short, long, default_value = "")]
    services: String,

    /// Debug flag set, e.g. "dg" for discovery+general
    #[arg(short, long, default_value = "")]
    debug: String,

    /// Stop after this many seconds (0 = run forever)
    #[arg(short, long, default_value = "0")]
    timeout: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = EndpointConfig::new(&args.ensemble).debug_flags(DebugFlags::parse(&args.debug));
    let mut endpoint = match new_default(config) {
        Ok(ep) => ep,
        Err(e) => {
            eprintln!("Error: could not start endpoint: {e}");
            std::process::exit(1);
        }
    };

    if !args.services.is_empty() {
        endpoint.set_services(&args.services);
    }

    endpoint.method_new(
        "/o2lite-client/note",
        None,
        true,
        Box::new(|address, typespec, _decoder| {
            println!("received {address} ({typespec})");
        }),
    );

    println!(">>> Joining ensemble '{}'", args.ensemble);
    let deadline = if args.timeout > 0 {
        Some(Duration::from_secs(args.timeout))
    } else {
        None
    };
    let start = std::time::Instant::now();
    let mut reported_sync = false;

    loop {
        endpoint.poll();

        if endpoint.is_synchronized() && !reported_sync {
            reported_sync = true;
            println!(
                "synchronized, bridge_id={} time_get={:.6}",
                endpoint.bridge_id(),
                endpoint.time_get()
            );
        }

        if let Some(limit) = deadline {
            if start.elapsed() >= limit {
                break;
            }
        }

        std::thread::sleep(Duration::from_millis(5));
    }
}
