// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! mDNS/DNS-SD discovery backend.
//!
//! The daemon from `mdns-sd` owns its own background thread and hands
//! events back over a channel; this backend just drains that channel on
//! each `poll()` and validates/queues candidates. No locking is needed on
//! our side — the channel receiver is only ever touched from here.

use super::name::validate_and_extract_udp_port;
use super::{CandidateQueue, DiscoveryBackend, HostCandidate};
use crate::config::{DebugFlags, SERVICE_DOMAIN, SERVICE_TYPE};
use crate::error::{Error, Result};
use mdns_sd::{Receiver, ServiceDaemon, ServiceEvent};

fn service_ty() -> String {
    format!("{SERVICE_TYPE}.{SERVICE_DOMAIN}")
}

pub struct MdnsBackend {
    daemon: Option<ServiceDaemon>,
    events: Option<Receiver<ServiceEvent>>,
    queue: CandidateQueue,
    debug: DebugFlags,
}

impl MdnsBackend {
    pub fn new(debug: DebugFlags) -> Self {
        Self {
            daemon: None,
            events: None,
            queue: CandidateQueue::default(),
            debug,
        }
    }

    fn browse(&mut self) -> Result<()> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| Error::Discovery(format!("could not start mdns daemon: {e}")))?;
        let events = daemon
            .browse(&service_ty())
            .map_err(|e| Error::Discovery(format!("could not browse {}: {e}", service_ty())))?;
        self.daemon = Some(daemon);
        self.events = Some(events);
        Ok(())
    }

    fn handle_event(&mut self, event: ServiceEvent) {
        let ServiceEvent::ServiceResolved(info) = event else {
            return;
        };
        let Some(name) = info.get_property_val_str("name") else {
            return;
        };
        let Some(udp_port) = validate_and_extract_udp_port(name) else {
            if self.debug.discovery {
                log::debug!("[o2lite::discovery] rejecting malformed name TXT: {name:?}");
            }
            return;
        };
        let Some(addr) = info.get_addresses().iter().find_map(|ip| match ip {
            std::net::IpAddr::V4(v4) => Some(*v4),
            std::net::IpAddr::V6(_) => None,
        }) else {
            return;
        };
        let candidate = HostCandidate {
            addr,
            tcp_port: info.get_port(),
            udp_port,
        };
        if self.debug.discovery {
            log::debug!("[o2lite::discovery] candidate: {candidate:?}");
        }
        self.queue.push(candidate);
    }
}

impl DiscoveryBackend for MdnsBackend {
    fn start(&mut self) -> Result<()> {
        self.browse()
    }

    fn poll(&mut self) {
        let Some(events) = &self.events else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
        }
    }

    fn get_host(&mut self) -> Option<HostCandidate> {
        self.queue.pop()
    }

    fn restart(&mut self) -> Result<()> {
        if let Some(daemon) = self.daemon.take() {
            let _ = daemon.stop_browse(&service_ty());
            let _ = daemon.shutdown();
        }
        self.events = None;
        self.browse()
    }
}
