// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Round-trip-time clock synchronizer.
//!
//! Tracks the offset between the host's reference clock and the local
//! monotonic clock via periodic ping/pong, selecting the sample with the
//! smallest RTT out of the last [`CLOCK_SYNC_HISTORY_LEN`] replies and
//! applying a bounded slew once an estimate is established. Shaped after
//! this codebase's other per-connection estimator state
//! ([`crate::wire`]-adjacent rather than a direct EWMA, since the ping/pong
//! protocol calls for best-of-N selection rather than exponential smoothing).

use crate::config::{
    CLOCK_FIRST_PING_DELAY, CLOCK_PING_BACKOFF_1S, CLOCK_PING_BACKOFF_5S, CLOCK_PING_INTERVAL,
    CLOCK_SLEW_STEP_SECS, CLOCK_SYNC_HISTORY_LEN as N, UNSYNCHRONIZED_TIME,
};

/// Outcome of feeding a `!_o2/cs/put` reply into the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplyEvent {
    /// The reply's sync id didn't match the outstanding ping; ignored.
    Stale,
    /// Stored, but fewer than `N` replies have arrived since the last reset.
    Accumulating,
    /// This reply completed the first full window: `global_minus_local` has
    /// just been set for the first time. The caller must now send
    /// `!_o2/o2lite/cs/cs` over TCP.
    FirstSync,
    /// Already synchronized; the offset was adjusted (clamped or slewed).
    Resynced,
}

pub struct ClockSync {
    sync_id: i32,
    reply_count: u32,
    last_send_time: f64,
    sync_start: Option<f64>,
    next_ping_at: Option<f64>,
    rtts: [f64; N],
    ref_minus_local: [f64; N],
    global_minus_local: f64,
    synchronized: bool,
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            sync_id: 0,
            reply_count: 0,
            last_send_time: 0.0,
            sync_start: None,
            next_ping_at: None,
            rtts: [0.0; N],
            ref_minus_local: [0.0; N],
            global_minus_local: 0.0,
            synchronized: false,
        }
    }

    /// Clear all state. Called whenever the bridge id becomes −1 (TCP lost).
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn global_minus_local(&self) -> f64 {
        self.global_minus_local
    }

    /// `local_now + offset` once synchronized, else the unsynchronized sentinel.
    pub fn time_get(&self, local_now: f64) -> f64 {
        if self.synchronized {
            local_now + self.global_minus_local
        } else {
            UNSYNCHRONIZED_TIME
        }
    }

    /// Arm the first ping, 50ms after connect.
    pub fn schedule_after_connect(&mut self, now: f64) {
        self.sync_start = Some(now);
        self.next_ping_at = Some(now + CLOCK_FIRST_PING_DELAY.as_secs_f64());
    }

    /// Whether a ping is due; always false while no bridge is connected
    /// (`next_ping_at` is `None` after a [`reset`](Self::reset)).
    pub fn due(&self, now: f64) -> bool {
        self.next_ping_at.is_some_and(|t| now >= t)
    }

    fn next_interval_secs(&self, elapsed_since_start: f64) -> f64 {
        if elapsed_since_start >= 5.0 {
            (CLOCK_PING_INTERVAL + CLOCK_PING_BACKOFF_1S + CLOCK_PING_BACKOFF_5S).as_secs_f64()
        } else if elapsed_since_start >= 1.0 {
            (CLOCK_PING_INTERVAL + CLOCK_PING_BACKOFF_1S).as_secs_f64()
        } else {
            CLOCK_PING_INTERVAL.as_secs_f64()
        }
    }

    /// Record that a ping is being sent now; returns the `sync_id` to embed
    /// in the outbound `!_o2/o2lite/cs/get` message, and reschedules the
    /// next ping per the backoff schedule.
    pub fn begin_ping(&mut self, now: f64) -> i32 {
        self.sync_id += 1;
        self.last_send_time = now;
        let elapsed = now - self.sync_start.unwrap_or(now);
        self.next_ping_at = Some(now + self.next_interval_secs(elapsed));
        self.sync_id
    }

    /// Feed a `!_o2/cs/put (i bridge_reply_id, t host_time)` reply.
    pub fn on_reply(&mut self, reply_sync_id: i32, host_time: f64, now: f64) -> ReplyEvent {
        if reply_sync_id != self.sync_id {
            return ReplyEvent::Stale;
        }
        let rtt = now - self.last_send_time;
        let ref_time = host_time + rtt / 2.0;
        let slot = (self.reply_count as usize) % N;
        self.rtts[slot] = rtt;
        self.ref_minus_local[slot] = ref_time - now;
        self.reply_count += 1;

        if self.reply_count < N as u32 {
            return ReplyEvent::Accumulating;
        }

        let mut best = 0;
        for i in 1..N {
            if self.rtts[i] < self.rtts[best] {
                best = i;
            }
        }
        let rtt_best = self.rtts[best];
        let new_gml = self.ref_minus_local[best];

        if !self.synchronized {
            self.global_minus_local = new_gml;
            self.synchronized = true;
            ReplyEvent::FirstSync
        } else {
            self.apply_bounded_correction(new_gml, rtt_best);
            ReplyEvent::Resynced
        }
    }

    fn apply_bounded_correction(&mut self, new_gml: f64, rtt_best: f64) {
        let current = self.global_minus_local;
        let lower = new_gml - rtt_best;
        let upper = new_gml + rtt_best;
        self.global_minus_local = if current < lower {
            lower
        } else if current > upper {
            upper
        } else {
            let diff = new_gml - current;
            if diff.abs() > CLOCK_SLEW_STEP_SECS {
                current + diff.signum() * CLOCK_SLEW_STEP_SECS
            } else {
                new_gml
            }
        };
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsynchronized_time_get_returns_sentinel() {
        let clock = ClockSync::new();
        assert_eq!(clock.time_get(100.0), UNSYNCHRONIZED_TIME);
    }

    #[test]
    fn stale_reply_is_ignored() {
        let mut clock = ClockSync::new();
        clock.schedule_after_connect(0.0);
        let id = clock.begin_ping(0.050);
        assert_eq!(clock.on_reply(id + 1, 1.0, 0.060), ReplyEvent::Stale);
        assert_eq!(clock.reply_count, 0);
    }

    #[test]
    fn fifth_reply_selects_minimum_rtt_sample() {
        let mut clock = ClockSync::new();
        clock.schedule_after_connect(0.0);

        let rtts = [0.020, 0.005, 0.030, 0.008, 0.012];
        let ref_minus_local = [1.000, 1.002, 0.998, 1.001, 1.003];

        let mut event = ReplyEvent::Accumulating;
        for i in 0..5 {
            let send_time = 1000.0 + i as f64;
            let now = send_time + rtts[i];
            let host_time = (ref_minus_local[i] + now) - rtts[i] / 2.0;
            let id = clock.begin_ping(send_time);
            event = clock.on_reply(id, host_time, now);
        }

        assert_eq!(event, ReplyEvent::FirstSync);
        assert!(clock.is_synchronized());
        assert!((clock.global_minus_local() - 1.002).abs() < 1e-6);
    }

    #[test]
    fn resync_clamps_to_rtt_window() {
        let mut clock = ClockSync::new();
        clock.synchronized = true;
        clock.global_minus_local = 0.0;
        clock.apply_bounded_correction(1.0, 0.010);
        assert!((clock.global_minus_local - 0.990).abs() < 1e-9);
    }

    #[test]
    fn resync_within_window_slews_by_bounded_step() {
        let mut clock = ClockSync::new();
        clock.synchronized = true;
        clock.global_minus_local = 1.000;
        clock.apply_bounded_correction(1.010, 0.050);
        assert!((clock.global_minus_local - 1.002).abs() < 1e-9);
    }

    #[test]
    fn resync_snaps_when_difference_is_small() {
        let mut clock = ClockSync::new();
        clock.synchronized = true;
        clock.global_minus_local = 1.0000;
        clock.apply_bounded_correction(1.0005, 0.050);
        assert!((clock.global_minus_local - 1.0005).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_synchronization_and_schedule() {
        let mut clock = ClockSync::new();
        clock.schedule_after_connect(0.0);
        clock.synchronized = true;
        clock.reset();
        assert!(!clock.is_synchronized());
        assert!(!clock.due(1_000_000.0));
    }

    #[test]
    fn ping_schedule_backs_off_over_time() {
        let mut clock = ClockSync::new();
        clock.schedule_after_connect(0.0);
        assert!(clock.due(0.050));
        clock.begin_ping(0.050);
        assert!(!clock.due(0.050 + 0.099));
        assert!(clock.due(0.050 + 0.100));
    }
}
