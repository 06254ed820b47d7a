//! Throttling and coalescing of marker position updates.
//!
//! The throttler is a pure state machine over one global update stream:
//! `Idle -> Throttled -> Idle`. It never sleeps or spawns; the caller
//! passes the current instant in and arms a timer when asked to. Flushes
//! run at a fixed cadence: the timer is armed once, on entering
//! `Throttled`, for the remainder of the window since the last flush, and
//! later submissions inside the window only overwrite buffered deltas.

use std::time::Duration;

use fxhash::FxHashMap;
use tokio::time::Instant;

use crate::core::config::ThrottleConfig;
use crate::core::geo::LatLng;
use crate::markers::spec::MarkerUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Idle,
    /// A flush is scheduled and deltas are being buffered
    Throttled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleDecision {
    /// Outside the window: apply the whole batch now, unfiltered
    ApplyNow(Vec<MarkerUpdate>),
    /// Qualifying deltas were buffered. When `arm_timer` is set the caller
    /// must schedule a flush after that delay.
    Buffered { arm_timer: Option<Duration> },
}

#[derive(Debug)]
pub struct UpdateThrottler {
    window: Duration,
    min_motion_meters: f64,
    state: ThrottleState,
    last_flush: Option<Instant>,
    pending: FxHashMap<String, MarkerUpdate>,
    /// First-seen order of the pending ids
    order: Vec<String>,
}

impl UpdateThrottler {
    pub fn new(window: Duration, min_motion_meters: f64) -> Self {
        Self {
            window,
            min_motion_meters,
            state: ThrottleState::Idle,
            last_flush: None,
            pending: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.window(), config.min_motion_meters)
    }

    pub fn state(&self) -> ThrottleState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, id: &str) -> Option<&MarkerUpdate> {
        self.pending.get(id)
    }

    /// Offer a batch of updates. `stored` returns the current stored
    /// position for an id, used for the motion filter on buffered updates.
    pub fn submit<F>(&mut self, updates: Vec<MarkerUpdate>, now: Instant, stored: F) -> ThrottleDecision
    where
        F: Fn(&str) -> Option<LatLng>,
    {
        match self.state {
            ThrottleState::Throttled => {
                self.buffer(updates, &stored);
                ThrottleDecision::Buffered { arm_timer: None }
            }
            ThrottleState::Idle => {
                let since_flush = self.last_flush.map(|last| now.saturating_duration_since(last));
                match since_flush {
                    Some(elapsed) if elapsed < self.window => {
                        self.buffer(updates, &stored);
                        if self.pending.is_empty() {
                            return ThrottleDecision::Buffered { arm_timer: None };
                        }
                        self.state = ThrottleState::Throttled;
                        ThrottleDecision::Buffered {
                            arm_timer: Some(self.window - elapsed),
                        }
                    }
                    _ => {
                        self.last_flush = Some(now);
                        ThrottleDecision::ApplyNow(updates)
                    }
                }
            }
        }
    }

    /// Drain buffered deltas in first-seen order and return to `Idle`
    pub fn flush(&mut self, now: Instant) -> Vec<MarkerUpdate> {
        self.state = ThrottleState::Idle;
        self.last_flush = Some(now);
        let mut pending = std::mem::take(&mut self.pending);
        self.order
            .drain(..)
            .filter_map(|id| pending.remove(&id))
            .collect()
    }

    /// Drop buffered deltas for the given ids
    pub fn discard(&mut self, ids: &[String]) {
        for id in ids {
            self.pending.remove(id);
        }
        let pending = &self.pending;
        self.order.retain(|id| pending.contains_key(id));
    }

    /// Forget everything, including the last flush time
    pub fn clear(&mut self) {
        self.pending.clear();
        self.order.clear();
        self.state = ThrottleState::Idle;
        self.last_flush = None;
    }

    fn buffer<F>(&mut self, updates: Vec<MarkerUpdate>, stored: &F)
    where
        F: Fn(&str) -> Option<LatLng>,
    {
        for update in updates {
            let moved = stored(&update.id)
                .map(|current| current.distance_to(&update.position) > self.min_motion_meters)
                .unwrap_or(true);

            if moved {
                if !self.pending.contains_key(&update.id) {
                    self.order.push(update.id.clone());
                }
                self.pending.insert(update.id.clone(), update);
            } else if self.pending.remove(&update.id).is_some() {
                self.order.retain(|id| id != &update.id);
            }
        }
    }
}
