//! Shared timer tick, driven by idle transport loops instead of a thread.

use crate::event::{EventDescriptor, ROOT_EVENT};
use crate::impl_local_event;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub static TIMER_EVENT: EventDescriptor = EventDescriptor::local("TimerEvent", &[&ROOT_EVENT]);

/// Periodic tick delivered to local handlers only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerEvent;

impl TimerEvent {
    pub const INSTANCE: Self = Self;
}

impl_local_event!(TimerEvent, TIMER_EVENT);

struct TimerState {
    period: Option<Duration>,
    last_tick: Instant,
}

/// Minimum inter-arrival period requested by consumers of [`TimerEvent`].
pub(crate) struct Timer {
    state: Mutex<TimerState>,
}

impl Timer {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TimerState {
                period: None,
                last_tick: Instant::now(),
            }),
        }
    }

    /// Keep the smallest period requested so far.
    pub(crate) fn request(&self, period: Duration) {
        let mut state = self.state.lock();
        state.period = Some(match state.period {
            Some(current) => current.min(period),
            None => period,
        });
    }

    pub(crate) fn cancel(&self) {
        self.state.lock().period = None;
    }

    #[cfg(test)]
    pub(crate) fn period(&self) -> Option<Duration> {
        self.state.lock().period
    }

    /// Whether a tick is due at `now`; consumes the tick if so.
    pub(crate) fn take_due(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        match state.period {
            Some(period) if now.saturating_duration_since(state.last_tick) >= period => {
                state.last_tick = now;
                true
            }
            _ => false,
        }
    }
}
