//! Retransmission timer pair.
//!
//! DTLS engines do not keep wall-clock state of their own. Instead they ask the
//! socket to start two one-shot countdowns after every flight and later poll how
//! many of them have fired. The intermediate deadline is a hint that a retransmit
//! may be due, the final deadline means the flight timed out.

use std::time::{Duration, Instant};

/// State reported by [`TimerPair::poll`].
///
/// The raw encoding (`-1`, `0`, `1`, `2`) is what engines expect back from the
/// `get_timer` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// No timer window is armed.
    NoTimerActive,
    /// Armed, neither deadline passed.
    NotElapsed,
    /// Only the intermediate deadline passed.
    IntermediateElapsed,
    /// Both deadlines passed.
    FinalElapsed,
}

impl TimerState {
    /// The integer the engine contract uses for this state.
    pub fn as_raw(&self) -> i32 {
        match self {
            TimerState::NoTimerActive => -1,
            TimerState::NotElapsed => 0,
            TimerState::IntermediateElapsed => 1,
            TimerState::FinalElapsed => 2,
        }
    }

    /// Inverse of [`TimerState::as_raw`].
    pub fn from_raw(v: i32) -> Option<Self> {
        match v {
            -1 => Some(TimerState::NoTimerActive),
            0 => Some(TimerState::NotElapsed),
            1 => Some(TimerState::IntermediateElapsed),
            2 => Some(TimerState::FinalElapsed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadlines {
    intermediate: Instant,
    fin: Instant,
}

/// Two independent one-shot deadlines compared against the monotonic clock.
///
/// Arming replaces whatever was armed before. There is no pause or reset of a
/// single deadline; the engine re-arms the pair for every flight.
#[derive(Debug, Default)]
pub struct TimerPair {
    armed: Option<Deadlines>,
}

impl TimerPair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm both countdowns from now. `final_ms == 0` disarms.
    pub fn arm(&mut self, intermediate_ms: u32, final_ms: u32) {
        self.arm_at(Instant::now(), intermediate_ms, final_ms);
    }

    /// Arm both countdowns starting at `now`. `final_ms == 0` disarms.
    pub fn arm_at(&mut self, now: Instant, intermediate_ms: u32, final_ms: u32) {
        if final_ms == 0 {
            if self.armed.take().is_some() {
                trace!("Timer pair cancelled");
            }
            return;
        }

        if intermediate_ms > final_ms {
            // The deadlines stay independent: a reversed pair reports 1 once the
            // final deadline passes and 2 after both.
            debug!(
                "Timer pair armed with intermediate {}ms > final {}ms",
                intermediate_ms, final_ms
            );
        }

        trace!("Timer pair armed: {}ms, {}ms", intermediate_ms, final_ms);

        self.armed = Some(Deadlines {
            intermediate: now + Duration::from_millis(intermediate_ms as u64),
            fin: now + Duration::from_millis(final_ms as u64),
        });
    }

    /// Clear the pair. Same as `arm(_, 0)`.
    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Count how many deadlines have passed right now.
    pub fn poll(&self) -> TimerState {
        self.poll_at(Instant::now())
    }

    /// Count how many deadlines have passed at `now`.
    pub fn poll_at(&self, now: Instant) -> TimerState {
        let Some(d) = self.armed else {
            return TimerState::NoTimerActive;
        };

        let elapsed = (now >= d.intermediate) as u8 + (now >= d.fin) as u8;

        match elapsed {
            0 => TimerState::NotElapsed,
            1 => TimerState::IntermediateElapsed,
            _ => TimerState::FinalElapsed,
        }
    }
}
