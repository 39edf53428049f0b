//! Lane priority model.
//!
//! A lane is one bit of a 31-bit mask denoting an urgency class for a
//! pending update. Numerically smaller bits are more urgent; selecting the
//! next work is a single `x & x.wrapping_neg()` (lowest set bit).
//!
//! Bands, ascending cost/latency: sync/hydration, continuous input,
//! default, transition, retry, selective hydration, idle, and the
//! background (offscreen) lane. Expiration bookkeeping promotes starved
//! lanes so sustained high-priority traffic cannot shut lower bands out
//! forever.

use std::fmt;

/// Total usable lane bits.
pub const TOTAL_LANES: u32 = 31;

/// A set of lanes. A single-bit set is conventionally called a `Lane`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Lanes(pub u32);

/// Alias used where exactly one bit is expected.
pub type Lane = Lanes;

impl Lanes {
    pub const NONE: Lanes = Lanes(0);

    pub const SYNC_HYDRATION: Lanes = Lanes(1 << 0);
    pub const SYNC: Lanes = Lanes(1 << 1);
    pub const INPUT_CONTINUOUS_HYDRATION: Lanes = Lanes(1 << 2);
    pub const INPUT_CONTINUOUS: Lanes = Lanes(1 << 3);
    pub const DEFAULT_HYDRATION: Lanes = Lanes(1 << 4);
    pub const DEFAULT: Lanes = Lanes(1 << 5);
    pub const TRANSITION_HYDRATION: Lanes = Lanes(1 << 6);
    pub const TRANSITIONS: Lanes = Lanes(0b0000000011111111111111110000000);
    pub const RETRIES: Lanes = Lanes(0b0000111100000000000000000000000);
    pub const SELECTIVE_HYDRATION: Lanes = Lanes(1 << 27);
    pub const IDLE_HYDRATION: Lanes = Lanes(1 << 28);
    pub const IDLE: Lanes = Lanes(1 << 29);
    /// Dedicated background lane.
    pub const OFFSCREEN: Lanes = Lanes(1 << 30);

    /// Everything above the idle band.
    pub const NON_IDLE: Lanes = Lanes(0b0001111111111111111111111111111);

    /// The sync band plus continuous input: work that must never be
    /// fragmented by time-slicing.
    pub const BLOCKING: Lanes = Lanes(
        Lanes::SYNC_HYDRATION.0
            | Lanes::SYNC.0
            | Lanes::INPUT_CONTINUOUS_HYDRATION.0
            | Lanes::INPUT_CONTINUOUS.0,
    );

    /// The n-th transition lane (0-based, wraps after 16).
    pub fn transition(n: u32) -> Lanes {
        Lanes(1 << (7 + (n % 16)))
    }

    /// The n-th retry lane (0-based, wraps after 4).
    pub fn retry(n: u32) -> Lanes {
        Lanes(1 << (23 + (n % 4)))
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn any(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub fn merge(self, other: Lanes) -> Lanes {
        Lanes(self.0 | other.0)
    }

    #[inline]
    pub fn remove(self, other: Lanes) -> Lanes {
        Lanes(self.0 & !other.0)
    }

    #[inline]
    pub fn intersects(self, other: Lanes) -> bool {
        (self.0 & other.0) != 0
    }

    #[inline]
    pub fn intersection(self, other: Lanes) -> Lanes {
        Lanes(self.0 & other.0)
    }

    /// `subset` is entirely contained in `self`. Note that the empty set is
    /// a subset of everything, which is what lets already-applied updates
    /// (lane cleared) re-run on any later pass.
    #[inline]
    pub fn is_superset_of(self, subset: Lanes) -> bool {
        (self.0 & subset.0) == subset.0
    }

    /// The single most urgent lane in the set (lowest set bit).
    #[inline]
    pub fn highest_priority(self) -> Lane {
        Lanes(self.0 & self.0.wrapping_neg())
    }

    /// Bit index of a single lane, for expiration-table addressing.
    #[inline]
    pub fn index(self) -> usize {
        debug_assert!(self.0.count_ones() == 1);
        self.0.trailing_zeros() as usize
    }

    pub fn includes_non_idle_work(self) -> bool {
        self.intersects(Lanes::NON_IDLE)
    }

    /// Iterate the individual lanes in the set, most urgent first.
    pub fn iter(self) -> LaneIter {
        LaneIter(self.0)
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lanes({:#033b})", self.0)
    }
}

pub struct LaneIter(u32);

impl Iterator for LaneIter {
    type Item = Lane;

    fn next(&mut self) -> Option<Lane> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0 & self.0.wrapping_neg();
        self.0 &= !bit;
        Some(Lanes(bit))
    }
}

// =============================================================================
// Lane selection
// =============================================================================

/// Pick the target lane set for the next render.
///
/// Returns the most urgent pending lane — unless a render is already in
/// flight (`wip_lanes`) for a target at least as urgent, in which case the
/// in-flight target is kept: an in-progress render is never downgraded.
pub fn get_next_lanes(pending: Lanes, wip_lanes: Lanes) -> Lanes {
    if pending.is_none() {
        return Lanes::NONE;
    }
    let next = pending.highest_priority();
    if wip_lanes.any() && wip_lanes != next {
        // Larger bit value = less urgent.
        if next.0 > wip_lanes.0 {
            return wip_lanes;
        }
    }
    next
}

// =============================================================================
// Starvation / expiration
// =============================================================================

/// Milliseconds a lane may stay pending before it is promoted, by band.
/// `None` means the band never expires (idle and background work).
pub fn expiration_timeout(lane: Lane) -> Option<u64> {
    if lane.intersects(Lanes::BLOCKING) {
        Some(250)
    } else if lane.intersects(Lanes::DEFAULT_HYDRATION.merge(Lanes::DEFAULT)) {
        Some(5_000)
    } else if lane.intersects(Lanes::TRANSITION_HYDRATION.merge(Lanes::TRANSITIONS)) {
        Some(5_000)
    } else if lane.intersects(Lanes::RETRIES) {
        Some(5_000)
    } else {
        // Selective hydration, idle band, offscreen: unbounded.
        None
    }
}

/// Per-root expiration bookkeeping: one slot per lane bit.
#[derive(Debug, Clone, Default)]
pub struct ExpirationTimes {
    times: [Option<u64>; TOTAL_LANES as usize],
}

impl ExpirationTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk the pending lanes, stamping an expiration on any lane seen for
    /// the first time and collecting the lanes whose stamp has elapsed into
    /// the returned set.
    pub fn mark_starved(&mut self, pending: Lanes, now: u64) -> Lanes {
        let mut expired = Lanes::NONE;
        for lane in pending.iter() {
            let slot = &mut self.times[lane.index()];
            match *slot {
                None => {
                    *slot = expiration_timeout(lane).map(|t| now + t);
                }
                Some(at) if at <= now => {
                    expired = expired.merge(lane);
                }
                Some(_) => {}
            }
        }
        expired
    }

    /// Clear the stamps of every lane that is no longer pending.
    pub fn retain(&mut self, remaining: Lanes) {
        for (i, slot) in self.times.iter_mut().enumerate() {
            if !remaining.intersects(Lanes(1 << i)) {
                *slot = None;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, lane: Lane) -> Option<u64> {
        self.times[lane.index()]
    }
}

// =============================================================================
// Event priority
// =============================================================================

/// Classification tier for externally sourced interaction events.
///
/// Four tiers bucket the 31 lanes for everything that talks to the host:
/// ambient update priority, scheduler task priority, event dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// Discrete interactions: clicks, key presses. Maps to the sync lane.
    Discrete,
    /// Continuous interactions: drags, pointer moves.
    Continuous,
    /// Everything without a more specific classification.
    Default,
    /// Deferrable work.
    Idle,
}

impl EventPriority {
    /// The lane a new update gets when issued at this priority.
    pub fn lane(self) -> Lane {
        match self {
            EventPriority::Discrete => Lanes::SYNC,
            EventPriority::Continuous => Lanes::INPUT_CONTINUOUS,
            EventPriority::Default => Lanes::DEFAULT,
            EventPriority::Idle => Lanes::IDLE,
        }
    }
}

/// Collapse a lane set onto the four event-priority tiers.
///
/// The tier of the set is the tier of its most urgent lane: anything at or
/// above the sync lane is discrete, anything at or above continuous input
/// is continuous, any other non-idle work is default, the rest is idle.
pub fn lanes_to_event_priority(lanes: Lanes) -> EventPriority {
    let lane = lanes.highest_priority();
    if lane.any() && lane.0 <= Lanes::SYNC.0 {
        return EventPriority::Discrete;
    }
    if lane.any() && lane.0 <= Lanes::INPUT_CONTINUOUS.0 {
        return EventPriority::Continuous;
    }
    if lane.includes_non_idle_work() {
        return EventPriority::Default;
    }
    EventPriority::Idle
}

// =============================================================================
// Tests
// =============================================================================
