// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backpressure for the bounded sync queue.
//!
//! The queue never drops what it already holds. As it fills, admission gets
//! stricter: low-priority changes are turned away first, and once the queue is
//! full every new change is rejected with a backpressure error the caller can
//! surface or retry later.
//!
//! # Example
//!
//! ```
//! use offline_sync::{BackpressureLevel, Priority};
//!
//! let level = BackpressureLevel::from_fill(500, 1000);
//! assert_eq!(level, BackpressureLevel::Normal);
//! assert!(level.admits(Priority::Low));
//!
//! // Nearly full: low priority is turned away
//! let level = BackpressureLevel::from_fill(950, 1000);
//! assert_eq!(level, BackpressureLevel::Critical);
//! assert!(!level.admits(Priority::Low));
//! assert!(level.admits(Priority::High));
//!
//! // Full: nothing new gets in
//! let level = BackpressureLevel::from_fill(1000, 1000);
//! assert!(!level.admits(Priority::High));
//! ```

use crate::sync_item::Priority;

/// Queue fill level.
///
/// - **Normal** (< 70%): accept everything
/// - **Warn** (70-80%): accept, log a warning
/// - **Throttle** (80-90%): accept, warn on every enqueue
/// - **Critical** (90-100%): reject low-priority changes
/// - **Full** (100%): reject every change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackpressureLevel {
    Normal = 0,
    Warn = 1,
    Throttle = 2,
    Critical = 3,
    Full = 4,
}

impl BackpressureLevel {
    /// Calculate level from a fill ratio (0.0 → 1.0)
    #[must_use]
    pub fn from_pressure(pressure: f64) -> Self {
        match pressure {
            p if p < 0.70 => Self::Normal,
            p if p < 0.80 => Self::Warn,
            p if p < 0.90 => Self::Throttle,
            p if p < 1.0 => Self::Critical,
            _ => Self::Full,
        }
    }

    /// Level for a queue holding `len` of `capacity` items.
    #[must_use]
    pub fn from_fill(len: usize, capacity: usize) -> Self {
        if capacity == 0 {
            return Self::Full;
        }
        if len >= capacity {
            return Self::Full;
        }
        Self::from_pressure(len as f64 / capacity as f64)
    }

    /// Whether a new change at `priority` may be enqueued at this level.
    #[must_use]
    pub fn admits(&self, priority: Priority) -> bool {
        match self {
            Self::Normal | Self::Warn | Self::Throttle => true,
            Self::Critical => priority != Priority::Low,
            Self::Full => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Warn => "Warning - sync queue filling up",
            Self::Throttle => "Throttling - sync queue nearly full",
            Self::Critical => "Critical - low priority changes rejected",
            Self::Full => "Full - all new changes rejected",
        }
    }
}

impl std::fmt::Display for BackpressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_level_thresholds() {
        assert_eq!(BackpressureLevel::from_pressure(0.0), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_pressure(0.69), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_pressure(0.70), BackpressureLevel::Warn);
        assert_eq!(BackpressureLevel::from_pressure(0.79), BackpressureLevel::Warn);
        assert_eq!(BackpressureLevel::from_pressure(0.80), BackpressureLevel::Throttle);
        assert_eq!(BackpressureLevel::from_pressure(0.89), BackpressureLevel::Throttle);
        assert_eq!(BackpressureLevel::from_pressure(0.90), BackpressureLevel::Critical);
        assert_eq!(BackpressureLevel::from_pressure(0.99), BackpressureLevel::Critical);
        assert_eq!(BackpressureLevel::from_pressure(1.0), BackpressureLevel::Full);
    }

    #[test]
    fn test_from_fill() {
        assert_eq!(BackpressureLevel::from_fill(0, 10), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_fill(9, 10), BackpressureLevel::Critical);
        assert_eq!(BackpressureLevel::from_fill(10, 10), BackpressureLevel::Full);
        assert_eq!(BackpressureLevel::from_fill(11, 10), BackpressureLevel::Full);
        assert_eq!(BackpressureLevel::from_fill(0, 0), BackpressureLevel::Full);
    }

    #[test]
    fn test_admission_by_priority() {
        for level in [BackpressureLevel::Normal, BackpressureLevel::Warn, BackpressureLevel::Throttle] {
            assert!(level.admits(Priority::Low));
            assert!(level.admits(Priority::High));
        }

        assert!(!BackpressureLevel::Critical.admits(Priority::Low));
        assert!(BackpressureLevel::Critical.admits(Priority::Normal));
        assert!(BackpressureLevel::Critical.admits(Priority::High));

        assert!(!BackpressureLevel::Full.admits(Priority::High));
    }

    #[test]
    fn test_level_ordering() {
        assert!(BackpressureLevel::Normal < BackpressureLevel::Warn);
        assert!(BackpressureLevel::Warn < BackpressureLevel::Throttle);
        assert!(BackpressureLevel::Throttle < BackpressureLevel::Critical);
        assert!(BackpressureLevel::Critical < BackpressureLevel::Full);
    }
}
