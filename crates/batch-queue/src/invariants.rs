//! Debug assertion macros for queue invariants.
//!
//! Only active in debug builds (`debug_assert!`), so release builds pay
//! nothing for them.

// =============================================================================
// Bounded Count
// =============================================================================

/// Assert that the number of claimed positions never exceeds capacity.
///
/// **Invariant**: `0 ≤ (tail - head) ≤ capacity`
///
/// Used in: `Consumer::drain_into()` after a drain pass
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity as u64,
            "bounded count violated: {} claimed positions exceed capacity {}",
            $count,
            $capacity
        )
    };
}

// =============================================================================
// Monotonic Cursors
// =============================================================================

/// Assert that a cursor only moves forward.
///
/// **Invariant**: `new_value ≥ old_value`
///
/// Used in: `Consumer::drain_into()` when publishing the new head
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "monotonic progress violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// Published Read
// =============================================================================

/// Assert that the consumer only reads a slot whose stamp marks it as
/// published for the current head position.
///
/// **Invariant**: `slot.value is initialized ⟺ slot.stamp == 2 * pos + 1`
///
/// Used in: `Consumer::drain_into()` before `assume_init_read()`
macro_rules! debug_assert_published_read {
    ($stamp:expr, $pos:expr) => {
        debug_assert!(
            $stamp == $pos * 2 + 1,
            "published read violated: slot stamp {} does not mark position {} as full",
            $stamp,
            $pos
        )
    };
}

// =============================================================================
// Counter Conservation
// =============================================================================

/// Assert that the consumer never drains more records than were accepted.
///
/// **Invariant**: `drained ≤ enqueued`
///
/// Used in: `QueueMetrics::snapshot()`
macro_rules! debug_assert_drained_le_enqueued {
    ($drained:expr, $enqueued:expr) => {
        debug_assert!(
            $drained <= $enqueued,
            "conservation violated: drained {} records but only {} were accepted",
            $drained,
            $enqueued
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_drained_le_enqueued;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_published_read;
