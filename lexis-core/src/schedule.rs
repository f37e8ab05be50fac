//! Spaced-repetition interval table.
//!
//! Each repetition level maps to a fixed wait before the card is due again.
//! Intervals roughly double per level and top out around 682 days.

use crate::Timestamp;
use chrono::Duration;

/// Highest repetition level in the interval table.
pub const MAX_LEVEL: i32 = 10;

/// View count at which a card is considered mastered and leaves scheduling.
pub const MASTERY_THRESHOLD: i32 = 20;

/// Initial view count for a card the learner already knows.
pub const KNOWN_INITIAL_VIEWS: i32 = MASTERY_THRESHOLD;

/// Initial view count for a freshly introduced card.
pub const NEW_CARD_VIEWS: i32 = 1;

/// Wait in minutes per level, index 0 is level 1.
const INTERVAL_MINUTES: [i64; MAX_LEVEL as usize] = [
    20, 40, 120, 240, 960, 3_840, 15_360, 61_440, 245_760, 983_040,
];

/// Interval for a level, clamping out-of-range levels into `1..=MAX_LEVEL`.
pub fn interval_minutes(level: i32) -> i64 {
    let level = level.clamp(1, MAX_LEVEL);
    INTERVAL_MINUTES[(level - 1) as usize]
}

/// Level the next wait is taken from.
///
/// A pass moves one level up from `count`. A fail drops three levels, never
/// below level 1.
pub fn next_level(count: i32, passed: bool) -> i32 {
    let level = if passed {
        count.saturating_add(1)
    } else {
        count.saturating_sub(3)
    };
    level.clamp(1, MAX_LEVEL)
}

/// Next time a card reviewed at `last_view` with `count` prior views is due.
pub fn next_review_time(last_view: Timestamp, count: i32, passed: bool) -> Timestamp {
    last_view + Duration::minutes(interval_minutes(next_level(count, passed)))
}
