//! Pure progress and level math.

use salescoach_types::scenario::LevelThreshold;

/// Progress is a percentage; it never exceeds this.
pub const MAX_PROGRESS: u32 = 100;

/// The level for a lifetime XP total: the highest level whose threshold is
/// at or below the total. The table is validated at startup to be ascending
/// with level 1 at 0 XP, so every non-negative total maps to a level.
pub fn level_for(thresholds: &[LevelThreshold], total_xp: i64) -> i32 {
    thresholds
        .iter()
        .filter(|t| t.min_xp <= total_xp)
        .map(|t| t.level)
        .max()
        .unwrap_or(1)
}

/// Add points to a progress value, saturating at [`MAX_PROGRESS`].
pub fn apply_points(progress: u32, points: u32) -> u32 {
    progress.saturating_add(points).min(MAX_PROGRESS)
}
