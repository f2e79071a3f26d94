//! XP and badge rules, evaluated at run finalization.

use salescoach_types::scenario::{BadgeRule, BadgeSpec, GameRules};
use salescoach_types::session::StatsState;

/// XP earned by a completed run: the final progress plus the completion bonus.
pub fn xp_for_run(progress: u32, rules: &GameRules) -> i64 {
    progress as i64 + rules.completion_bonus_xp
}

/// Badge specs whose rules the lifetime stats now satisfy.
///
/// Granting is idempotent at the store level, so specs the user already
/// holds are filtered out there, not here.
pub fn earned_badges<'a>(specs: &'a [BadgeSpec], stats: &StatsState) -> Vec<&'a BadgeSpec> {
    specs
        .iter()
        .filter(|spec| match spec.rule {
            BadgeRule::RunsCompleted { at_least } => stats.total_runs >= at_least,
            BadgeRule::ProgressReached { at_least } => stats.best_progress >= at_least,
            BadgeRule::ContextualTurns { at_least } => stats.total_contextual_turns >= at_least,
        })
        .collect()
}
