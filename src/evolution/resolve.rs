//! Target-capsule fallback chain.
//!
//! Resolvers are tried in order; the first that yields a non-empty id wins.

use crate::model::{BattleRun, CapsuleRole};

/// Looks up a capsule id for `role` in one place on the run record.
pub type Resolver = fn(&BattleRun, CapsuleRole) -> Option<&str>;

/// Top-level id, then `meta`, then the id recorded on round 1.
pub const CHAIN: [(&str, Resolver); 3] = [
    ("run", from_run),
    ("meta", from_meta),
    ("round_1", from_first_round),
];

fn from_run(run: &BattleRun, role: CapsuleRole) -> Option<&str> {
    run.capsule_id(role)
}

fn from_meta(run: &BattleRun, role: CapsuleRole) -> Option<&str> {
    run.meta.capsule_id(role)
}

fn from_first_round(run: &BattleRun, role: CapsuleRole) -> Option<&str> {
    run.rounds
        .iter()
        .find(|r| r.round == 1)
        .and_then(|r| r.capsule_id(role))
}

/// Resolves the capsule id for `role`, with the name of the source used.
#[must_use]
pub fn resolve_target(run: &BattleRun, role: CapsuleRole) -> Option<(&'static str, String)> {
    CHAIN.iter().find_map(|(source, resolver)| {
        resolver(run, role)
            .filter(|id| !id.trim().is_empty())
            .map(|id| (*source, id.to_owned()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoundEntry, RunMeta};
    use chrono::Utc;

    fn run() -> BattleRun {
        BattleRun::queued("r1".into(), RunMeta::default())
    }

    fn first_round(defender_id: Option<&str>) -> RoundEntry {
        RoundEntry {
            round: 1,
            timestamp: Utc::now(),
            attacker_output: None,
            defender_output: None,
            attacker_prompt: None,
            defender_prompt: None,
            breach: false,
            attacker_model: None,
            defender_model: None,
            attacker_id: Some("att-r1".into()),
            defender_id: defender_id.map(str::to_owned),
            degraded: false,
        }
    }

    #[test]
    fn top_level_wins() {
        let mut run = run();
        run.defender_id = Some("top".into());
        run.meta.defender_id = Some("meta".into());
        assert_eq!(
            resolve_target(&run, CapsuleRole::Defense),
            Some(("run", "top".into()))
        );
    }

    #[test]
    fn meta_is_second() {
        let mut run = run();
        run.meta.defender_id = Some("cap-7".into());
        assert_eq!(
            resolve_target(&run, CapsuleRole::Defense),
            Some(("meta", "cap-7".into()))
        );
    }

    #[test]
    fn first_round_is_last_resort() {
        let mut run = run();
        run.push_round(first_round(Some("def-r1"))).unwrap();
        assert_eq!(
            resolve_target(&run, CapsuleRole::Defense),
            Some(("round_1", "def-r1".into()))
        );
        assert_eq!(
            resolve_target(&run, CapsuleRole::Attack),
            Some(("round_1", "att-r1".into()))
        );
    }

    #[test]
    fn blank_ids_are_skipped() {
        let mut run = run();
        run.defender_id = Some(String::new());
        run.meta.defender_id = Some("  ".into());
        run.push_round(first_round(None)).unwrap();
        assert_eq!(resolve_target(&run, CapsuleRole::Defense), None);
    }
}
