//! Mutation operators that derive a new capsule from an existing one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::model::{Capsule, CapsuleRole};

/// Lowers sampling temperature, or turns on strict mode.
pub const DEFENSE_HARDEN: &str = "defense_harden";

/// Raises sampling temperature.
pub const ATTACK_EXPLORE: &str = "attack_explore";

const TAG_MUTANT: &str = "mutant";
const TEMP_FLOOR: f64 = 0.1;
const TEMP_CEILING: f64 = 2.0;
const TEMP_STEP: f64 = 0.1;

/// A request to derive a mutated capsule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub strategy: String,
    /// When `None` the registry picks the oldest enabled capsule of
    /// `target_role`.
    pub target_capsule_id: Option<String>,
    pub target_role: CapsuleRole,
    pub reason: String,
}

/// Builds the derived capsule. The source is left untouched.
#[must_use]
pub fn derive_mutant(
    source: &Capsule,
    strategy: &str,
    reason: &str,
    id: String,
    now: DateTime<Utc>,
) -> Capsule {
    let mut tags = source.tags.clone();
    if !tags.iter().any(|t| t == TAG_MUTANT) {
        tags.push(TAG_MUTANT.to_owned());
    }

    let mut config = source.config.clone();
    mutate_config(&mut config, strategy);

    let description = format!(
        "{} (mutated: {reason})",
        source.description.as_deref().unwrap_or_default()
    )
    .trim_start()
    .to_owned();

    Capsule {
        id,
        name: format!("{}-mutant", source.name),
        version: bump_version(&source.version),
        role: source.role,
        image: source.image.clone(),
        entrypoint: source.entrypoint.clone(),
        env: source.env.clone(),
        config,
        tags,
        enabled: true,
        owner: source.owner.clone(),
        description: Some(description),
        created_at: now,
        updated_at: now,
        parent_id: Some(source.id.clone()),
    }
}

/// Applies `strategy` to a capsule config in place.
pub fn mutate_config(config: &mut Map<String, Value>, strategy: &str) {
    match strategy {
        DEFENSE_HARDEN => match config.get("temp") {
            Some(temp) => {
                let next =
                    temp_value(temp).map_or(0.5, |t| round3((t - TEMP_STEP).max(TEMP_FLOOR)));
                config.insert("temp".into(), float(next));
            }
            None => {
                config.insert("strict".into(), Value::Bool(true));
            }
        },
        ATTACK_EXPLORE => {
            let next = match config.get("temp") {
                Some(temp) => {
                    temp_value(temp).map_or(0.9, |t| round3((t + TEMP_STEP).min(TEMP_CEILING)))
                }
                None => 0.9,
            };
            config.insert("temp".into(), float(next));
        }
        _ => {
            let count = config.get("mutations").and_then(Value::as_u64).unwrap_or(0);
            config.insert("mutations".into(), Value::from(count.saturating_add(1)));
        }
    }
}

/// Bumps the last numeric component of a `vN` / `vN.M` version.
///
/// Anything else gets `.m1` appended.
#[must_use]
pub fn bump_version(version: &str) -> String {
    let Some(body) = version.strip_prefix('v') else {
        return format!("{version}.m1");
    };
    let (head, last) = match body.rsplit_once('.') {
        Some((head, last)) => (Some(head), last),
        None => (None, body),
    };
    let head_ok = head.is_none_or(|h| h.split('.').all(|p| p.parse::<u64>().is_ok()));
    match last.parse::<u64>().ok().and_then(|n| n.checked_add(1)) {
        Some(next) if head_ok => match head {
            Some(head) => format!("v{head}.{next}"),
            None => format!("v{next}"),
        },
        _ => format!("{version}.m1"),
    }
}

/// A numeric `temp`, also when it was stored as a string.
fn temp_value(temp: &Value) -> Option<f64> {
    temp.as_f64()
        .or_else(|| temp.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|t: &f64| t.is_finite())
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewCapsule;
    use serde_json::json;

    fn cfg(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn defense_harden_lowers_temp_with_floor() {
        let mut c = cfg(json!({"temp": 0.7}));
        mutate_config(&mut c, DEFENSE_HARDEN);
        assert_eq!(c["temp"], json!(0.6));

        let mut c = cfg(json!({"temp": 0.15}));
        mutate_config(&mut c, DEFENSE_HARDEN);
        assert_eq!(c["temp"], json!(0.1));

        let mut c = cfg(json!({"temp": "hot"}));
        mutate_config(&mut c, DEFENSE_HARDEN);
        assert_eq!(c["temp"], json!(0.5));
    }

    #[test]
    fn numeric_string_temp_is_parsed() {
        let mut c = cfg(json!({"temp": "0.7"}));
        mutate_config(&mut c, DEFENSE_HARDEN);
        assert_eq!(c["temp"], json!(0.6));

        let mut c = cfg(json!({"temp": " 1.2 "}));
        mutate_config(&mut c, ATTACK_EXPLORE);
        assert_eq!(c["temp"], json!(1.3));

        let mut c = cfg(json!({"temp": "NaN"}));
        mutate_config(&mut c, ATTACK_EXPLORE);
        assert_eq!(c["temp"], json!(0.9));
    }

    #[test]
    fn defense_harden_without_temp_sets_strict() {
        let mut c = cfg(json!({"service_url": "http://d:9000"}));
        mutate_config(&mut c, DEFENSE_HARDEN);
        assert_eq!(c["strict"], json!(true));
        assert!(!c.contains_key("temp"));
    }

    #[test]
    fn attack_explore_raises_temp_with_ceiling() {
        let mut c = cfg(json!({"temp": 0.7}));
        mutate_config(&mut c, ATTACK_EXPLORE);
        assert_eq!(c["temp"], json!(0.8));

        let mut c = cfg(json!({"temp": 1.95}));
        mutate_config(&mut c, ATTACK_EXPLORE);
        assert_eq!(c["temp"], json!(2.0));

        let mut c = cfg(json!({}));
        mutate_config(&mut c, ATTACK_EXPLORE);
        assert_eq!(c["temp"], json!(0.9));
    }

    #[test]
    fn unknown_strategy_counts_mutations() {
        let mut c = cfg(json!({"mutations": 2}));
        mutate_config(&mut c, "shuffle");
        assert_eq!(c["mutations"], json!(3));

        let mut c = cfg(json!({}));
        mutate_config(&mut c, "shuffle");
        assert_eq!(c["mutations"], json!(1));

        let mut c = cfg(json!({"mutations": u64::MAX}));
        mutate_config(&mut c, "shuffle");
        assert_eq!(c["mutations"], json!(u64::MAX));
    }

    #[test]
    fn version_bumps() {
        assert_eq!(bump_version("v1"), "v2");
        assert_eq!(bump_version("v1.4"), "v1.5");
        assert_eq!(bump_version("v2.0.9"), "v2.0.10");
        assert_eq!(bump_version("latest"), "latest.m1");
        assert_eq!(bump_version("v1.beta"), "v1.beta.m1");
    }

    #[test]
    fn version_at_u64_max_falls_back_to_suffix() {
        assert_eq!(bump_version("v18446744073709551615"), "v18446744073709551615.m1");
        assert_eq!(bump_version("v3.18446744073709551615"), "v3.18446744073709551615.m1");
        assert_eq!(bump_version("v18446744073709551614"), "v18446744073709551615");
    }

    #[test]
    fn derive_mutant_links_to_parent() {
        let source = Capsule::from_new(
            "src".into(),
            NewCapsule {
                name: "guard".into(),
                version: "v1".into(),
                role: CapsuleRole::Defense,
                image: "img".into(),
                entrypoint: None,
                env: Default::default(),
                config: cfg(json!({"temp": 0.5})),
                tags: vec!["mutant".into()],
                enabled: false,
                owner: Some("team".into()),
                description: Some("baseline".into()),
            },
            Utc::now(),
        );
        let mutant = derive_mutant(&source, DEFENSE_HARDEN, "run r1", "new".into(), Utc::now());

        assert_eq!(mutant.id, "new");
        assert_eq!(mutant.name, "guard-mutant");
        assert_eq!(mutant.version, "v2");
        assert_eq!(mutant.parent_id.as_deref(), Some("src"));
        assert_eq!(mutant.tags, vec!["mutant".to_owned()]);
        assert!(mutant.enabled);
        assert_eq!(mutant.description.as_deref(), Some("baseline (mutated: run r1)"));
        assert_eq!(mutant.config["temp"], json!(0.4));
        assert_eq!(source.config["temp"], json!(0.5));
    }
}
