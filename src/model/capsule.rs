//! Capsule records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Port a capsule listens on when no explicit service URL is configured.
pub const DEFAULT_CAPSULE_PORT: u16 = 9000;

/// Which side of a battle a capsule plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapsuleRole {
    /// Produces adversarial prompts.
    Attack,
    /// Answers adversarial prompts and must hold its policy.
    Defense,
}

impl CapsuleRole {
    /// Wire name (`attack` / `defense`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attack => "attack",
            Self::Defense => "defense",
        }
    }
}

impl fmt::Display for CapsuleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_version() -> String {
    "v1".to_owned()
}

const fn default_enabled() -> bool {
    true
}

/// Registration payload for a capsule (everything but server-assigned fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCapsule {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub role: CapsuleRole,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A registered, network-addressable inference agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub id: String,
    pub name: String,
    pub version: String,
    pub role: CapsuleRole,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub enabled: bool,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Capsule this one was derived from by mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Capsule {
    /// Builds a record from a registration payload.
    #[must_use]
    pub fn from_new(id: String, new: NewCapsule, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            version: new.version,
            role: new.role,
            image: new.image,
            entrypoint: new.entrypoint,
            env: new.env,
            config: new.config,
            tags: new.tags,
            enabled: new.enabled,
            owner: new.owner,
            description: new.description,
            created_at: now,
            updated_at: now,
            parent_id: None,
        }
    }

    /// Resolves the endpoint this capsule serves tool calls on.
    ///
    /// `config.service_url`, then `env.SERVICE_URL`, then
    /// `http://{name}:9000`.
    #[must_use]
    pub fn service_url(&self) -> String {
        if let Some(Value::String(url)) = self.config.get("service_url") {
            return url.clone();
        }
        if let Some(url) = self.env.get("SERVICE_URL") {
            return url.clone();
        }
        format!("http://{}:{DEFAULT_CAPSULE_PORT}", self.name)
    }
}
