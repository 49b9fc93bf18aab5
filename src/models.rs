//! Data models for the quest hub.
//!
//! These structs mirror the payloads the hub returns over the RPC channel.
//! Field names are camelCase on the wire. The hub omits zero-valued optional
//! fields and sometimes sends `null` for empty collections, so every record
//! decodes missing or null fields to their zero value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Decode `null` as the type's default instead of failing.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// Result of `GetServiceStatus`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceStatus {
    pub initialized: bool,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of the server-pushed `Ready` notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadyStatus {
    pub initialized: bool,
    pub version: String,
    /// Set when the hub finished a cache refresh rather than a cold start.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub refreshed: bool,
}

/// Result of `ClearCache`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheResult {
    pub success: bool,
    pub version: String,
    pub keys_cleared: i64,
    #[serde(
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub patterns: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// A daily quest definition.
///
/// Objectives and rewards are free-form maps keyed by backend name; the hub
/// does not fix their value shapes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseQuest {
    #[serde(deserialize_with = "null_as_default")]
    pub objectives: BTreeMap<String, serde_json::Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub rewards: BTreeMap<String, serde_json::Value>,
    pub count: i64,
}

/// A challenge bundle as returned by `GetChallengeBundle(s)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AthenaChallengeBundle {
    pub template_id: String,
    pub challenge_bundle_schedule: String,
    #[serde(deserialize_with = "null_as_default")]
    pub objects: Vec<ChallengeBundleObject>,
    pub amount: i64,
    pub rarity: String,
    #[serde(deserialize_with = "null_as_default")]
    pub completion_rewards: Vec<BundleCompletionReward>,
}

/// One quest inside a challenge bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChallengeBundleObject {
    pub quest_definition: String,
    pub rarity: String,
    #[serde(deserialize_with = "null_as_default")]
    pub rewards: Vec<ChallengeBundleReward>,
    #[serde(deserialize_with = "null_as_default")]
    pub objectives: Vec<ChallengeBundleObjective>,
    #[serde(deserialize_with = "null_as_default")]
    pub options: ChallengeBundleOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChallengeBundleReward {
    pub template_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChallengeBundleObjective {
    pub backend_name: String,
    pub count: i64,
    /// Stage index for multi-stage quests; omitted for single-stage ones.
    #[serde(skip_serializing_if = "is_zero")]
    pub stage: i64,
}

/// Grant and progression flags for a bundle quest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChallengeBundleOptions {
    pub is_battle_pass: bool,
    pub is_overtime: bool,
    pub grant_with_pass: bool,
    pub progress_on_battle_pass_purchased: bool,
    pub athena_season_progress: bool,
    pub battle_pass_progress: bool,
    #[serde(rename = "gainAthenaSeasonXP")]
    pub gain_athena_season_xp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BundleCompletionReward {
    pub template_id: String,
    pub quantity: i64,
}

/// Maps a bundle schedule to the quest bundle it unlocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChallengeBundleSchedule {
    pub template_id: String,
    pub quest_bundle: String,
}
