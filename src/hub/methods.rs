//! Typed hub methods.
//!
//! Each method validates its arguments locally, invokes a fixed hub method
//! through [`HubClient::invoke`] and decodes the result.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::client::HubClient;
use super::context::CallContext;
use super::decode::decode_result;
use super::error::HubError;
use crate::models::{
    AthenaChallengeBundle, BaseQuest, CacheResult, ChallengeBundleSchedule, ServiceStatus,
};

pub const GET_SERVICE_STATUS: &str = "GetServiceStatus";
pub const GET_DAILY_QUESTS: &str = "GetDailyQuests";
pub const GET_DAILY_QUEST: &str = "GetDailyQuest";
pub const GET_CHALLENGE_BUNDLES: &str = "GetChallengeBundles";
pub const GET_CHALLENGE_BUNDLE: &str = "GetChallengeBundle";
pub const GET_CHALLENGE_BUNDLE_SCHEDULES: &str = "GetChallengeBundleSchedules";
pub const CLEAR_CACHE: &str = "ClearCache";
pub const REFRESH_CACHE: &str = "RefreshCache";

impl HubClient {
    /// Invoke `method` and decode its result into `T`.
    ///
    /// # Errors
    ///
    /// Any error from [`invoke`](Self::invoke), or `HubError::Decode` if the
    /// result does not match `T`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let quests: BTreeMap<String, BaseQuest> =
    ///     client.call(&ctx, "GetDailyQuests", Vec::new()).await?;
    /// ```
    pub async fn call<T>(
        &self,
        ctx: &CallContext,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, HubError>
    where
        T: DeserializeOwned,
    {
        let raw = self.invoke(ctx, method, args).await?;
        decode_result(&raw).map_err(|source| HubError::Decode {
            method: method.to_string(),
            source,
        })
    }

    pub async fn get_service_status(&self, ctx: &CallContext) -> Result<ServiceStatus, HubError> {
        self.call(ctx, GET_SERVICE_STATUS, Vec::new()).await
    }

    /// All daily quests, keyed by quest ID.
    pub async fn get_daily_quests(
        &self,
        ctx: &CallContext,
    ) -> Result<BTreeMap<String, BaseQuest>, HubError> {
        self.call(ctx, GET_DAILY_QUESTS, Vec::new()).await
    }

    /// # Errors
    ///
    /// Returns `HubError::InvalidQuestId` for an empty ID without contacting the hub.
    pub async fn get_daily_quest(
        &self,
        ctx: &CallContext,
        quest_id: &str,
    ) -> Result<BaseQuest, HubError> {
        if quest_id.is_empty() {
            return Err(HubError::InvalidQuestId);
        }
        self.call(ctx, GET_DAILY_QUEST, vec![Value::from(quest_id)])
            .await
    }

    pub async fn get_challenge_bundles(
        &self,
        ctx: &CallContext,
    ) -> Result<Vec<AthenaChallengeBundle>, HubError> {
        self.call(ctx, GET_CHALLENGE_BUNDLES, Vec::new()).await
    }

    /// # Errors
    ///
    /// Returns `HubError::InvalidTemplateId` for an empty ID without contacting the hub.
    pub async fn get_challenge_bundle(
        &self,
        ctx: &CallContext,
        template_id: &str,
    ) -> Result<AthenaChallengeBundle, HubError> {
        if template_id.is_empty() {
            return Err(HubError::InvalidTemplateId);
        }
        self.call(ctx, GET_CHALLENGE_BUNDLE, vec![Value::from(template_id)])
            .await
    }

    pub async fn get_challenge_bundle_schedules(
        &self,
        ctx: &CallContext,
    ) -> Result<Vec<ChallengeBundleSchedule>, HubError> {
        self.call(ctx, GET_CHALLENGE_BUNDLE_SCHEDULES, Vec::new())
            .await
    }

    pub async fn clear_cache(&self, ctx: &CallContext) -> Result<CacheResult, HubError> {
        self.call(ctx, CLEAR_CACHE, Vec::new()).await
    }

    /// Ask the hub to rebuild its cache. The hub announces completion with a
    /// `Ready` push carrying `refreshed: true`.
    pub async fn refresh_cache(&self, ctx: &CallContext) -> Result<(), HubError> {
        self.invoke(ctx, REFRESH_CACHE, Vec::new()).await?;
        Ok(())
    }
}
