use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::time;
use tracing::{error, info};

use crate::{
    cache::{CachePolicy, MemoCache},
    error::{Error, Result},
    settings::SearchSettings,
};

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
const KNOWLEDGE_MANAGER: &str = "KNOWLEDGE_MANAGER";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub(crate) modules: Vec<SearchModule>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchModule {
    #[serde(default)]
    pub(crate) source: String,
    #[serde(default)]
    pub(crate) vertical_config_id: Option<String>,
    #[serde(default)]
    pub(crate) results: Vec<SearchResult>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub(crate) struct SearchResult {
    #[serde(default)]
    pub(crate) data: Option<EntityData>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub(crate) struct EntityData {
    #[serde(default, deserialize_with = "string_or_number")]
    pub(crate) uid: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) name: Option<String>,
}

/// Entity identifiers arrive either as JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// The hosted search API, reduced to the one call the dashboard makes.
#[async_trait]
pub(crate) trait SearchApi: Send + Sync {
    async fn search(&self, term: &str, experience_key: &str) -> Result<SearchResponse>;
}

/// Memoized, time-bounded access to the search API.
pub(crate) struct SearchGate {
    api: Arc<dyn SearchApi>,
    cache: MemoCache<(String, String), SearchResponse>,
    timeout: Duration,
}

impl SearchGate {
    pub(crate) fn new(api: Arc<dyn SearchApi>, policy: CachePolicy, timeout: Duration) -> Self {
        Self {
            api,
            cache: MemoCache::new(policy),
            timeout,
        }
    }

    /// Runs `term` against the experience, or returns the memoized response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SearchApi`] on transport or API failures and
    /// [`Error::Timeout`] if the API does not answer in time.
    pub(crate) async fn search(
        &self,
        term: &str,
        experience_key: &str,
    ) -> Result<Arc<SearchResponse>> {
        let api = Arc::clone(&self.api);
        let key = (term.to_string(), experience_key.to_string());
        let (term, experience_key) = key.clone();
        let timeout = self.timeout;

        self.cache
            .get_or_compute(key, async move {
                info!(%term, %experience_key, "Running test search");
                let result =
                    match time::timeout(timeout, api.search(&term, &experience_key)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout {
                            operation: "search API request",
                            after: timeout,
                        }),
                    };
                if let Err(e) = &result {
                    error!(%term, "Problem while calling search API. {e}");
                }
                result
            })
            .await
    }
}

fn knowledge_modules(response: &SearchResponse) -> impl Iterator<Item = &SearchModule> {
    response
        .modules
        .iter()
        .filter(|m| m.source == KNOWLEDGE_MANAGER)
}

/// Maps entity uid to display name across every knowledge-base result.
/// Entities missing either field are skipped.
pub(crate) fn entity_names(response: &SearchResponse) -> HashMap<String, String> {
    knowledge_modules(response)
        .flat_map(|m| &m.results)
        .filter_map(|r| r.data.as_ref())
        .filter_map(|d| Some((d.uid.clone()?, d.name.clone()?)))
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct EntityCard {
    pub(crate) id: String,
    pub(crate) name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct VerticalPreview {
    pub(crate) vertical: String,
    pub(crate) cards: Vec<EntityCard>,
}

/// The first `limit` entities of each knowledge-base vertical, in the
/// order the API ranked the verticals.
pub(crate) fn vertical_previews(response: &SearchResponse, limit: usize) -> Vec<VerticalPreview> {
    knowledge_modules(response)
        .map(|m| VerticalPreview {
            vertical: m.vertical_config_id.clone().unwrap_or_default(),
            cards: m
                .results
                .iter()
                .filter_map(|r| r.data.as_ref())
                .take(limit)
                .map(|d| EntityCard {
                    id: d.id.clone().unwrap_or_default(),
                    name: d.name.clone().unwrap_or_default(),
                })
                .collect(),
        })
        .collect()
}

/// Client for the hosted search query endpoint.
pub(crate) struct AnswersClient {
    client: Client,
    settings: SearchSettings,
}

#[derive(Deserialize)]
struct Envelope {
    response: Option<SearchResponse>,
    #[serde(default)]
    meta: Option<Value>,
}

impl AnswersClient {
    pub(crate) fn new(settings: SearchSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("cannot build search API HTTP client")?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl SearchApi for AnswersClient {
    async fn search(&self, term: &str, experience_key: &str) -> Result<SearchResponse> {
        let url = format!(
            "{}/v2/accounts/me/answers/query",
            self.settings.endpoint.trim_end_matches('/')
        );
        let response = self
            .client
            .get(url)
            .query(&[
                ("input", term),
                ("experienceKey", experience_key),
                ("api_key", self.settings.api_key.as_str()),
                ("v", self.settings.version_date.as_str()),
                ("version", self.settings.config_label.as_str()),
                ("locale", self.settings.locale.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::SearchApi(e.to_string()))?;

        let status = response.status();
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| Error::SearchApi(format!("unreadable response ({status}): {e}")))?;
        if !status.is_success() {
            let detail = envelope
                .meta
                .map_or_else(|| status.to_string(), |meta| meta.to_string());
            return Err(Error::SearchApi(detail));
        }
        envelope
            .response
            .ok_or_else(|| Error::SearchApi("response body has no `response` field".to_string()))
    }
}
