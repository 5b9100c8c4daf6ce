//! Anthropic Messages API gateway.

use super::{
    CandidateKeyPoint, KptDelta, KptRating, LlmGateway, MergeGroup, MigrationDecision,
    ReflectionOutcome, ReflectionRequest, TagInference, TagRequest, extract_json,
    sanitize_response_for_error,
};
use crate::models::{KeyPoint, KeyPointName};
use crate::templates::{TemplateKind, TemplateStore, render};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token budgets per call kind.
const TAGGER_MAX_TOKENS: u32 = 1024;
const REFLECTION_MAX_TOKENS: u32 = 4096;
const MIGRATION_MAX_TOKENS: u32 = 512;

/// How many recent turns the tagger sees.
const TAGGER_HISTORY_WINDOW: usize = 12;

/// Pause between transport retries.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Gateway speaking the Anthropic Messages API.
pub struct AnthropicGateway {
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
    retries: u32,
    templates: TemplateStore,
}

impl AnthropicGateway {
    /// Creates a gateway.
    #[must_use]
    pub fn new(api_key: impl Into<String>, templates: TemplateStore) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-3-5-haiku-20241022".to_string(),
            timeout: Duration::from_secs(30),
            retries: 2,
            templates,
        }
    }

    /// Builds a gateway from resolved configuration, or `None` when no API
    /// key is available.
    #[must_use]
    pub fn from_config(config: &crate::TacitConfig) -> Option<Self> {
        let api_key = config.effective_api_key()?;
        Some(
            Self::new(api_key, TemplateStore::with_dir(&config.template_dir))
                .with_base_url(&config.llm.base_url)
                .with_model(&config.llm.model)
                .with_timeout(config.llm.timeout)
                .with_retries(config.llm.retries),
        )
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the per-request timeout ceiling.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the transport retry count.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sends one prompt, retrying transport failures within the budget.
    fn request(
        &self,
        operation: &'static str,
        prompt: &str,
        max_tokens: u32,
        budget: Duration,
    ) -> Result<String> {
        if budget.is_zero() {
            return Err(Error::Timeout {
                operation: operation.to_string(),
            });
        }

        let timeout = self.timeout.min(budget);
        let started = std::time::Instant::now();
        let mut last_err = None;

        for attempt in 0..=self.retries {
            let remaining = budget.checked_sub(started.elapsed()).unwrap_or_default();
            if remaining.is_zero() {
                return Err(last_err.unwrap_or(Error::Timeout {
                    operation: operation.to_string(),
                }));
            }

            match self.send_once(operation, prompt, max_tokens, timeout.min(remaining)) {
                Ok(text) => return Ok(text),
                Err(err) => {
                    tracing::warn!(
                        gateway = "anthropic",
                        operation,
                        attempt,
                        error = %err,
                        "LLM request failed"
                    );
                    last_err = Some(err);
                    if attempt < self.retries {
                        std::thread::sleep(RETRY_BACKOFF);
                    }
                },
            }
        }

        Err(last_err.unwrap_or(Error::Timeout {
            operation: operation.to_string(),
        }))
    }

    fn send_once(
        &self,
        operation: &'static str,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::LlmTransport {
                operation: operation.to_string(),
                cause: e.to_string(),
            })?;

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        operation: operation.to_string(),
                    }
                } else {
                    Error::LlmTransport {
                        operation: operation.to_string(),
                        cause: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::LlmTransport {
                operation: operation.to_string(),
                cause: format!("status {status}: {}", sanitize_response_for_error(&body)),
            });
        }

        let parsed: MessagesResponse = response.json().map_err(|e| Error::LlmSchema {
            operation: operation.to_string(),
            cause: e.to_string(),
        })?;

        parsed
            .content
            .iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text.clone())
            .ok_or_else(|| Error::LlmSchema {
                operation: operation.to_string(),
                cause: "no text content block in reply".to_string(),
            })
    }

    fn parse_payload<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        reply: &str,
    ) -> Result<T> {
        serde_json::from_str(extract_json(reply)).map_err(|e| Error::LlmSchema {
            operation: operation.to_string(),
            cause: format!("{e}; reply was: {}", sanitize_response_for_error(reply)),
        })
    }
}

impl LlmGateway for AnthropicGateway {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn infer_tags(&self, request: &TagRequest, budget: Duration) -> Result<TagInference> {
        let history: Vec<&crate::models::Turn> = request
            .recent_history
            .iter()
            .rev()
            .take(TAGGER_HISTORY_WINDOW)
            .rev()
            .collect();
        let conversation = serde_json::to_string_pretty(&history).unwrap_or_default();
        let existing = serde_json::to_string(&request.existing_tags).unwrap_or_default();

        let prompt = render(
            &self.templates.get(TemplateKind::Tagger),
            &[
                ("conversation", &conversation),
                ("prompt", &request.prompt),
                ("existing_tags", &existing),
                ("max_tags", &request.max_tags.to_string()),
            ],
        );

        let reply = self.request("infer_tags", &prompt, TAGGER_MAX_TOKENS, budget)?;
        let parsed: TaggerReply = Self::parse_payload("infer_tags", &reply)?;

        let (raw_tags, temperature, complexity) = match parsed {
            TaggerReply::Object {
                tags,
                temperature,
                complexity,
            } => (tags, temperature, complexity),
            // Older template revisions returned a bare tag array.
            TaggerReply::Bare(tags) => (tags, None, None),
        };

        let mut tags = crate::tags::normalize(&raw_tags);
        tags.truncate(request.max_tags);

        Ok(TagInference {
            tags,
            temperature: temperature.unwrap_or(0.5).clamp(0.0, 1.0),
            complexity: complexity.unwrap_or(0.0).clamp(0.0, 1.0),
        })
    }

    fn reflect(&self, request: &ReflectionRequest, budget: Duration) -> Result<ReflectionOutcome> {
        let trajectories = serde_json::to_string_pretty(&request.turns).unwrap_or_default();
        let stable: serde_json::Map<String, serde_json::Value> = request
            .playbook
            .stable()
            .map(|kp| {
                (
                    kp.name.as_str().to_string(),
                    serde_json::Value::String(kp.text()),
                )
            })
            .collect();
        let pending: serde_json::Map<String, serde_json::Value> = request
            .playbook
            .pending()
            .map(|kp| {
                (
                    kp.name.as_str().to_string(),
                    serde_json::Value::String(kp.text()),
                )
            })
            .collect();
        let existing_tags: Vec<String> = request.playbook.all_tags().into_iter().collect();

        let prompt = render(
            &self.templates.get(TemplateKind::Reflection),
            &[
                ("trajectories", &trajectories),
                (
                    "existing_playbook",
                    &serde_json::to_string_pretty(&stable).unwrap_or_default(),
                ),
                (
                    "pending_playbook",
                    &serde_json::to_string_pretty(&pending).unwrap_or_default(),
                ),
                (
                    "existing_tags",
                    &serde_json::to_string(&existing_tags).unwrap_or_default(),
                ),
            ],
        );

        let reply = self.request("reflect", &prompt, REFLECTION_MAX_TOKENS, budget)?;
        let parsed: ReflectionReply = Self::parse_payload("reflect", &reply)?;
        Ok(parsed.into_outcome())
    }

    fn migrate_to_when_do(&self, kpt: &KeyPoint, budget: Duration) -> Result<MigrationDecision> {
        let prompt = render(
            &self.templates.get(TemplateKind::Migration),
            &[("text", &kpt.text())],
        );

        let reply = self.request("migrate", &prompt, MIGRATION_MAX_TOKENS, budget)?;
        let parsed: MigrationReply = Self::parse_payload("migrate", &reply)?;

        Ok(MigrationDecision {
            when: parsed.when,
            action: parsed.action,
            confidence: parsed.confidence.clamp(0.0, 1.0),
        })
    }
}

/// Request to the Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

/// Tagger reply: either the documented object or a bare tag array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaggerReply {
    Object {
        #[serde(default)]
        tags: Vec<String>,
        temperature: Option<f64>,
        complexity: Option<f64>,
    },
    Bare(Vec<String>),
}

/// Reflection reply wire format.
#[derive(Debug, Deserialize)]
struct ReflectionReply {
    #[serde(default)]
    new_key_points: Vec<CandidateReply>,
    #[serde(default)]
    evaluations: Vec<EvaluationReply>,
    #[serde(default)]
    merges: Vec<MergeReply>,
    #[serde(default)]
    promotions: Vec<String>,
}

/// New key points may be bare strings or full objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CandidateReply {
    Text(String),
    Full {
        text: String,
        #[serde(default)]
        tags: Vec<String>,
        effect_rating: Option<f64>,
        risk_level: Option<f64>,
        innovation_level: Option<f64>,
    },
}

#[derive(Debug, Deserialize)]
struct EvaluationReply {
    name: String,
    rating: KptRating,
    #[serde(default)]
    add_tags: Vec<String>,
    #[serde(default)]
    rewrite: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeReply {
    #[serde(default)]
    members: Vec<String>,
    similarity: f64,
}

impl ReflectionReply {
    fn into_outcome(self) -> ReflectionOutcome {
        let new_key_points = self
            .new_key_points
            .into_iter()
            .map(|candidate| match candidate {
                CandidateReply::Text(text) => CandidateKeyPoint {
                    text,
                    tags: Vec::new(),
                    effect_rating: None,
                    risk_level: None,
                    innovation_level: None,
                },
                CandidateReply::Full {
                    text,
                    tags,
                    effect_rating,
                    risk_level,
                    innovation_level,
                } => CandidateKeyPoint {
                    text,
                    tags,
                    effect_rating,
                    risk_level,
                    innovation_level,
                },
            })
            .collect();

        let deltas = self
            .evaluations
            .into_iter()
            .map(|eval| KptDelta {
                name: KeyPointName::new(eval.name),
                rating: eval.rating,
                tag_additions: eval.add_tags,
                text_rewrite: eval.rewrite,
            })
            .collect();

        let merges = self
            .merges
            .into_iter()
            .map(|merge| MergeGroup {
                members: merge.members.into_iter().map(KeyPointName::new).collect(),
                similarity: merge.similarity,
            })
            .collect();

        ReflectionOutcome {
            new_key_points,
            deltas,
            merges,
            promotions: self.promotions.into_iter().map(KeyPointName::new).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MigrationReply {
    when: String,
    #[serde(rename = "do")]
    action: String,
    confidence: f64,
}
