//! Access-aware chat orchestration.
//!
//! A chat request runs as a two-stage pipeline:
//!
//! 1. **Discovery**: retrieve the top `discovery_top_k` chunks for the
//!    prompt with no restriction, keep those scoring above
//!    `score_threshold`, and collect their document ids in first-seen order.
//! 2. **Partition**: split those ids into readable and hidden for the
//!    requesting user.
//! 3. **Contact hint**: if anything is hidden, name a user at the level of
//!    the first hidden document so the requester knows whom to ask.
//! 4. **Context**: retrieve `context_top_k` chunks restricted to the
//!    readable ids and hand them, the system prompt and the user prompt to
//!    the language model.
//!
//! Hidden documents therefore shape the hint but never reach the model.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::access::{self, AccessPolicy};
use crate::config::RetrievalConfig;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::{Chunk, ContextFilter, User};
use crate::retrieval::ChunksService;

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub prompt: String,
    /// Replaces the default system prompt (and its contact hint) when set.
    pub system_prompt: Option<String>,
    /// Further narrows the readable documents; it can never widen them.
    pub context_filter: Option<ContextFilter>,
    pub include_sources: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    pub sources: Option<Vec<Chunk>>,
}

pub struct ChatService {
    pool: SqlitePool,
    chunks: Arc<ChunksService>,
    llm: Arc<dyn LlmProvider>,
    retrieval: RetrievalConfig,
    policy: AccessPolicy,
    default_system_prompt: String,
}

impl ChatService {
    pub fn new(
        pool: SqlitePool,
        chunks: Arc<ChunksService>,
        llm: Arc<dyn LlmProvider>,
        retrieval: RetrievalConfig,
        policy: AccessPolicy,
        default_system_prompt: String,
    ) -> Self {
        Self {
            pool,
            chunks,
            llm,
            retrieval,
            policy,
            default_system_prompt,
        }
    }

    /// Document ids relevant to `prompt` regardless of who asks, best first.
    pub async fn discover(&self, prompt: &str) -> Result<Vec<String>> {
        let candidates = self
            .chunks
            .retrieve_relevant(prompt, self.retrieval.discovery_top_k, None)
            .await?;
        let threshold = self.retrieval.score_threshold;
        Ok(unique_doc_ids(
            candidates.iter().filter(|c| c.score > threshold),
        ))
    }

    /// The sentence pointing the user at someone who can read the first
    /// hidden document, or `None` if no such person can be named.
    pub async fn contact_hint(&self, hidden: &[String]) -> Result<Option<String>> {
        let Some(first) = hidden.first() else {
            return Ok(None);
        };
        let Some(level) = access::access_level_of(&self.pool, first).await? else {
            return Ok(None);
        };
        let Some(username) = access::username_at_level(&self.pool, level).await? else {
            tracing::debug!(level, "no user holds the level of a hidden document");
            return Ok(None);
        };
        Ok(Some(contact_sentence(&username, level)))
    }

    pub async fn chat(&self, user: &User, request: ChatRequest) -> Result<ChatOutcome> {
        let discovered = self.discover(&request.prompt).await?;
        let partition = access::partition(&self.pool, user, &discovered, self.policy).await?;
        tracing::debug!(
            username = %user.username,
            accessible = partition.accessible.len(),
            hidden = partition.inaccessible.len(),
            "chat discovery"
        );

        let system = match requested_prompt(request.system_prompt.as_deref()) {
            Some(custom) => custom.to_string(),
            None => {
                let hint = self.contact_hint(&partition.inaccessible).await?;
                augment_system_prompt(&self.default_system_prompt, hint.as_deref())
            }
        };

        let readable = narrow(partition.accessible, request.context_filter.as_ref());
        let filter = ContextFilter::only(readable);
        let context = self
            .chunks
            .retrieve_relevant(&request.prompt, self.retrieval.context_top_k, Some(&filter))
            .await?;

        let messages = build_messages(&system, &request.prompt, &context);
        let response = self.llm.complete(&messages).await?;

        Ok(ChatOutcome {
            response,
            sources: request.include_sources.then_some(context),
        })
    }
}

/// Unique document ids of `chunks`, in first-seen order.
pub fn unique_doc_ids<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for chunk in chunks {
        if !ids.contains(&chunk.document.doc_id) {
            ids.push(chunk.document.doc_id.clone());
        }
    }
    ids
}

pub fn contact_sentence(username: &str, level: i64) -> String {
    format!(
        "Additionally, clearly state that the user can ask {} who has permission {} for help \
         if the information is not within the current context.",
        username, level
    )
}

/// A request's own system prompt, if it gave one. Only the empty string
/// counts as absent; whitespace is sent to the model as is.
fn requested_prompt(system_prompt: Option<&str>) -> Option<&str> {
    system_prompt.filter(|p| !p.is_empty())
}

fn augment_system_prompt(base: &str, hint: Option<&str>) -> String {
    match hint {
        Some(hint) => format!("{} {}", base.trim_end(), hint),
        None => base.to_string(),
    }
}

/// Intersect the readable ids with a caller-supplied filter, keeping the
/// readable order.
fn narrow(readable: Vec<String>, requested: Option<&ContextFilter>) -> Vec<String> {
    match requested {
        Some(filter) => readable.into_iter().filter(|id| filter.allows(id)).collect(),
        None => readable,
    }
}

/// System message (prompt plus retrieved context) followed by the user's
/// prompt.
pub fn build_messages(system_prompt: &str, prompt: &str, context: &[Chunk]) -> Vec<ChatMessage> {
    let context_str = context
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let system = format!(
        "{}\nContext information is below.\n--------------------\n{}\n--------------------\n",
        system_prompt, context_str
    );
    vec![ChatMessage::system(system), ChatMessage::user(prompt)]
}
