use std::sync::{Arc, LazyLock};
use std::time::Duration;

use confidant_common::Result;
use confidant_config::MemoryConfig;
use confidant_db::{FactInsert, MemoryFact, ProfileStore, VectorIndex, VectorRecord};
use regex::Regex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::chains::{EmbeddingChain, TextChain};
use crate::fallback::{AttemptFailure, FailureReason, FallbackOutcome};
use crate::providers::{EmbeddingRequest, LlmRequest};

pub use confidant_db::normalize_fact;

/// Returned by the extraction model when a message holds nothing worth keeping.
pub const NO_DATA: &str = "NO_DATA";

/// First-person disclosures and explicit save requests, in English and Hinglish.
const TRIGGER_PHRASES: &[&str] = &[
    "my name is",
    "i live in",
    "i like",
    "i love",
    "remember",
    "save this",
    "my birthday",
    "i am",
    "mera naam",
    "main rehta hu",
    "mujhe pasand hai",
    "yaad rakhna",
    "yaad rakho",
    "save kar",
    "note kar",
    "isko save",
];

/// Result of one pass through the extraction pipeline.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    /// The trigger check declined the message; no upstream call was made.
    Skipped,
    /// The model answered with the sentinel or an unusable fact.
    Rejected,
    /// The fact already exists for this owner.
    Duplicate,
    Stored(MemoryFact),
    /// Every text provider failed.
    Unavailable(Vec<AttemptFailure>),
}

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub enabled: bool,
    pub min_words: usize,
    pub top_k: usize,
    pub recent_fallback: usize,
    pub extraction_timeout: Duration,
    pub assistant_name: String,
}

impl MemorySettings {
    pub fn from_config(config: &MemoryConfig, assistant_name: &str) -> Self {
        Self {
            enabled: config.enabled,
            min_words: config.min_words,
            top_k: config.top_k,
            recent_fallback: config.recent_fallback,
            extraction_timeout: Duration::from_secs(config.extraction_timeout_secs),
            assistant_name: assistant_name.to_string(),
        }
    }
}

/// Whether a message is worth an extraction call: a trigger phrase or at
/// least `min_words` words.
pub fn should_extract(message: &str, min_words: usize) -> bool {
    let lowered = message.to_lowercase();
    if TRIGGER_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        return true;
    }
    message.split_whitespace().count() >= min_words
}

pub fn extraction_prompt(message: &str) -> String {
    format!(
        "Analyze this user message: \"{message}\"\n\
         Extract ANY permanent user fact or anything the user explicitly asks to save/remember. \
         Return ONLY the fact as a short sentence. \
         DO NOT save facts about the AI, its name, or its identity. \
         If nothing worth remembering, return '{NO_DATA}'."
    )
}

/// Turn raw model output into a candidate fact, or `None` for the sentinel
/// and degenerate answers.
pub fn parse_extraction(output: &str) -> Option<String> {
    let trimmed = output.trim();
    if trimmed.contains(NO_DATA) {
        return None;
    }
    let fact = trimmed
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if fact.len() <= 5 || is_about_assistant(fact) {
        return None;
    }
    Some(fact.to_string())
}

fn is_about_assistant(fact: &str) -> bool {
    static SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^(?:the\s+)?(?:ai|assistant|bot|chatbot)(?:'s)?\b")
            .expect("assistant subject regex should compile")
    });
    SUBJECT.is_match(fact)
}

/// Rewrite a third-person fact into second person ("User likes tea" becomes
/// "You like tea") and replace the assistant's own name with "me".
pub fn rewrite_pronouns(fact: &str, assistant_name: &str) -> String {
    static POSSESSIVE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(?:the\s+)?user's\b").expect("possessive regex should compile")
    });
    static SUBJECT_VERB: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)\b(?:the\s+)?user\s+((?:(?:[a-z]+ly|often|always|never|also|still|sometimes|just|only|now)\s+)*)([a-z]+)\b",
        )
        .expect("subject regex should compile")
    });
    static BARE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(?:the\s+)?user\b").expect("user regex should compile")
    });

    let text = POSSESSIVE.replace_all(fact, "your");
    let text = SUBJECT_VERB.replace_all(&text, |caps: &regex::Captures<'_>| {
        format!("you {}{}", &caps[1], conjugate_second_person(&caps[2]))
    });
    let mut text = BARE.replace_all(&text, "you").into_owned();

    let name = assistant_name.trim();
    if !name.is_empty()
        && let Ok(own_name) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name)))
    {
        text = own_name.replace_all(&text, "me").into_owned();
    }

    capitalize_first(&text)
}

fn conjugate_second_person(verb: &str) -> String {
    let lower = verb.to_lowercase();
    match lower.as_str() {
        "is" => return "are".to_string(),
        "was" => return "were".to_string(),
        "has" => return "have".to_string(),
        "does" => return "do".to_string(),
        "goes" => return "go".to_string(),
        _ => {}
    }
    if lower.len() > 4 && lower.ends_with("ies") {
        return format!("{}y", &lower[..lower.len() - 3]);
    }
    // Sibilant stems take "-es": misses, focuses, wishes, watches, fixes, buzzes.
    if ["sses", "cuses", "shes", "ches", "xes", "zzes"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        return lower[..lower.len() - 2].to_string();
    }
    if lower.len() > 2 && lower.ends_with('s') && !lower.ends_with("ss") && !lower.ends_with("us")
    {
        return lower[..lower.len() - 1].to_string();
    }
    lower
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Background fact extraction plus the read side used by the prompt
/// assembler. The profile store holds the authoritative list; the vector
/// index is an optional accelerator keyed by [`confidant_db::fact_vector_id`].
pub struct MemoryPipeline {
    profiles: Arc<Mutex<ProfileStore>>,
    text: Arc<TextChain>,
    embedder: Option<Arc<EmbeddingChain>>,
    index: Option<Arc<dyn VectorIndex>>,
    settings: MemorySettings,
}

impl MemoryPipeline {
    pub fn new(
        profiles: Arc<Mutex<ProfileStore>>,
        text: Arc<TextChain>,
        settings: MemorySettings,
    ) -> Self {
        Self {
            profiles,
            text,
            embedder: None,
            index: None,
            settings,
        }
    }

    /// Enable similarity retrieval. Both halves are needed; a chain without
    /// providers leaves retrieval on the recent-facts path.
    pub fn with_vector_index(
        mut self,
        embedder: Arc<EmbeddingChain>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        if embedder.is_empty() {
            warn!("no embedding providers configured; memory retrieval uses recent facts");
            return self;
        }
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    pub fn has_vector_index(&self) -> bool {
        self.embedder.is_some() && self.index.is_some()
    }

    /// Run the full pipeline for one user message.
    #[instrument(skip(self, message))]
    pub async fn extract(
        &self,
        owner: &str,
        session: Option<&str>,
        message: &str,
    ) -> Result<ExtractionOutcome> {
        if !self.settings.enabled || !should_extract(message, self.settings.min_words) {
            return Ok(ExtractionOutcome::Skipped);
        }

        let request = LlmRequest::single_turn(None, extraction_prompt(message));
        let limit = self.settings.extraction_timeout;
        let outcome = match tokio::time::timeout(limit, self.text.execute(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("memory extraction timed out after {limit:?}");
                return Ok(ExtractionOutcome::Unavailable(vec![AttemptFailure {
                    provider_id: "extraction".to_string(),
                    reason: FailureReason::Timeout(limit),
                }]));
            }
        };

        let raw = match outcome {
            FallbackOutcome::Served { value, .. } => value.text(),
            FallbackOutcome::Exhausted { failures } => {
                warn!("memory extraction unavailable");
                return Ok(ExtractionOutcome::Unavailable(failures));
            }
        };

        let Some(candidate) = parse_extraction(&raw) else {
            debug!("extraction declined the message");
            return Ok(ExtractionOutcome::Rejected);
        };
        let fact = rewrite_pronouns(&candidate, &self.settings.assistant_name);
        self.add_fact(owner, &fact, session).await
    }

    /// Run [`extract`](Self::extract) as a detached task. Errors are logged
    /// and resolve to `None`; the caller may drop the handle.
    pub fn spawn(
        self: &Arc<Self>,
        owner: String,
        session: Option<String>,
        message: String,
    ) -> JoinHandle<Option<ExtractionOutcome>> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            match pipeline.extract(&owner, session.as_deref(), &message).await {
                Ok(outcome) => {
                    debug!("memory extraction for '{owner}' finished: {outcome:?}");
                    Some(outcome)
                }
                Err(e) => {
                    warn!("memory extraction for '{owner}' failed: {e}");
                    None
                }
            }
        })
    }

    /// Append a fact to the authoritative list and, when configured, the
    /// vector index. Index failures are logged and do not fail the call.
    pub async fn add_fact(
        &self,
        owner: &str,
        text: &str,
        session: Option<&str>,
    ) -> Result<ExtractionOutcome> {
        let inserted = {
            let store = self.profiles.lock().await;
            store.insert_fact(owner, text, session)?
        };

        match inserted {
            FactInsert::Duplicate => {
                debug!("fact already known for '{owner}'");
                Ok(ExtractionOutcome::Duplicate)
            }
            FactInsert::Inserted(fact) => {
                info!("stored memory fact {}", fact.id);
                self.index_fact(&fact).await;
                Ok(ExtractionOutcome::Stored(fact))
            }
        }
    }

    /// Delete by fact text or fact id. Returns whether a fact was removed.
    pub async fn delete_fact(&self, owner: &str, key: &str) -> Result<bool> {
        let removed = {
            let store = self.profiles.lock().await;
            match store.delete_fact(owner, key)? {
                Some(id) => Some(id),
                None if store.delete_fact_by_id(owner, key)? => Some(key.to_string()),
                None => None,
            }
        };

        let Some(id) = removed else {
            return Ok(false);
        };
        if let Some(index) = &self.index
            && let Err(e) = index.delete(std::slice::from_ref(&id)).await
        {
            warn!("failed to remove fact {id} from vector index: {e}");
        }
        Ok(true)
    }

    /// Newest first.
    pub async fn list_facts(&self, owner: &str) -> Result<Vec<MemoryFact>> {
        self.profiles.lock().await.list_facts(owner)
    }

    /// Facts relevant to `query`, scoped to `owner`. Uses vector similarity
    /// when available and falls back to the most recent facts in
    /// chronological order.
    pub async fn retrieve(&self, owner: &str, query: &str) -> Result<Vec<String>> {
        if let Some(index) = &self.index
            && let Some(vector) = self.embed(query).await
        {
            match index.query(owner, &vector, self.settings.top_k).await {
                Ok(matches) if !matches.is_empty() => {
                    debug!("retrieved {} fact(s) by similarity", matches.len());
                    return Ok(matches.into_iter().map(|m| m.text).collect());
                }
                Ok(_) => debug!("vector index has no facts for owner; using recent facts"),
                Err(e) => warn!("vector query failed, using recent facts: {e}"),
            }
        }

        let mut recent = self
            .profiles
            .lock()
            .await
            .recent_facts(owner, self.settings.recent_fallback)?;
        recent.reverse();
        Ok(recent.into_iter().map(|fact| fact.text).collect())
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let request = EmbeddingRequest {
            input: text.to_string(),
        };
        embedder
            .execute(&request)
            .await
            .into_value()
            .map(|embedding| embedding.vector)
    }

    async fn index_fact(&self, fact: &MemoryFact) {
        let Some(index) = &self.index else {
            return;
        };
        let Some(embedding) = self.embed(&fact.text).await else {
            warn!("could not embed fact {}; it stays list-only", fact.id);
            return;
        };
        let record = VectorRecord {
            id: fact.id.clone(),
            owner_id: fact.owner_id.clone(),
            text: fact.text.clone(),
            embedding,
        };
        if let Err(e) = index.upsert(record).await {
            warn!("failed to index fact {}: {e}", fact.id);
        }
    }
}
