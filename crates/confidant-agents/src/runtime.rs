use std::sync::{Arc, LazyLock};

use confidant_common::{Error, Message, MessageRole, Result, SessionId, UserId};
use confidant_config::{AppConfig, HistoryConfig};
use confidant_db::{
    FeedbackEntry, MemoryFact, ProfileStore, SessionStore, SessionSummary, SqliteVectorIndex, UserProfile,
    VectorIndex,
};
use confidant_security::CredentialPools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::chains::{Capabilities, ChainStatus};
use crate::handlers::{self, Attachment, FlashcardOutcome, TurnContext};
use crate::memory::{ExtractionOutcome, MemoryPipeline, MemorySettings};
use crate::modes::{Mode, session_title};
use crate::prompt::PromptAssembler;
use crate::providers::{SpeechAudio, SpeechRequest};

pub const GENERIC_ERROR_REPLY: &str =
    "⚠️ Server Error: We ran into a small issue. Please try again.";
pub const SUSPENDED_REPLY: &str =
    "🚫 Your account has been suspended. Please contact support if you think this is a mistake.";
pub const FOREIGN_SESSION_REPLY: &str =
    "⚠️ This conversation belongs to another account. Start a new chat to continue.";
pub const EMPTY_MESSAGE_REPLY: &str = "✏️ Please type a message first.";

/// Caller identity, established by the authenticating proxy in front of the
/// gateway.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatSubmission {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

/// A like or dislike on one assistant reply.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackSubmission {
    pub message_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub session_id: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub name: String,
    pub plan: &'static str,
    pub custom_instruction: Option<String>,
}

impl From<UserProfile> for ProfileView {
    fn from(profile: UserProfile) -> Self {
        Self {
            name: profile.display_name,
            plan: if profile.elevated { "Pro" } else { "Free" },
            custom_instruction: profile.custom_instruction,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub chains: Vec<ChainStatus>,
    pub pools: Vec<PoolStatus>,
    pub memory_index: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageCount {
    pub mode: String,
    pub count: u64,
}

/// Persistence handles shared with the orchestrator.
pub struct Stores {
    pub sessions: Arc<Mutex<SessionStore>>,
    pub profiles: Arc<Mutex<ProfileStore>>,
    pub vectors: Option<Arc<dyn VectorIndex>>,
}

impl Stores {
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            sessions: Arc::new(Mutex::new(SessionStore::in_memory()?)),
            profiles: Arc::new(Mutex::new(ProfileStore::in_memory()?)),
            vectors: Some(Arc::new(SqliteVectorIndex::in_memory()?)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub assistant_name: String,
    pub default_persona: String,
    pub history: HistoryConfig,
    pub max_attachment_bytes: usize,
    pub memory: MemorySettings,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            assistant_name: config.assistant.name.clone(),
            default_persona: config.assistant.persona_text(),
            history: config.history.clone(),
            max_attachment_bytes: config.gateway.max_attachment_bytes,
            memory: MemorySettings::from_config(&config.memory, &config.assistant.name),
        }
    }
}

/// Request-level coordinator: identity, sessions, prompt assembly, mode
/// dispatch and background memory extraction.
pub struct Orchestrator {
    sessions: Arc<Mutex<SessionStore>>,
    profiles: Arc<Mutex<ProfileStore>>,
    capabilities: Capabilities,
    memory: Arc<MemoryPipeline>,
    prompts: PromptAssembler,
    history: HistoryConfig,
    max_attachment_bytes: usize,
}

impl Orchestrator {
    pub fn new(stores: Stores, capabilities: Capabilities, settings: RuntimeSettings) -> Self {
        let mut memory = MemoryPipeline::new(
            Arc::clone(&stores.profiles),
            Arc::clone(&capabilities.text),
            settings.memory,
        );
        if let Some(index) = stores.vectors {
            memory = memory.with_vector_index(Arc::clone(&capabilities.embedding), index);
        }
        let memory = Arc::new(memory);

        Self {
            sessions: stores.sessions,
            profiles: stores.profiles,
            prompts: PromptAssembler::new(
                settings.assistant_name,
                settings.default_persona,
                Arc::clone(&memory),
            ),
            capabilities,
            memory,
            history: settings.history,
            max_attachment_bytes: settings.max_attachment_bytes,
        }
    }

    /// Open the on-disk stores and build every provider chain.
    pub fn from_config(config: &AppConfig, pools: Arc<CredentialPools>) -> Result<Self> {
        let db_path = config.database.resolved_path();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let stores = Stores {
            sessions: Arc::new(Mutex::new(SessionStore::open(&db_path)?)),
            profiles: Arc::new(Mutex::new(ProfileStore::open(&db_path)?)),
            vectors: Some(Arc::new(SqliteVectorIndex::open(&db_path)?)),
        };
        let capabilities = Capabilities::from_config(config, pools)?;
        info!("orchestrator ready (database: {})", db_path.display());
        Ok(Self::new(stores, capabilities, RuntimeSettings::from_config(config)))
    }

    pub fn memory(&self) -> &Arc<MemoryPipeline> {
        &self.memory
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Process one chat turn. Always produces a reply; failures become soft
    /// messages and are recorded in the error log.
    #[instrument(skip(self, submission), fields(user = %identity.user_id))]
    pub async fn handle_chat(&self, identity: &Identity, submission: ChatSubmission) -> ChatReply {
        let (mode, recognized) = Mode::parse(submission.mode.as_deref().unwrap_or("chat"));
        if !recognized {
            debug!("unrecognized mode replaced by {}", mode.as_str());
        }
        let session_id = submission
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(SessionId::from)
            .unwrap_or_else(SessionId::generate);

        let reply = match self.run_turn(identity, mode, &session_id, &submission).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("chat turn failed in {} mode: {e}", mode.as_str());
                self.record_error(&format!("/api/chat ({})", mode.as_str()), &e.to_string())
                    .await;
                GENERIC_ERROR_REPLY.to_string()
            }
        };

        ChatReply {
            reply,
            session_id: session_id.to_string(),
            mode: mode.as_str().to_string(),
        }
    }

    async fn run_turn(
        &self,
        identity: &Identity,
        mode: Mode,
        session_id: &SessionId,
        submission: &ChatSubmission,
    ) -> Result<String> {
        let user_id = identity.user_id.as_str();
        let profile = self
            .profiles
            .lock()
            .await
            .ensure_user(user_id, &identity.display_name)?;
        if profile.suspended {
            info!("refusing chat for suspended user");
            return Ok(SUSPENDED_REPLY.to_string());
        }

        let message = submission.message.trim();
        if message.is_empty() && submission.attachment.is_none() {
            return Ok(EMPTY_MESSAGE_REPLY.to_string());
        }

        let history = {
            let sessions = self.sessions.lock().await;
            match sessions.session_owner(session_id.as_str())? {
                Some(owner) if owner != user_id => {
                    warn!("session {session_id} is owned by another user");
                    return Ok(FOREIGN_SESSION_REPLY.to_string());
                }
                Some(_) => {}
                None => {
                    sessions.create_session_if_absent(
                        session_id.as_str(),
                        user_id,
                        &session_title(mode, message),
                        mode.as_str(),
                    )?;
                    info!("session {session_id} started in {} mode", mode.as_str());
                }
            }

            let window = mode.history_window(&self.history);
            let history = if window > 0 {
                sessions.load_recent_messages(session_id.as_str(), window)?
            } else {
                Vec::new()
            };
            sessions.append_message(
                session_id.as_str(),
                MessageRole::User,
                message,
                chrono::Utc::now(),
            )?;
            history
        };

        let system_prompt = if mode.uses_persona() {
            self.prompts.assemble(&profile, message).await.system
        } else {
            String::new()
        };

        let ctx = TurnContext {
            mode,
            message,
            system_prompt: &system_prompt,
            history: &history,
            attachment: submission.attachment.as_ref(),
            capabilities: &self.capabilities,
            max_attachment_bytes: self.max_attachment_bytes,
        };
        let reply = match handlers::dispatch(&ctx).await {
            Ok(reply) => reply,
            Err(Error::AttachmentDecode(message)) => message,
            Err(e) => {
                error!("{} handler failed: {e}", mode.as_str());
                self.record_error(&format!("/api/chat ({})", mode.as_str()), &e.to_string())
                    .await;
                GENERIC_ERROR_REPLY.to_string()
            }
        };

        self.sessions.lock().await.append_message(
            session_id.as_str(),
            MessageRole::Assistant,
            &reply,
            chrono::Utc::now(),
        )?;
        if let Err(e) = self.profiles.lock().await.increment_usage(mode.as_str()) {
            warn!("failed to count usage for {}: {e}", mode.as_str());
        }

        if mode.extracts_memory() && !message.is_empty() {
            // Detached; the reply does not wait for extraction.
            drop(self.memory.spawn(
                user_id.to_string(),
                Some(session_id.to_string()),
                message.to_string(),
            ));
        }

        Ok(reply)
    }

    async fn record_error(&self, context: &str, message: &str) {
        if let Err(e) = self.profiles.lock().await.log_error(context, message) {
            warn!("failed to write error log: {e}");
        }
    }

    async fn ensure_user(&self, identity: &Identity) -> Result<UserProfile> {
        self.profiles
            .lock()
            .await
            .ensure_user(identity.user_id.as_str(), &identity.display_name)
    }

    // Sessions

    pub async fn list_sessions(&self, identity: &Identity) -> Result<Vec<SessionSummary>> {
        self.sessions
            .lock()
            .await
            .list_sessions(identity.user_id.as_str())
    }

    /// A fresh session id. The session is stored with its first message.
    pub fn create_session(&self) -> SessionId {
        SessionId::generate()
    }

    pub async fn rename_session(
        &self,
        identity: &Identity,
        session_id: &str,
        title: &str,
    ) -> Result<bool> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::Agent("session title cannot be empty".to_string()));
        }
        self.sessions
            .lock()
            .await
            .rename_session(identity.user_id.as_str(), session_id, title)
    }

    pub async fn delete_session(&self, identity: &Identity, session_id: &str) -> Result<bool> {
        self.sessions
            .lock()
            .await
            .delete_session(identity.user_id.as_str(), session_id)
    }

    pub async fn delete_all_sessions(&self, identity: &Identity) -> Result<usize> {
        self.sessions
            .lock()
            .await
            .delete_all_sessions(identity.user_id.as_str())
    }

    /// Full transcript, or `None` when the session does not exist or belongs
    /// to someone else.
    pub async fn session_history(
        &self,
        identity: &Identity,
        session_id: &str,
    ) -> Result<Option<Vec<Message>>> {
        let sessions = self.sessions.lock().await;
        match sessions.session_owner(session_id)? {
            Some(owner) if owner == identity.user_id.as_str() => {
                Ok(Some(sessions.load_messages(session_id)?))
            }
            _ => Ok(None),
        }
    }

    // Memory

    pub async fn list_memories(&self, identity: &Identity) -> Result<Vec<MemoryFact>> {
        self.memory.list_facts(identity.user_id.as_str()).await
    }

    /// Store a fact verbatim.
    pub async fn add_memory(&self, identity: &Identity, text: &str) -> Result<ExtractionOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Agent("memory text cannot be empty".to_string()));
        }
        self.ensure_user(identity).await?;
        self.memory
            .add_fact(identity.user_id.as_str(), text, None)
            .await
    }

    /// Delete by fact text or id.
    pub async fn delete_memory(&self, identity: &Identity, key: &str) -> Result<bool> {
        self.memory
            .delete_fact(identity.user_id.as_str(), key.trim())
            .await
    }

    // Instruction and profile

    pub async fn instruction(&self, identity: &Identity) -> Result<Option<String>> {
        Ok(self.ensure_user(identity).await?.custom_instruction)
    }

    /// Set the persona override. Blank text restores the default persona.
    pub async fn set_instruction(&self, identity: &Identity, instruction: &str) -> Result<()> {
        self.ensure_user(identity).await?;
        self.profiles
            .lock()
            .await
            .set_custom_instruction(identity.user_id.as_str(), instruction)?;
        Ok(())
    }

    pub async fn profile(&self, identity: &Identity) -> Result<ProfileView> {
        Ok(self.ensure_user(identity).await?.into())
    }

    pub async fn set_display_name(&self, identity: &Identity, name: &str) -> Result<ProfileView> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Agent("display name cannot be empty".to_string()));
        }
        self.ensure_user(identity).await?;
        let profiles = self.profiles.lock().await;
        profiles.set_display_name(identity.user_id.as_str(), name)?;
        profiles
            .load_user(identity.user_id.as_str())?
            .map(ProfileView::from)
            .ok_or_else(|| Error::Database("user vanished after update".to_string()))
    }

    // Study tools and feedback

    /// A flashcard deck for `topic`, generated through the text chain.
    pub async fn flashcards(&self, identity: &Identity, topic: &str) -> Result<FlashcardOutcome> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(Error::Agent("topic cannot be empty".to_string()));
        }
        self.ensure_user(identity).await?;
        handlers::generate_flashcards(&self.capabilities.text, topic).await
    }

    pub async fn submit_feedback(
        &self,
        identity: &Identity,
        feedback: FeedbackSubmission,
    ) -> Result<()> {
        let message_id = feedback.message_id.trim();
        let kind = feedback.kind.trim().to_lowercase();
        if message_id.is_empty() || kind.is_empty() {
            return Err(Error::Agent(
                "feedback needs a message_id and a type".to_string(),
            ));
        }
        let entry = FeedbackEntry {
            message_id: message_id.to_string(),
            kind,
            category: feedback.category.trim().to_string(),
            comment: feedback
                .comment
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        };
        self.ensure_user(identity).await?;
        self.profiles
            .lock()
            .await
            .record_feedback(identity.user_id.as_str(), &entry)
    }

    // Speech, status, usage

    /// Synthesize speech for a reply. Markup is stripped first.
    pub async fn speak(&self, text: &str) -> Result<SpeechAudio> {
        let spoken = strip_markup(text);
        if spoken.is_empty() {
            return Err(Error::Agent("nothing to speak".to_string()));
        }
        self.capabilities
            .speech
            .execute(&SpeechRequest {
                text: spoken,
                voice: None,
            })
            .await
            .into_result()
    }

    pub fn status(&self) -> StatusReport {
        let pools = &self.capabilities.pools;
        StatusReport {
            chains: self.capabilities.status(),
            pools: pools
                .pool_names()
                .into_iter()
                .map(|name| PoolStatus {
                    size: pools.pool_size(&name),
                    name,
                })
                .collect(),
            memory_index: self.memory.has_vector_index(),
        }
    }

    pub async fn usage(&self) -> Result<Vec<UsageCount>> {
        Ok(self
            .profiles
            .lock()
            .await
            .usage_counts()?
            .into_iter()
            .map(|(mode, count)| UsageCount { mode, count })
            .collect())
    }

    #[cfg(test)]
    pub(crate) async fn feedback_for(&self, user_id: &str) -> Result<Vec<FeedbackEntry>> {
        self.profiles.lock().await.list_feedback(user_id)
    }

    #[cfg(test)]
    pub(crate) async fn set_suspended(&self, user_id: &str, suspended: bool) -> Result<()> {
        self.profiles.lock().await.set_flags(user_id, false, suspended)?;
        Ok(())
    }
}

/// Plain text for speech: tags, markdown emphasis and code fences removed.
pub fn strip_markup(text: &str) -> String {
    static TAGS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex should compile"));
    static MARKDOWN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[*_`#>~]+").expect("markdown regex should compile"));

    let without_tags = TAGS.replace_all(text, " ");
    let without_markdown = MARKDOWN.replace_all(&without_tags, "");
    without_markdown.split_whitespace().collect::<Vec<_>>().join(" ")
}
