pub mod chains;
pub mod fallback;
pub mod handlers;
pub mod memory;
pub mod modes;
pub mod prompt;
pub mod providers;
pub mod runtime;

pub use chains::{Capabilities, ChainStatus, EmbeddingChain, ImageChain, SpeechChain, TextChain};
pub use fallback::{AttemptFailure, FailureReason, FallbackChain, FallbackOutcome};
pub use handlers::{
    Attachment, DecodedAttachment, Flashcard, FlashcardOutcome, decode_attachment,
};
pub use memory::{ExtractionOutcome, MemoryPipeline, MemorySettings, rewrite_pronouns, should_extract};
pub use modes::Mode;
pub use prompt::{AssembledPrompt, PromptAssembler, is_unknown_name};
pub use providers::{
    Capability, CapabilityProvider, ChatMessage, ChatRole, ContentBlock, GeneratedImage,
    LlmRequest, LlmResponse, MessagePart, SearchHit, SearchProvider, SpeechAudio, Usage,
};
pub use runtime::{
    ChatReply, ChatSubmission, FeedbackSubmission, Identity, Orchestrator, ProfileView,
    RuntimeSettings, StatusReport, Stores, UsageCount,
};
