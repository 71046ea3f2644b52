use std::sync::Arc;

use confidant_db::UserProfile;
use tracing::{debug, warn};

use crate::memory::MemoryPipeline;

/// Display names that mean "we do not know who this is".
pub fn is_unknown_name(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    lowered.is_empty() || lowered == "user" || lowered.contains("guest")
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub system: String,
    /// Facts injected into the memory block, in injection order.
    pub memories: Vec<String>,
}

/// Builds the per-turn system instruction from the persona, the user's
/// identity and retrieved long-term memory.
pub struct PromptAssembler {
    assistant_name: String,
    default_persona: String,
    memory: Arc<MemoryPipeline>,
}

impl PromptAssembler {
    pub fn new(
        assistant_name: impl Into<String>,
        default_persona: impl Into<String>,
        memory: Arc<MemoryPipeline>,
    ) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            default_persona: default_persona.into(),
            memory,
        }
    }

    pub fn assistant_name(&self) -> &str {
        &self.assistant_name
    }

    pub fn default_persona(&self) -> &str {
        &self.default_persona
    }

    /// The user's custom instruction when set, otherwise the default persona.
    pub fn base_instruction(&self, profile: &UserProfile) -> String {
        profile
            .custom_instruction
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.default_persona)
            .to_string()
    }

    pub async fn assemble(&self, profile: &UserProfile, query: &str) -> AssembledPrompt {
        let memories = match self.memory.retrieve(&profile.id, query).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!("memory retrieval failed for '{}': {e}", profile.id);
                Vec::new()
            }
        };
        debug!("assembling prompt with {} memory fact(s)", memories.len());

        let system = compose_system_prompt(
            &self.base_instruction(profile),
            &profile.display_name,
            &self.assistant_name,
            &memories,
        );
        AssembledPrompt { system, memories }
    }
}

pub fn compose_system_prompt(
    base: &str,
    display_name: &str,
    assistant_name: &str,
    memories: &[String],
) -> String {
    let name_clause = if is_unknown_name(display_name) {
        "The user's name is currently unknown. In this reply, politely and warmly ask for \
         their name so you can remember it."
            .to_string()
    } else {
        format!("The user's name is {}. Address them by name.", display_name.trim())
    };

    let mut sections = vec![
        base.trim().to_string(),
        format!(
            "[IMPORTANT CONTEXT]: You are {assistant_name}. {name_clause} \
             Never call the user '{assistant_name}'. \
             Never store or repeat memories about your own name or identity."
        ),
    ];

    if !memories.is_empty() {
        let lines = memories
            .iter()
            .map(|fact| format!("- {fact}"))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!(
            "[USER LONG-TERM MEMORY]:\n{lines}\n\
             (Use this information to personalize the conversation naturally. Do not recite it.)"
        ));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_names_are_unknown() {
        assert!(is_unknown_name(""));
        assert!(is_unknown_name("  User "));
        assert!(is_unknown_name("Guest_4821"));
        assert!(!is_unknown_name("Asha"));
    }

    #[test]
    fn unknown_user_is_asked_for_name() {
        let prompt = compose_system_prompt("Be warm.", "guest", "Nova", &[]);
        assert!(prompt.starts_with("Be warm."));
        assert!(prompt.contains("In this reply, politely and warmly ask for their name"));
        assert!(prompt.contains("Never call the user 'Nova'"));
        assert!(!prompt.contains("[USER LONG-TERM MEMORY]"));
    }

    #[test]
    fn known_user_is_addressed_and_memories_listed() {
        let memories = vec!["You live in Pune".to_string(), "You like tea".to_string()];
        let prompt = compose_system_prompt("Be warm.", "Asha", "Nova", &memories);
        assert!(prompt.contains("The user's name is Asha."));
        assert!(prompt.contains("[USER LONG-TERM MEMORY]:\n- You live in Pune\n- You like tea"));
        assert!(prompt.contains("Do not recite it."));
    }
}
