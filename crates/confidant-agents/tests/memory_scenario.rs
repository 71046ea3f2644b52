use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use confidant_agents::providers::{
    Capability, CapabilityProvider, ContentBlock, DuckDuckGoSearch, Embedding, EmbeddingRequest,
    GitHubClient, LlmRequest, LlmResponse, MessagePart, extract_text,
};
use confidant_agents::{
    Capabilities, ChatSubmission, EmbeddingChain, FallbackChain, Identity, Orchestrator,
    RuntimeSettings, Stores, TextChain,
};
use confidant_common::Result;
use confidant_config::AppConfig;
use confidant_security::{Credential, CredentialPools};

/// Answers extraction prompts with a fixed fact and records every system
/// prompt it sees on ordinary turns.
#[derive(Default)]
struct ScriptedModel {
    system_prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl CapabilityProvider<LlmRequest, LlmResponse> for ScriptedModel {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        _credential: Option<&Credential>,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let last = request
            .messages
            .last()
            .map(|m| match &m.content {
                MessagePart::Text(t) => t.clone(),
                MessagePart::Parts(p) => extract_text(p),
            })
            .unwrap_or_default();

        let text = if last.starts_with("Analyze this user message") {
            if last.contains("Pune") {
                "User lives in Pune.".to_string()
            } else {
                "NO_DATA".to_string()
            }
        } else {
            if let Some(system) = &request.system {
                self.system_prompts
                    .lock()
                    .expect("lock")
                    .push(system.clone());
            }
            "Noted!".to_string()
        };

        Ok(LlmResponse {
            content: vec![ContentBlock::Text { text }],
            model: "scripted".to_string(),
            usage: None,
            stop_reason: None,
        })
    }
}

/// Bag-of-words embedding so similar sentences land close together.
struct BagOfWords;

#[async_trait]
impl CapabilityProvider<EmbeddingRequest, Embedding> for BagOfWords {
    fn provider_id(&self) -> &str {
        "bag-of-words"
    }

    async fn invoke(
        &self,
        _credential: Option<&Credential>,
        request: &EmbeddingRequest,
    ) -> Result<Embedding> {
        let mut vector = vec![0.0f32; 32];
        for word in request
            .input
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word.bytes().map(usize::from).sum::<usize>() % 32;
            vector[bucket] += 1.0;
        }
        Ok(Embedding {
            vector,
            model: "bag-of-words".to_string(),
        })
    }
}

fn orchestrator(model: Arc<ScriptedModel>) -> Orchestrator {
    let pools = Arc::new(CredentialPools::from_map(HashMap::new(), Duration::ZERO));
    let text = Arc::new(
        TextChain::new(Capability::TextGeneration, Arc::clone(&pools)).with_link(model, None),
    );
    let capabilities = Capabilities {
        text: Arc::clone(&text),
        vision: Arc::new(FallbackChain::new(Capability::Vision, Arc::clone(&pools))),
        embedding: Arc::new(
            EmbeddingChain::new(Capability::Embedding, Arc::clone(&pools))
                .with_link(Arc::new(BagOfWords), None),
        ),
        image: Arc::new(FallbackChain::new(
            Capability::ImageSynthesis,
            Arc::clone(&pools),
        )),
        speech: Arc::new(FallbackChain::new(Capability::Speech, Arc::clone(&pools))),
        enrichment: Arc::new(FallbackChain::new(
            Capability::TextGeneration,
            Arc::clone(&pools),
        )),
        search: Arc::new(DuckDuckGoSearch::new(
            "http://127.0.0.1:9",
            3,
            Duration::from_millis(200),
        )),
        github: Arc::new(GitHubClient::new(
            "http://127.0.0.1:9",
            5,
            Duration::from_millis(200),
        )),
        pools,
    };
    Orchestrator::new(
        Stores::in_memory().expect("stores"),
        capabilities,
        RuntimeSettings::from_config(&AppConfig::default()),
    )
}

fn turn(message: &str, session: &str, mode: Option<&str>) -> ChatSubmission {
    ChatSubmission {
        message: message.to_string(),
        session_id: Some(session.to_string()),
        mode: mode.map(str::to_string),
        attachment: None,
    }
}

async fn wait_for_memories(orchestrator: &Orchestrator, identity: &Identity) -> Vec<String> {
    for _ in 0..100 {
        let facts = orchestrator.list_memories(identity).await.expect("list");
        if !facts.is_empty() {
            return facts.into_iter().map(|f| f.text).collect();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Vec::new()
}

#[tokio::test]
async fn disclosed_fact_is_remembered_and_used_in_a_later_turn() {
    let model = Arc::new(ScriptedModel::default());
    let orchestrator = orchestrator(Arc::clone(&model));
    let asha = Identity::new("asha", "Asha");

    let first = orchestrator
        .handle_chat(&asha, turn("Hi! I live in Pune these days", "s1", None))
        .await;
    assert_eq!(first.reply, "Noted!");

    let facts = wait_for_memories(&orchestrator, &asha).await;
    assert_eq!(facts, vec!["You live in Pune.".to_string()]);

    orchestrator
        .handle_chat(&asha, turn("where do I live?", "s2", None))
        .await;

    let prompts = model.system_prompts.lock().expect("lock").clone();
    let last = prompts.last().expect("second turn prompt");
    assert!(last.contains("[USER LONG-TERM MEMORY]:\n- You live in Pune."), "{last}");
    assert!(last.contains("The user's name is Asha."));
}

#[tokio::test]
async fn memories_are_scoped_to_their_owner() {
    let model = Arc::new(ScriptedModel::default());
    let orchestrator = orchestrator(Arc::clone(&model));
    let asha = Identity::new("asha", "Asha");
    let ravi = Identity::new("ravi", "Ravi");

    orchestrator
        .handle_chat(&asha, turn("I live in Pune with my cat", "s1", None))
        .await;
    assert!(!wait_for_memories(&orchestrator, &asha).await.is_empty());

    orchestrator
        .handle_chat(&ravi, turn("where do I live?", "s2", None))
        .await;
    let prompts = model.system_prompts.lock().expect("lock").clone();
    let last = prompts.last().expect("ravi prompt");
    assert!(!last.contains("Pune"), "{last}");
    assert!(orchestrator.list_memories(&ravi).await.expect("list").is_empty());
}

#[tokio::test]
async fn deleted_memory_is_no_longer_retrieved() {
    let model = Arc::new(ScriptedModel::default());
    let orchestrator = orchestrator(Arc::clone(&model));
    let asha = Identity::new("asha", "Asha");

    orchestrator
        .add_memory(&asha, "You love masala chai.")
        .await
        .expect("add");
    assert!(
        orchestrator
            .delete_memory(&asha, "You love masala chai.")
            .await
            .expect("delete")
    );

    orchestrator
        .handle_chat(&asha, turn("what do I like to drink?", "s1", None))
        .await;
    let prompts = model.system_prompts.lock().expect("lock").clone();
    assert!(!prompts.last().expect("prompt").contains("masala chai"));
}

#[tokio::test]
async fn session_title_is_fixed_by_the_first_turn() {
    let model = Arc::new(ScriptedModel::default());
    let orchestrator = orchestrator(model);
    let asha = Identity::new("asha", "Asha");

    orchestrator
        .handle_chat(&asha, turn("fix my resume wording", "s1", Some("grammar_fixer")))
        .await;
    orchestrator
        .handle_chat(&asha, turn("now something else entirely", "s1", None))
        .await;

    let sessions = orchestrator.list_sessions(&asha).await.expect("list");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].title, "Tool: Grammar Fixer - fix my resume wordin...");
    assert_eq!(sessions[0].mode, "grammar_fixer");
}

#[tokio::test]
async fn unknown_mode_is_served_as_chat() {
    let model = Arc::new(ScriptedModel::default());
    let orchestrator = orchestrator(model);
    let asha = Identity::new("asha", "Asha");

    let reply = orchestrator
        .handle_chat(&asha, turn("hello", "s1", Some("astrology")))
        .await;
    assert_eq!(reply.mode, "chat");
    assert_eq!(reply.reply, "Noted!");
}
