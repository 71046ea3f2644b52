use confidant_common::Result;

use crate::handlers::{TurnContext, tools};
use crate::modes::Mode;
use crate::providers::{ChatMessage, LlmRequest};

/// Conversational reply over the stored history window.
pub(super) async fn respond(ctx: &TurnContext<'_>) -> Result<String> {
    let mut messages: Vec<ChatMessage> = ctx.history.iter().map(ChatMessage::from).collect();
    messages.push(ChatMessage::user(ctx.message));

    let system = match ctx.mode {
        Mode::Coding => format!("{}\n\n{}", ctx.system_prompt, tools::instruction(Mode::Coding)),
        _ => ctx.system_prompt.to_string(),
    };
    let request = LlmRequest {
        model: None,
        messages,
        system: Some(system),
        max_tokens: None,
        temperature: None,
    };

    let chain = &ctx.capabilities.text;
    Ok(match chain.execute(&request).await.into_value() {
        Some(response) => response.text(),
        None => chain.capability().unavailable_message().to_string(),
    })
}
