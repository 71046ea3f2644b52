use confidant_common::Result;

use crate::handlers::{DecodedAttachment, TurnContext};
use crate::providers::{ChatMessage, ChatRole, ContentBlock, LlmRequest, MessagePart};

const DEFAULT_QUESTION: &str = "Describe this image.";

/// Answer a question about an attached image through the vision chain.
pub(super) async fn describe(ctx: &TurnContext<'_>, image: &DecodedAttachment) -> Result<String> {
    let question = Some(ctx.message.trim())
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_QUESTION);
    ask(ctx, image, question, Some(ctx.system_prompt.to_string())).await
}

pub(super) async fn solve_math(ctx: &TurnContext<'_>, image: &DecodedAttachment) -> Result<String> {
    let question = match ctx.message.trim() {
        "" => "Solve this math problem step by step.".to_string(),
        extra => format!("Solve this math problem step by step. {extra}"),
    };
    ask(ctx, image, &question, None).await
}

async fn ask(
    ctx: &TurnContext<'_>,
    image: &DecodedAttachment,
    question: &str,
    system: Option<String>,
) -> Result<String> {
    let request = LlmRequest {
        model: None,
        messages: vec![ChatMessage {
            role: ChatRole::User,
            content: MessagePart::Parts(vec![
                ContentBlock::Text {
                    text: question.to_string(),
                },
                ContentBlock::Image {
                    url: image.data_url(),
                },
            ]),
        }],
        system,
        max_tokens: None,
        temperature: None,
    };

    let chain = &ctx.capabilities.vision;
    Ok(match chain.execute(&request).await.into_value() {
        Some(response) => response.text(),
        None => chain.capability().unavailable_message().to_string(),
    })
}
