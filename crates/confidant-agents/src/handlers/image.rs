use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use confidant_common::Result;
use tracing::{debug, info};

use crate::chains::TextChain;
use crate::fallback::{AttemptFailure, FailureReason, FallbackOutcome};
use crate::handlers::TurnContext;
use crate::providers::{GeneratedImage, ImageRequest, LlmRequest};

const PROMPT_PREVIEW_CHARS: usize = 100;

/// Prompt enrichment, then the image chain. The last link is expected to be
/// the credential-free URL backup.
pub(super) async fn generate(ctx: &TurnContext<'_>) -> Result<String> {
    let idea = ctx.message.trim();
    if idea.is_empty() {
        return Ok("🎨 Tell me what you'd like me to draw.".to_string());
    }

    let prompt = enrich_prompt(&ctx.capabilities.enrichment, idea).await;
    let chain = &ctx.capabilities.image;
    match chain.execute(&ImageRequest { prompt: prompt.clone() }).await {
        FallbackOutcome::Served {
            provider_id,
            value,
            failures,
        } => {
            info!("image served by '{provider_id}'");
            Ok(render_image_reply(&value, &prompt, primary_failed(&failures)))
        }
        FallbackOutcome::Exhausted { .. } => {
            Ok(chain.capability().unavailable_message().to_string())
        }
    }
}

/// A configured provider was tried and failed. Providers skipped for lack of
/// a credential do not count.
fn primary_failed(failures: &[AttemptFailure]) -> bool {
    failures
        .iter()
        .any(|failure| !matches!(failure.reason, FailureReason::CredentialMissing { .. }))
}

/// Rewrite a short idea into a detailed prompt. Any failure keeps the
/// original text.
async fn enrich_prompt(chain: &TextChain, idea: &str) -> String {
    if chain.is_empty() {
        return idea.to_string();
    }
    let request = LlmRequest::single_turn(
        None,
        format!(
            "Convert this simple user idea into a highly detailed, professional AI image \
             generation prompt (photorealistic, 8k, lighting details). User idea: '{idea}'. \
             Return ONLY the prompt text, no intro."
        ),
    );
    match chain.execute(&request).await.into_value() {
        Some(response) => {
            let enriched = response.text().trim().trim_matches('"').trim().to_string();
            if enriched.is_empty() {
                idea.to_string()
            } else {
                enriched
            }
        }
        None => {
            debug!("prompt enrichment unavailable; using the original idea");
            idea.to_string()
        }
    }
}

/// Inline markup for a generated image. `fell_back` adds the backup notice.
pub fn render_image_reply(image: &GeneratedImage, prompt: &str, fell_back: bool) -> String {
    let preview = escape_html(&preview(prompt));
    let src = match image {
        GeneratedImage::Inline { mime_type, bytes } => {
            format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
        }
        GeneratedImage::Url(url) => escape_html(url),
    };

    let notice = if fell_back {
        "<p class=\"image-notice\">⚠️ Server busy. Switched to backup generator.</p>\n"
    } else {
        ""
    };
    format!(
        "<div class=\"generated-image\">\n{notice}<p class=\"image-prompt\">✨ Prompt: {preview}</p>\n\
         <img src=\"{src}\" alt=\"Generated image\">\n</div>"
    )
}

fn preview(prompt: &str) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(PROMPT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use confidant_common::Error;
    use confidant_security::{Credential, CredentialPools};

    use crate::chains::{Capabilities, ImageChain};
    use crate::fallback::FallbackChain;
    use crate::modes::Mode;
    use crate::providers::{
        Capability, CapabilityProvider, ContentBlock, DuckDuckGoSearch, GitHubClient, LlmResponse,
    };

    enum Rewriter {
        Answers(&'static str),
        Fails,
        Hangs,
    }

    #[async_trait]
    impl CapabilityProvider<LlmRequest, LlmResponse> for Rewriter {
        fn provider_id(&self) -> &str {
            "rewriter"
        }

        async fn invoke(
            &self,
            _credential: Option<&Credential>,
            _request: &LlmRequest,
        ) -> Result<LlmResponse> {
            match self {
                Self::Answers(text) => Ok(LlmResponse {
                    content: vec![ContentBlock::Text {
                        text: text.to_string(),
                    }],
                    model: "rewriter".to_string(),
                    usage: None,
                    stop_reason: None,
                }),
                Self::Fails => Err(Error::UpstreamStatus {
                    status: 500,
                    body: "boom".to_string(),
                }),
                Self::Hangs => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(Error::ProviderUnavailable("unreachable".to_string()))
                }
            }
        }
    }

    /// Records every prompt and answers with a URL.
    #[derive(Default)]
    struct RecordingImages {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CapabilityProvider<ImageRequest, GeneratedImage> for RecordingImages {
        fn provider_id(&self) -> &str {
            "recorder"
        }

        async fn invoke(
            &self,
            _credential: Option<&Credential>,
            request: &ImageRequest,
        ) -> Result<GeneratedImage> {
            self.prompts.lock().expect("lock").push(request.prompt.clone());
            Ok(GeneratedImage::Url("https://images.test/1.png".to_string()))
        }
    }

    async fn draw(rewriter: Rewriter, idea: &str) -> (String, Vec<String>) {
        let pools = Arc::new(CredentialPools::from_map(HashMap::new(), Duration::ZERO));
        let images = Arc::new(RecordingImages::default());
        let capabilities = Capabilities {
            text: Arc::new(FallbackChain::new(Capability::TextGeneration, Arc::clone(&pools))),
            vision: Arc::new(FallbackChain::new(Capability::Vision, Arc::clone(&pools))),
            embedding: Arc::new(FallbackChain::new(Capability::Embedding, Arc::clone(&pools))),
            image: Arc::new(
                ImageChain::new(Capability::ImageSynthesis, Arc::clone(&pools))
                    .with_link(images.clone(), None),
            ),
            speech: Arc::new(FallbackChain::new(Capability::Speech, Arc::clone(&pools))),
            enrichment: Arc::new(
                TextChain::new(Capability::TextGeneration, Arc::clone(&pools))
                    .with_link(Arc::new(rewriter), Some(Duration::from_millis(50))),
            ),
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

        let ctx = TurnContext {
            mode: Mode::ImageGeneration,
            message: idea,
            system_prompt: "",
            history: &[],
            attachment: None,
            capabilities: &capabilities,
            max_attachment_bytes: 1024,
        };
        let reply = generate(&ctx).await.expect("reply");
        let prompts = images.prompts.lock().expect("lock").clone();
        (reply, prompts)
    }

    #[tokio::test]
    async fn enriched_prompt_reaches_the_image_chain() {
        let (reply, prompts) = draw(
            Rewriter::Answers("\"A ginger cat napping on a sunlit windowsill, 8k\""),
            "cat",
        )
        .await;
        assert_eq!(
            prompts,
            vec!["A ginger cat napping on a sunlit windowsill, 8k".to_string()]
        );
        assert!(reply.contains("✨ Prompt: A ginger cat napping"));
        assert!(!reply.contains("backup"));
    }

    #[tokio::test]
    async fn failed_enrichment_keeps_the_original_idea() {
        let (_, prompts) = draw(Rewriter::Fails, "  a red fox  ").await;
        assert_eq!(prompts, vec!["a red fox".to_string()]);
    }

    #[tokio::test]
    async fn slow_enrichment_keeps_the_original_idea() {
        let (reply, prompts) = draw(Rewriter::Hangs, "a red fox").await;
        assert_eq!(prompts, vec!["a red fox".to_string()]);
        assert!(reply.contains("✨ Prompt: a red fox</p>"));
    }

    #[test]
    fn skipped_primary_is_not_a_fallback() {
        let skipped = AttemptFailure {
            provider_id: "flux".to_string(),
            reason: FailureReason::CredentialMissing {
                pool: "huggingface".to_string(),
            },
        };
        let failed = AttemptFailure {
            provider_id: "flux".to_string(),
            reason: FailureReason::Status(503),
        };
        assert!(!primary_failed(&[]));
        assert!(!primary_failed(std::slice::from_ref(&skipped)));
        assert!(primary_failed(&[skipped, failed]));
    }

    #[test]
    fn inline_images_become_data_urls() {
        let image = GeneratedImage::Inline {
            mime_type: "image/jpeg".to_string(),
            bytes: Bytes::from_static(b"jpg"),
        };
        let html = render_image_reply(&image, "a cat", false);
        assert!(html.contains("src=\"data:image/jpeg;base64,anBn\""));
        assert!(html.contains("✨ Prompt: a cat</p>"));
        assert!(!html.contains("backup"));
    }

    #[test]
    fn backup_url_carries_notice_and_escaped_prompt() {
        let image = GeneratedImage::Url("https://image.pollinations.ai/prompt/x?nologo=true".into());
        let html = render_image_reply(&image, "<script>", true);
        assert!(html.contains("Switched to backup generator"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("src=\"https://image.pollinations.ai/prompt/x?nologo=true\""));
    }

    #[test]
    fn long_prompts_are_previewed() {
        let prompt = "x".repeat(150);
        let html = render_image_reply(&GeneratedImage::Url("u".into()), &prompt, false);
        assert!(html.contains(&format!("{}...", "x".repeat(100))));
    }
}
