use confidant_common::Result;
use tracing::warn;

use crate::handlers::TurnContext;
use crate::providers::{LlmRequest, SearchHit};

pub(crate) const RESEARCH_FAILED: &str = "⚠️ Research failed.";

/// Web search, then an answer grounded on the results. When the text chain
/// is exhausted the raw digest is the reply.
pub(super) async fn research(ctx: &TurnContext<'_>) -> Result<String> {
    let digest = match ctx.capabilities.search.search(ctx.message).await {
        Ok(hits) if !hits.is_empty() => render_digest(&hits),
        Ok(_) => RESEARCH_FAILED.to_string(),
        Err(e) => {
            warn!(
                "search via '{}' failed: {e}",
                ctx.capabilities.search.provider_id()
            );
            RESEARCH_FAILED.to_string()
        }
    };

    let request = LlmRequest::single_turn(
        Some(ctx.system_prompt.to_string()),
        format!("Context: {digest}\nQ: {}", ctx.message),
    );
    Ok(match ctx.capabilities.text.execute(&request).await.into_value() {
        Some(response) => response.text(),
        None => digest,
    })
}

pub(crate) fn render_digest(hits: &[SearchHit]) -> String {
    let body = hits
        .iter()
        .map(|hit| format!("🔹 **{}**\n{}", hit.title, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("📊 **Research:**\n\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_lists_each_hit() {
        let hits = vec![
            SearchHit {
                title: "Pune".to_string(),
                snippet: "A city in Maharashtra.".to_string(),
                url: None,
            },
            SearchHit {
                title: "Shaniwar Wada".to_string(),
                snippet: "A fortification.".to_string(),
                url: None,
            },
        ];
        assert_eq!(
            render_digest(&hits),
            "📊 **Research:**\n\n🔹 **Pune**\nA city in Maharashtra.\n\n🔹 **Shaniwar Wada**\nA fortification."
        );
    }
}
