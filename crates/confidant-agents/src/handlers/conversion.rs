use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use confidant_common::{Error, Result};

use crate::handlers::TurnContext;
use crate::providers::LlmRequest;

/// Characters of the source document sent upstream.
const MAX_SOURCE_CHARS: usize = 12_000;

const TEXT_LIKE: &[&str] = &[
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/yaml",
    "text/csv",
    "text/markdown",
];

/// Convert a text-like attachment into the format the message asks for and
/// attach the result as a downloadable file.
pub(super) async fn convert(ctx: &TurnContext<'_>) -> Result<String> {
    let Some(attachment) = ctx.decoded_attachment()? else {
        return Err(Error::AttachmentDecode(
            "⚠️ Please attach the file you want to convert.".to_string(),
        ));
    };
    if !is_text_like(&attachment.mime_type) {
        return Err(Error::AttachmentDecode(format!(
            "⚠️ I can't convert {} files yet. Try a text, CSV, JSON or Markdown file.",
            attachment.mime_type
        )));
    }
    let source = String::from_utf8(attachment.bytes).map_err(|_| {
        Error::AttachmentDecode("⚠️ The attached file is not valid UTF-8 text.".to_string())
    })?;

    let target = Some(ctx.message.trim())
        .filter(|m| !m.is_empty())
        .unwrap_or("Convert this file to clean Markdown.");
    let excerpt: String = source.chars().take(MAX_SOURCE_CHARS).collect();
    let request = LlmRequest::single_turn(
        Some(
            "You convert documents between formats. Return ONLY the converted document, \
             without commentary or code fences."
                .to_string(),
        ),
        format!("Instruction: {target}\n\nSource ({}):\n{excerpt}", attachment.mime_type),
    );

    let chain = &ctx.capabilities.text;
    let Some(response) = chain.execute(&request).await.into_value() else {
        return Ok(chain.capability().unavailable_message().to_string());
    };
    let converted = strip_code_fence(&response.text());
    let link = format!(
        "data:text/plain;charset=utf-8;base64,{}",
        STANDARD.encode(converted.as_bytes())
    );
    Ok(format!(
        "✅ Conversion complete.\n\n```\n{converted}\n```\n\n<a href=\"{link}\" download=\"converted.txt\">⬇️ Download</a>"
    ))
}

fn is_text_like(mime_type: &str) -> bool {
    mime_type.starts_with("text/") || TEXT_LIKE.contains(&mime_type)
}

fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag line, then the closing fence.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim().to_string()
}
