//! One handler per [`Mode`]. Handlers return the reply text; provider
//! exhaustion is already folded into a soft message, so an `Err` here is
//! either an attachment problem (shown to the user) or unexpected.

mod chat;
mod conversion;
mod flashcards;
mod github;
mod image;
mod research;
mod tools;
mod vision;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use confidant_common::{Error, Message, Result};
use serde::Deserialize;

use crate::chains::Capabilities;
use crate::modes::Mode;

pub use flashcards::{Flashcard, FlashcardOutcome, generate_flashcards, parse_flashcards};
pub use github::github_username;
pub use image::render_image_reply;
pub use tools::generate_password;

/// A file sent along with a chat turn.
#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    /// Base64 payload, optionally as a full `data:` URL.
    #[serde(default)]
    pub data: String,
    /// May be omitted when `data` is a `data:` URL.
    #[serde(default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAttachment {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DecodedAttachment {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}

/// Decode an attachment payload, accepting bare base64 or a `data:` URL.
pub fn decode_attachment(attachment: &Attachment, max_bytes: usize) -> Result<DecodedAttachment> {
    let raw = attachment.data.trim();
    let (mime_from_url, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                Error::AttachmentDecode("⚠️ The attached file looks corrupted.".to_string())
            })?;
            let mime = header.split(';').next().unwrap_or_default();
            (Some(mime).filter(|m| !m.is_empty()), payload)
        }
        None => (None, raw),
    };

    if payload.is_empty() {
        return Err(Error::AttachmentDecode(
            "⚠️ The attached file is empty.".to_string(),
        ));
    }
    // Base64 expands by 4/3; reject obviously oversized payloads before decoding.
    if payload.len() / 4 * 3 > max_bytes.saturating_add(3) {
        return Err(too_large(max_bytes));
    }

    let bytes = STANDARD.decode(payload).map_err(|_| {
        Error::AttachmentDecode("⚠️ Could not read the attached file. Please re-upload it.".to_string())
    })?;
    if bytes.len() > max_bytes {
        return Err(too_large(max_bytes));
    }

    let mime_type = mime_from_url
        .map(str::to_string)
        .unwrap_or_else(|| attachment.mime_type.trim().to_lowercase());
    if mime_type.is_empty() {
        return Err(Error::AttachmentDecode(
            "⚠️ Couldn't tell what kind of file that is. Please attach it again.".to_string(),
        ));
    }
    Ok(DecodedAttachment { mime_type, bytes })
}

fn too_large(max_bytes: usize) -> Error {
    Error::AttachmentDecode(format!(
        "⚠️ The attached file is too large (limit {} MB).",
        max_bytes / (1024 * 1024)
    ))
}

/// Everything a handler needs for one turn.
pub struct TurnContext<'a> {
    pub mode: Mode,
    pub message: &'a str,
    pub system_prompt: &'a str,
    /// Prior turns, oldest first, already bounded by the mode's window.
    pub history: &'a [Message],
    pub attachment: Option<&'a Attachment>,
    pub capabilities: &'a Capabilities,
    pub max_attachment_bytes: usize,
}

impl TurnContext<'_> {
    fn decoded_attachment(&self) -> Result<Option<DecodedAttachment>> {
        self.attachment
            .map(|attachment| decode_attachment(attachment, self.max_attachment_bytes))
            .transpose()
    }
}

/// Route a turn to its handler. Every mode has an arm; unknown client
/// strings were already mapped to [`Mode::Chat`] by [`Mode::parse`].
pub async fn dispatch(ctx: &TurnContext<'_>) -> Result<String> {
    match ctx.mode {
        Mode::Chat | Mode::Coding => {
            if let Some(image) = ctx.decoded_attachment()?.filter(is_image) {
                return vision::describe(ctx, &image).await;
            }
            chat::respond(ctx).await
        }
        Mode::Vision => match ctx.decoded_attachment()? {
            Some(image) if is_image(&image) => vision::describe(ctx, &image).await,
            Some(_) => Err(Error::AttachmentDecode(
                "⚠️ Vision mode needs an image attachment.".to_string(),
            )),
            None => chat::respond(ctx).await,
        },
        Mode::MathSolver => match ctx.decoded_attachment()?.filter(is_image) {
            Some(image) => vision::solve_math(ctx, &image).await,
            None => tools::run(ctx).await,
        },
        Mode::ImageGeneration => image::generate(ctx).await,
        Mode::Conversion => conversion::convert(ctx).await,
        Mode::Research => research::research(ctx).await,
        Mode::GithubReview => github::review(ctx).await,
        Mode::PasswordGenerator => Ok(tools::password_reply(ctx.message)),
        Mode::PromptWriter
        | Mode::GrammarFixer
        | Mode::SmartTodo
        | Mode::InterviewQuestions
        | Mode::ColdEmail
        | Mode::FitnessCoach
        | Mode::FeynmanExplainer
        | Mode::MovieTalker
        | Mode::AnimeTalker
        | Mode::SingWithMe
        | Mode::MockInterviewer
        | Mode::ResumeBuilder => tools::run(ctx).await,
    }
}

fn is_image(attachment: &DecodedAttachment) -> bool {
    attachment.mime_type.starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(data: &str, mime: &str) -> Attachment {
        Attachment {
            data: data.to_string(),
            mime_type: mime.to_string(),
        }
    }

    #[test]
    fn decodes_bare_base64_and_data_urls() {
        let bare = decode_attachment(&attachment("aGVsbG8=", "text/plain"), 1024).expect("bare");
        assert_eq!(bare.bytes, b"hello");
        assert_eq!(bare.mime_type, "text/plain");

        let url = decode_attachment(
            &attachment("data:image/png;base64,aGVsbG8=", "application/octet-stream"),
            1024,
        )
        .expect("data url");
        assert_eq!(url.mime_type, "image/png");
        assert_eq!(url.data_url(), "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let err = decode_attachment(&attachment("not base64!!", "image/png"), 1024)
            .expect_err("invalid");
        assert!(matches!(err, Error::AttachmentDecode(_)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = STANDARD.encode(vec![0u8; 2048]);
        let err =
            decode_attachment(&attachment(&payload, "image/png"), 1024).expect_err("too large");
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn missing_mime_type_is_a_decode_error() {
        let err = decode_attachment(&attachment("aGVsbG8=", "  "), 1024).expect_err("no mime");
        assert!(matches!(err, Error::AttachmentDecode(_)));

        let url = decode_attachment(&attachment("data:text/plain;base64,aGVsbG8=", ""), 1024)
            .expect("mime from data url");
        assert_eq!(url.mime_type, "text/plain");
    }

    #[test]
    fn empty_payload_is_rejected() {
        let err = decode_attachment(&attachment("data:image/png;base64,", "image/png"), 1024)
            .expect_err("empty");
        assert!(err.to_string().contains("empty"));
    }
}
