use confidant_common::Result;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::handlers::TurnContext;
use crate::modes::Mode;
use crate::providers::{ChatMessage, LlmRequest};

const PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";
const DEFAULT_PASSWORD_LEN: usize = 12;

/// Single-shot template tools and the persona talkers.
pub(super) async fn run(ctx: &TurnContext<'_>) -> Result<String> {
    let mut messages: Vec<ChatMessage> = ctx.history.iter().map(ChatMessage::from).collect();
    messages.push(ChatMessage::user(ctx.message));

    let request = LlmRequest {
        model: None,
        messages,
        system: Some(instruction(ctx.mode).to_string()),
        max_tokens: None,
        temperature: None,
    };

    let chain = &ctx.capabilities.text;
    Ok(match chain.execute(&request).await.into_value() {
        Some(response) => response.text(),
        None => chain.capability().unavailable_message().to_string(),
    })
}

pub(super) fn instruction(mode: Mode) -> &'static str {
    match mode {
        Mode::PromptWriter => {
            "Write a professional, detailed AI image generation prompt for the user's idea. \
             Return only the prompt."
        }
        Mode::GrammarFixer => {
            "Fix the grammar of the user's text and make it sound professional. \
             Return the corrected text, then a short list of the main changes."
        }
        Mode::SmartTodo => {
            "Convert the user's notes into a to-do list. Group related items and mark each \
             with a priority (High, Medium, Low)."
        }
        Mode::InterviewQuestions => {
            "Generate 10 hard, realistic interview questions for the role the user names."
        }
        Mode::ColdEmail => {
            "Write a concise, compelling, action-oriented cold email to a hiring manager or \
             recruiter from the details the user gives. Do not leave placeholder brackets for \
             information the user already provided."
        }
        Mode::FitnessCoach => {
            "Act as an expert fitness coach specializing in home workouts, calisthenics and \
             boxing. Give a structured, actionable routine or diet advice with bold headings \
             and bullet points, in a motivating tone."
        }
        Mode::FeynmanExplainer => {
            "Explain the concept using the Feynman Technique, simply enough for a 10-year-old, \
             with relatable real-life analogies and no jargon."
        }
        Mode::MathSolver => "Solve this math problem step by step and state the final answer clearly.",
        Mode::MovieTalker => {
            "Act as an enthusiastic movie and web series geek who loves \"Lucifer\" and knows \
             every film. Reply like a best friend gossiping, explaining plots or discussing theories."
        }
        Mode::AnimeTalker => {
            "Act as a hardcore anime fan who adores Kiyotaka Ayanokoji from \"Classroom of the \
             Elite\" and the action of \"Solo Leveling\". Discuss lore and character theories \
             like a fellow fan."
        }
        Mode::SingWithMe => {
            "We are singing together. Continue the song from the user's line with the next \
             line, keeping the rhythm and rhyme. Reply with the lyric only, wrapped in 🎶."
        }
        Mode::MockInterviewer => {
            "You are a professional interviewer running a mock interview. Respond to what the \
             candidate said with brief feedback, then ask the next question."
        }
        Mode::ResumeBuilder => {
            "Create a clean, professional resume structure from the user's details, with \
             sections for summary, experience, skills and education in markdown."
        }
        Mode::Coding => {
            "Act as a senior software architect. Identify the bug in the user's code or error, \
             briefly explain why it happens, and give the corrected code in markdown code blocks."
        }
        Mode::Chat
        | Mode::Vision
        | Mode::ImageGeneration
        | Mode::Conversion
        | Mode::Research
        | Mode::GithubReview
        | Mode::PasswordGenerator => "You are a helpful assistant.",
    }
}

/// Reply for the local password generator. The first number in the message
/// between 8 and 64 sets the length.
pub(super) fn password_reply(message: &str) -> String {
    format!("🔐 Your new password: `{}`", generate_password(requested_length(message)))
}

pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    let mut password: Vec<u8> = (0..length)
        .filter_map(|_| PASSWORD_CHARSET.choose(&mut rng).copied())
        .collect();
    // At least one symbol.
    if !password.iter().any(|c| b"!@#$%^&*".contains(c)) && !password.is_empty() {
        let idx = rng.random_range(0..password.len());
        password[idx] = b"!@#$%^&*"[rng.random_range(0..8)];
    }
    String::from_utf8_lossy(&password).into_owned()
}

fn requested_length(message: &str) -> usize {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|token| token.parse::<usize>().ok())
        .find(|n| (8..=64).contains(n))
        .unwrap_or(DEFAULT_PASSWORD_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_uses_requested_length_and_charset() {
        let password = generate_password(20);
        assert_eq!(password.len(), 20);
        assert!(password.bytes().all(|c| PASSWORD_CHARSET.contains(&c)));
    }

    #[test]
    fn length_comes_from_message() {
        assert_eq!(requested_length("make one"), 12);
        assert_eq!(requested_length("I need a 16 character password"), 16);
        assert_eq!(requested_length("give me 3 of length 200"), 12);
    }

    #[test]
    fn template_modes_have_their_own_instruction() {
        let generic = instruction(Mode::Chat);
        for mode in [
            Mode::SingWithMe,
            Mode::MockInterviewer,
            Mode::ResumeBuilder,
            Mode::GrammarFixer,
        ] {
            assert_ne!(instruction(mode), generic, "{mode:?}");
        }
        assert!(instruction(Mode::MockInterviewer).contains("interviewer"));
    }

    #[test]
    fn reply_wraps_password_in_code() {
        let reply = password_reply("password please");
        assert!(reply.starts_with("🔐 Your new password: `"));
        assert!(reply.ends_with('`'));
    }
}
