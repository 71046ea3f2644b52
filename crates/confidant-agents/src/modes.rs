use serde::Serialize;
use tracing::warn;

use confidant_config::HistoryConfig;

/// Characters of the first message kept in a new session's title.
const TITLE_SNIPPET_CHARS: usize = 20;

/// Every capability a chat turn can be routed to. Unknown mode strings
/// resolve to [`Mode::Chat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Chat,
    Coding,
    Vision,
    ImageGeneration,
    Conversion,
    Research,
    PromptWriter,
    GrammarFixer,
    SmartTodo,
    InterviewQuestions,
    ColdEmail,
    FitnessCoach,
    FeynmanExplainer,
    MathSolver,
    MovieTalker,
    AnimeTalker,
    SingWithMe,
    MockInterviewer,
    ResumeBuilder,
    GithubReview,
    PasswordGenerator,
}

impl Mode {
    pub const ALL: [Mode; 21] = [
        Mode::Chat,
        Mode::Coding,
        Mode::Vision,
        Mode::ImageGeneration,
        Mode::Conversion,
        Mode::Research,
        Mode::PromptWriter,
        Mode::GrammarFixer,
        Mode::SmartTodo,
        Mode::InterviewQuestions,
        Mode::ColdEmail,
        Mode::FitnessCoach,
        Mode::FeynmanExplainer,
        Mode::MathSolver,
        Mode::MovieTalker,
        Mode::AnimeTalker,
        Mode::SingWithMe,
        Mode::MockInterviewer,
        Mode::ResumeBuilder,
        Mode::GithubReview,
        Mode::PasswordGenerator,
    ];

    /// Resolve a client mode string. The flag is `false` when the string was
    /// not recognized and the default chat mode was substituted.
    pub fn parse(raw: &str) -> (Mode, bool) {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        let mode = match normalized.as_str() {
            "" | "chat" => Mode::Chat,
            "coding" | "code" | "code_debugger" => Mode::Coding,
            "vision" => Mode::Vision,
            "image_gen" | "image_generation" | "image" => Mode::ImageGeneration,
            "conversion" | "convert" => Mode::Conversion,
            "research" => Mode::Research,
            "prompt_writer" => Mode::PromptWriter,
            "grammar_fixer" => Mode::GrammarFixer,
            "smart_todo" => Mode::SmartTodo,
            "interview_questions" => Mode::InterviewQuestions,
            "cold_email" => Mode::ColdEmail,
            "fitness_coach" => Mode::FitnessCoach,
            "feynman_explainer" => Mode::FeynmanExplainer,
            "math_solver" => Mode::MathSolver,
            "movie_talker" => Mode::MovieTalker,
            "anime_talker" => Mode::AnimeTalker,
            "sing_with_me" => Mode::SingWithMe,
            "mock_interviewer" => Mode::MockInterviewer,
            "resume_builder" => Mode::ResumeBuilder,
            "github_review" => Mode::GithubReview,
            "password_generator" => Mode::PasswordGenerator,
            _ => {
                warn!("unknown mode '{raw}', routing to chat");
                return (Mode::Chat, false);
            }
        };
        (mode, true)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Coding => "coding",
            Mode::Vision => "vision",
            Mode::ImageGeneration => "image_gen",
            Mode::Conversion => "conversion",
            Mode::Research => "research",
            Mode::PromptWriter => "prompt_writer",
            Mode::GrammarFixer => "grammar_fixer",
            Mode::SmartTodo => "smart_todo",
            Mode::InterviewQuestions => "interview_questions",
            Mode::ColdEmail => "cold_email",
            Mode::FitnessCoach => "fitness_coach",
            Mode::FeynmanExplainer => "feynman_explainer",
            Mode::MathSolver => "math_solver",
            Mode::MovieTalker => "movie_talker",
            Mode::AnimeTalker => "anime_talker",
            Mode::SingWithMe => "sing_with_me",
            Mode::MockInterviewer => "mock_interviewer",
            Mode::ResumeBuilder => "resume_builder",
            Mode::GithubReview => "github_review",
            Mode::PasswordGenerator => "password_generator",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Mode::Chat => "Chat",
            Mode::Coding => "Code Debugger",
            Mode::Vision => "Vision",
            Mode::ImageGeneration => "Image Gen",
            Mode::Conversion => "Conversion",
            Mode::Research => "Research",
            Mode::PromptWriter => "Prompt Writer",
            Mode::GrammarFixer => "Grammar Fixer",
            Mode::SmartTodo => "Smart Todo",
            Mode::InterviewQuestions => "Interview Questions",
            Mode::ColdEmail => "Cold Email",
            Mode::FitnessCoach => "Fitness Coach",
            Mode::FeynmanExplainer => "Feynman Explainer",
            Mode::MathSolver => "Math Solver",
            Mode::MovieTalker => "Movie Talker",
            Mode::AnimeTalker => "Anime Talker",
            Mode::SingWithMe => "Sing With Me",
            Mode::MockInterviewer => "Mock Interviewer",
            Mode::ResumeBuilder => "Resume Builder",
            Mode::GithubReview => "Github Review",
            Mode::PasswordGenerator => "Password Generator",
        }
    }

    pub fn title_prefix(&self) -> String {
        match self {
            Mode::Chat => "Chat".to_string(),
            other => format!("Tool: {}", other.display_name()),
        }
    }

    /// How many stored messages the handler sees as conversation history.
    pub fn history_window(&self, history: &HistoryConfig) -> usize {
        match self {
            Mode::Chat | Mode::Coding => history.chat_window,
            Mode::MovieTalker | Mode::AnimeTalker | Mode::SingWithMe => history.persona_window,
            _ => 0,
        }
    }

    /// Modes answered in the assistant's own voice, with persona and memory.
    pub fn uses_persona(&self) -> bool {
        matches!(self, Mode::Chat | Mode::Coding | Mode::Vision | Mode::Research)
    }

    /// Only plain conversation feeds the memory pipeline.
    pub fn extracts_memory(&self) -> bool {
        matches!(self, Mode::Chat)
    }
}

/// Title for a session created by its first message. Truncation counts
/// characters, not bytes.
pub fn session_title(mode: Mode, first_message: &str) -> String {
    let trimmed = first_message.trim();
    let mut chars = trimmed.chars();
    let snippet: String = chars.by_ref().take(TITLE_SNIPPET_CHARS).collect();
    let ellipsis = if chars.next().is_some() { "..." } else { "" };
    format!("{} - {snippet}{ellipsis}", mode.title_prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_falls_back_to_chat() {
        assert_eq!(Mode::parse("does_not_exist"), (Mode::Chat, false));
        assert_eq!(Mode::parse(""), (Mode::Chat, true));
    }

    #[test]
    fn aliases_resolve() {
        assert_eq!(Mode::parse("code_debugger").0, Mode::Coding);
        assert_eq!(Mode::parse("Image-Gen").0, Mode::ImageGeneration);
        assert_eq!(Mode::parse("convert").0, Mode::Conversion);
    }

    #[test]
    fn every_mode_round_trips_through_its_name() {
        for mode in Mode::ALL {
            assert_eq!(Mode::parse(mode.as_str()), (mode, true), "{mode:?}");
        }
    }

    #[test]
    fn titles_truncate_on_characters() {
        assert_eq!(session_title(Mode::Chat, "hello"), "Chat - hello");
        assert_eq!(
            session_title(Mode::Chat, "my name is Asha, I live in Pune"),
            "Chat - my name is Asha, I l..."
        );
        assert_eq!(
            session_title(Mode::GrammarFixer, "नमस्ते दुनिया यह एक लंबा वाक्य है"),
            "Tool: Grammar Fixer - नमस्ते दुनिया यह एक ..."
        );
    }

    #[test]
    fn history_windows_depend_on_mode() {
        let history = HistoryConfig {
            chat_window: 15,
            persona_window: 6,
        };
        assert_eq!(Mode::Chat.history_window(&history), 15);
        assert_eq!(Mode::AnimeTalker.history_window(&history), 6);
        assert_eq!(Mode::SingWithMe.history_window(&history), 6);
        assert_eq!(Mode::MockInterviewer.history_window(&history), 0);
        assert_eq!(Mode::GrammarFixer.history_window(&history), 0);
    }
}
