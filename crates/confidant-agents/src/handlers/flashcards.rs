use confidant_common::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chains::TextChain;
use crate::providers::LlmRequest;

const CARD_COUNT: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlashcardOutcome {
    Deck(Vec<Flashcard>),
    /// The model answered, but not with a usable card array.
    Malformed(String),
}

/// Ask the text chain for a study deck on `topic`. Exhaustion is an
/// `Error::ProviderUnavailable`.
pub async fn generate_flashcards(chain: &TextChain, topic: &str) -> Result<FlashcardOutcome> {
    let request = LlmRequest::single_turn(
        None,
        format!(
            "You are an expert study assistant. Generate exactly {CARD_COUNT} highly effective \
             flashcards for the topic: \"{topic}\". Questions should be conceptual and answers \
             clear and concise. Return ONLY a JSON array like \
             [{{\"question\": \"...\", \"answer\": \"...\"}}] with no other text or markdown."
        ),
    );
    let raw = chain.execute(&request).await.into_result()?.text();
    Ok(match parse_flashcards(&raw) {
        Some(cards) => FlashcardOutcome::Deck(cards),
        None => {
            warn!("flashcard reply was not a card array");
            FlashcardOutcome::Malformed(raw)
        }
    })
}

/// Parse a card array, tolerating code fences and text around the array.
/// Cards with a blank side are dropped; an empty deck is `None`.
pub fn parse_flashcards(raw: &str) -> Option<Vec<Flashcard>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    let cards: Vec<Flashcard> = serde_json::from_str(&raw[start..=end]).ok()?;
    let cards: Vec<Flashcard> = cards
        .into_iter()
        .filter(|card| !card.question.trim().is_empty() && !card.answer.trim().is_empty())
        .collect();
    (!cards.is_empty()).then_some(cards)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_parsed() {
        let raw = "```json\n[{\"question\": \"What is Rust?\", \"answer\": \"A systems language.\"}]\n```";
        let cards = parse_flashcards(raw).expect("cards");
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].answer, "A systems language.");
    }

    #[test]
    fn blank_cards_are_dropped() {
        let raw = r#"[{"question": "Q1", "answer": "A1"}, {"question": " ", "answer": "A2"}]"#;
        assert_eq!(parse_flashcards(raw).expect("cards").len(), 1);
    }

    #[test]
    fn prose_is_not_a_deck() {
        assert_eq!(parse_flashcards("Sorry, I can't help with that."), None);
        assert_eq!(parse_flashcards("[]"), None);
        assert_eq!(parse_flashcards("] oops ["), None);
    }
}
