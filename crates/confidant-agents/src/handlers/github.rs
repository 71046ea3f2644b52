use confidant_common::Result;
use tracing::warn;

use crate::handlers::TurnContext;
use crate::providers::{GitHubProfile, LlmRequest};

const INVALID_URL_REPLY: &str = "⚠️ Invalid GitHub URL. Send a profile link like https://github.com/octocat.";
const NOT_FOUND_REPLY: &str = "⚠️ GitHub user not found.";
const UNREACHABLE_REPLY: &str = "⚠️ Could not reach GitHub right now. Please try again later.";

/// Fetch the profile, then ask the text chain for a rating and advice.
pub(super) async fn review(ctx: &TurnContext<'_>) -> Result<String> {
    let Some(username) = github_username(ctx.message) else {
        return Ok(INVALID_URL_REPLY.to_string());
    };

    let profile = match ctx.capabilities.github.profile(&username).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return Ok(NOT_FOUND_REPLY.to_string()),
        Err(e) => {
            warn!("github lookup for '{username}' failed: {e}");
            return Ok(UNREACHABLE_REPLY.to_string());
        }
    };

    let chain = &ctx.capabilities.text;
    let request = LlmRequest::single_turn(None, review_prompt(&profile));
    Ok(match chain.execute(&request).await.into_value() {
        Some(response) => response.text(),
        None => chain.capability().unavailable_message().to_string(),
    })
}

fn review_prompt(profile: &GitHubProfile) -> String {
    let recent = if profile.recent_repos.is_empty() {
        "none".to_string()
    } else {
        profile.recent_repos.join(", ")
    };
    format!(
        "Review GitHub Profile: {}, Bio: {}, Repos: {}, Recent: {recent}. \
         Give a rating out of 10 and concrete advice.",
        profile.login,
        profile.bio.as_deref().unwrap_or("none"),
        profile.public_repos,
    )
}

/// Username from a profile URL or a bare handle.
pub fn github_username(input: &str) -> Option<String> {
    let trimmed = input.trim().trim_end_matches('/');
    let without_query = trimmed.split(['?', '#']).next().unwrap_or_default();
    let candidate = without_query
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim_start_matches('@');

    let valid = !candidate.is_empty()
        && candidate.len() <= 39
        && !candidate.starts_with('-')
        && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then(|| candidate.to_string())
}
