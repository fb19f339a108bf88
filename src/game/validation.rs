//! Input sanitation for names, questions, answers, guesses and session codes

use super::error::{GameError, GameResult};
use crate::config::GameConfig;
use regex::Regex;
use std::sync::LazyLock;

/// Length of a session code
pub const SESSION_CODE_LEN: usize = 8;

/// Session codes as typed by users, any case
static SESSION_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{8}$").unwrap());

/// Trim a display name and check its length
pub fn validate_name(name: &str, rules: &GameConfig) -> GameResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GameError::validation("Please enter a valid username"));
    }
    if name.chars().count() > rules.max_name_len {
        return Err(GameError::validation(format!(
            "Username must be {} characters or less",
            rules.max_name_len
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(GameError::validation("Username contains invalid characters"));
    }
    Ok(name.to_string())
}

/// Trim a question/answer pair and check both lengths
pub fn validate_question(
    question: &str,
    answer: &str,
    rules: &GameConfig,
) -> GameResult<(String, String)> {
    let question = question.trim();
    let answer = answer.trim();

    if question.is_empty() || answer.is_empty() {
        return Err(GameError::validation("Question and answer cannot be empty"));
    }
    if question.chars().count() > rules.max_question_len {
        return Err(GameError::validation(format!(
            "Question is too long (max {} characters)",
            rules.max_question_len
        )));
    }
    if answer.chars().count() > rules.max_answer_len {
        return Err(GameError::validation(format!(
            "Answer is too long (max {} characters)",
            rules.max_answer_len
        )));
    }

    Ok((question.to_string(), answer.to_string()))
}

/// Trim a guess and check its length
pub fn validate_guess(guess: &str, rules: &GameConfig) -> GameResult<String> {
    let guess = guess.trim();
    if guess.is_empty() {
        return Err(GameError::validation("Guess cannot be empty"));
    }
    if guess.chars().count() > rules.max_answer_len {
        return Err(GameError::validation(format!(
            "Guess is too long (max {} characters)",
            rules.max_answer_len
        )));
    }
    Ok(guess.to_string())
}

/// Normalize a user-typed session code to its stored upper-case form
pub fn normalize_session_code(code: &str) -> GameResult<String> {
    let code = code.trim();
    if !SESSION_CODE_RE.is_match(code) {
        return Err(GameError::validation("Invalid session code"));
    }
    Ok(code.to_ascii_uppercase())
}

/// Comparison form of an answer or guess
pub fn normalize_answer(text: &str) -> String {
    text.trim().to_lowercase()
}
