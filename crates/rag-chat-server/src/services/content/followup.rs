use tracing::{debug, info};

use super::parser::parse_list;
use super::{history_excerpt, ContentService};
use crate::services::conversation::Turn;
use crate::utils::error::{ApiError, ParseError};

const QUESTION_COUNT: usize = 5;
const OVERVIEW_QUERY: &str = "overview of the main topics in the training material";

const SUGGESTION_INSTRUCTION: &str = "You help clinicians in training explore their course material. \
Reply with one question per line and nothing else.";

/// One question per line, bullets stripped, at most `QUESTION_COUNT`.
fn parse_questions(text: &str) -> Result<Vec<String>, ParseError> {
    let questions: Vec<String> = parse_list(text)
        .into_iter()
        .filter(|line| !line.ends_with(':'))
        .take(QUESTION_COUNT)
        .collect();

    if questions.is_empty() {
        return Err(ParseError::new("model suggested no questions", text));
    }
    Ok(questions)
}

impl ContentService {
    /// Starter questions drawn from an overview of the material.
    pub async fn suggest_questions(&self) -> Result<Vec<String>, ApiError> {
        let context = self.ground(OVERVIEW_QUERY).await;
        let output = self
            .generate(
                SUGGESTION_INSTRUCTION,
                &context,
                format!(
                    "Suggest {} questions a learner could ask about this material.",
                    QUESTION_COUNT
                ),
            )
            .await?;

        let questions = parse_questions(&output)?;
        info!("Suggested {} starter questions", questions.len());
        Ok(questions)
    }

    /// Questions that continue the conversation; starter questions when there is none.
    pub async fn follow_up_questions(&self, history: &[Turn]) -> Result<Vec<String>, ApiError> {
        let Some(last_question) = history
            .iter()
            .rev()
            .find(|turn| matches!(turn.role, crate::models::chat::Role::User))
        else {
            debug!("No conversation yet, falling back to starter questions");
            return self.suggest_questions().await;
        };

        let context = self.ground(&last_question.content).await;
        let output = self
            .generate(
                SUGGESTION_INSTRUCTION,
                &context,
                format!(
                    "Conversation so far:\n{}\n\nSuggest {} follow-up questions the learner could ask next.",
                    history_excerpt(history),
                    QUESTION_COUNT
                ),
            )
            .await?;

        let questions = parse_questions(&output)?;
        info!("Suggested {} follow-up questions", questions.len());
        Ok(questions)
    }
}
