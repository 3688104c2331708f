use serde::Deserialize;
use tracing::info;

use super::parser::parse_json;
use super::{history_excerpt, ContentService};
use crate::models::content::{QuizFeedbackRequest, QuizQuestion, QuizRequest};
use crate::services::conversation::Turn;
use crate::utils::error::{ApiError, ParseError};

const DEFAULT_QUESTION_COUNT: usize = 5;
const MAX_QUESTION_COUNT: usize = 20;

const QUIZ_INSTRUCTION: &str = "You write multiple-choice quizzes for clinicians in training. \
Return only JSON in a ```json block: an array of objects with keys \
\"question\", \"options\" (4 strings), \"answer\" (the exact text of the correct option) \
and \"explanation\".";

#[derive(Deserialize)]
#[serde(untagged)]
enum QuizPayload {
    Wrapped { questions: Vec<QuizQuestion> },
    Bare(Vec<QuizQuestion>),
}

/// Accepts `{"questions": [...]}` or a bare array; every question needs
/// text and at least two options.
pub fn parse_quiz(text: &str) -> Result<Vec<QuizQuestion>, ParseError> {
    let questions = match parse_json::<QuizPayload>(text)? {
        QuizPayload::Wrapped { questions } => questions,
        QuizPayload::Bare(questions) => questions,
    };

    if questions.is_empty() {
        return Err(ParseError::new("quiz contains no questions", text));
    }

    for (i, q) in questions.iter().enumerate() {
        if q.question.trim().is_empty() || q.options.len() < 2 {
            return Err(ParseError::new(
                format!("quiz question {} is incomplete", i + 1),
                text,
            ));
        }
    }

    Ok(questions)
}

/// Renders quiz feedback as a learner message; `None` when there is nothing to discuss.
pub fn feedback_message(request: &QuizFeedbackRequest) -> Option<String> {
    if let Some(prompt) = request.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        return Some(prompt.to_string());
    }
    if request.incorrect.is_empty() {
        return None;
    }

    let mut message = String::from(
        "I got these quiz questions wrong. For each one, explain the correct answer and why my choice was wrong:\n",
    );
    for (i, miss) in request.incorrect.iter().enumerate() {
        message.push_str(&format!("\n{}. {}\n", i + 1, miss.question.trim()));
        if let Some(selected) = miss.selected.as_deref() {
            message.push_str(&format!("   My answer: {}\n", selected.trim()));
        }
        message.push_str(&format!("   Correct answer: {}\n", miss.correct.trim()));
    }
    Some(message.trim_end().to_string())
}

impl ContentService {
    pub async fn generate_quiz(
        &self,
        request: &QuizRequest,
        history: &[Turn],
    ) -> Result<Vec<QuizQuestion>, ApiError> {
        let count = request
            .count
            .unwrap_or(DEFAULT_QUESTION_COUNT)
            .clamp(1, MAX_QUESTION_COUNT);
        let difficulty = request.difficulty.as_deref().unwrap_or("medium");

        let context = self.ground(&request.topic).await;

        let mut prompt = format!(
            "Write {} {} difficulty questions about {}.",
            count, difficulty, request.topic
        );
        if !history.is_empty() {
            prompt.push_str("\n\nTest what the learner has been discussing:\n");
            prompt.push_str(&history_excerpt(history));
        }

        let output = self.generate(QUIZ_INSTRUCTION, &context, prompt).await?;

        let mut questions = parse_quiz(&output)?;
        questions.truncate(count);

        info!("Generated {} quiz questions on '{}'", questions.len(), request.topic);
        Ok(questions)
    }
}
