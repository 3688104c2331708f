use serde::{Deserialize, Serialize};

fn default_topic() -> String {
    "the training material".to_string()
}

// ===== QUIZ =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    #[serde(alias = "correct_answer", alias = "correct")]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuizRequest {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncorrectAnswer {
    pub question: String,
    #[serde(default)]
    pub selected: Option<String>,
    pub correct: String,
}

/// Either a free-form prompt or a list of missed questions.
#[derive(Debug, Deserialize)]
pub struct QuizFeedbackRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub incorrect: Vec<IncorrectAnswer>,
}

// ===== MIND MAP / DIAGRAM =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub children: Vec<MindMapNode>,
}

impl MindMapNode {
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(MindMapNode::node_count).sum::<usize>()
    }
}

#[derive(Debug, Deserialize)]
pub struct TopicRequest {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MindMapResponse {
    pub topic: String,
    pub nodes: Vec<MindMapNode>,
}

#[derive(Debug, Serialize)]
pub struct DiagramResponse {
    pub topic: String,
    pub mermaid: String,
}

// ===== SUGGESTIONS =====

#[derive(Debug, Deserialize)]
pub struct FollowUpRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub suggested_questions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FollowUpResponse {
    pub session_id: String,
    pub questions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiz_question_accepts_correct_answer_alias() {
        let q: QuizQuestion = serde_json::from_str(
            r#"{"question":"Q?","options":["a","b"],"correct_answer":"a"}"#,
        )
        .unwrap();
        assert_eq!(q.answer, "a");
        assert!(q.explanation.is_none());
    }

    #[test]
    fn test_node_count() {
        let tree: MindMapNode = serde_json::from_str(
            r#"{"id":1,"title":"IVF","children":[{"id":2,"title":"Stimulation"},{"id":3,"title":"Transfer","children":[{"id":4,"title":"Fresh"}]}]}"#,
        )
        .unwrap();
        assert_eq!(tree.node_count(), 4);
    }
}
