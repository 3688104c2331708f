use tracing::info;

use super::parser::extract_block;
use super::{history_excerpt, ContentService};
use crate::services::conversation::Turn;
use crate::utils::error::{ApiError, ParseError};

const DIAGRAM_INSTRUCTION: &str = "You draw study diagrams for clinicians in training. \
Return only a Mermaid diagram in a ```mermaid block. Prefer a flowchart for processes \
and keep node labels short.";

const DIAGRAM_KEYWORDS: &[&str] = &[
    "graph",
    "flowchart",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "stateDiagram-v2",
    "erDiagram",
    "journey",
    "gantt",
    "pie",
    "mindmap",
    "timeline",
];

/// Mermaid source from model output. The first token must name a diagram type.
pub fn parse_mermaid(text: &str) -> Result<String, ParseError> {
    let body = extract_block(text, "mermaid")?;

    let first = body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("%%"))
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or_default();

    if !DIAGRAM_KEYWORDS.contains(&first) {
        return Err(ParseError::new(
            format!("unrecognised diagram type '{}'", first),
            text,
        ));
    }
    Ok(body.to_string())
}

impl ContentService {
    pub async fn generate_diagram(&self, topic: &str, history: &[Turn]) -> Result<String, ApiError> {
        let context = self.ground(topic).await;

        let mut request = format!("Draw a diagram of {}.", topic);
        if !history.is_empty() {
            request.push_str("\n\nRecent conversation:\n");
            request.push_str(&history_excerpt(history));
        }

        let output = self.generate(DIAGRAM_INSTRUCTION, &context, request).await?;
        let mermaid = parse_mermaid(&output)?;

        info!("Generated diagram on '{}' ({} lines)", topic, mermaid.lines().count());
        Ok(mermaid)
    }
}
