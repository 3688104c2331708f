use serde::Deserialize;
use tracing::info;

use super::parser::parse_json;
use super::{history_excerpt, ContentService};
use crate::models::content::MindMapNode;
use crate::services::conversation::Turn;
use crate::utils::error::{ApiError, ParseError};

const MIND_MAP_INSTRUCTION: &str = "You build study mind maps for clinicians in training. \
Return only JSON in a ```json block: {\"nodes\": [...]} where every node has a numeric \"id\", \
a short \"title\" and a \"children\" array of nodes. Use one root node and at most three levels.";

#[derive(Deserialize)]
#[serde(untagged)]
enum MindMapPayload {
    Wrapped { nodes: Vec<MindMapNode> },
    Forest(Vec<MindMapNode>),
    Root(MindMapNode),
}

/// Accepts `{"nodes": [...]}`, a bare array of nodes, or a single root node.
pub fn parse_mind_map(text: &str) -> Result<Vec<MindMapNode>, ParseError> {
    let nodes = match parse_json::<MindMapPayload>(text)? {
        MindMapPayload::Wrapped { nodes } | MindMapPayload::Forest(nodes) => nodes,
        MindMapPayload::Root(root) => vec![root],
    };

    if nodes.is_empty() {
        return Err(ParseError::new("mind map contains no nodes", text));
    }
    if nodes.iter().any(|n| n.title.trim().is_empty()) {
        return Err(ParseError::new("mind map node without a title", text));
    }
    Ok(nodes)
}

impl ContentService {
    pub async fn generate_mind_map(
        &self,
        topic: &str,
        history: &[Turn],
    ) -> Result<Vec<MindMapNode>, ApiError> {
        let context = self.ground(topic).await;

        let mut request = format!("Build a mind map of {}.", topic);
        if !history.is_empty() {
            request.push_str("\n\nFocus on what the learner has been discussing:\n");
            request.push_str(&history_excerpt(history));
        }

        let output = self.generate(MIND_MAP_INSTRUCTION, &context, request).await?;
        let nodes = parse_mind_map(&output)?;

        info!(
            "Generated mind map on '{}' with {} nodes",
            topic,
            nodes.iter().map(MindMapNode::node_count).sum::<usize>()
        );
        Ok(nodes)
    }
}
