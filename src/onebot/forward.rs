use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::QqsumError;
use crate::onebot::gateway::GatewayClient;
use crate::onebot::types::GatewayReply;

/// One entry of a forwarded-message card. Content is either literal text or
/// another node, so cards nest arbitrarily deep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "NodeWire", try_from = "NodeWire")]
pub struct ForwardNode {
    pub user_id: i64,
    pub nickname: String,
    pub content: ForwardContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForwardContent {
    Text(String),
    Nested(Box<ForwardNode>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeWire {
    #[serde(rename = "type")]
    kind: String,
    data: NodeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeData {
    user_id: i64,
    nickname: String,
    content: ForwardContent,
}

impl From<ForwardNode> for NodeWire {
    fn from(node: ForwardNode) -> Self {
        NodeWire {
            kind: "node".to_string(),
            data: NodeData {
                user_id: node.user_id,
                nickname: node.nickname,
                content: node.content,
            },
        }
    }
}

impl TryFrom<NodeWire> for ForwardNode {
    type Error = String;

    fn try_from(wire: NodeWire) -> std::result::Result<Self, Self::Error> {
        if wire.kind != "node" {
            return Err(format!("expected segment type `node`, got `{}`", wire.kind));
        }
        Ok(ForwardNode {
            user_id: wire.data.user_id,
            nickname: wire.data.nickname,
            content: wire.data.content,
        })
    }
}

impl ForwardNode {
    pub fn text(user_id: i64, nickname: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id,
            nickname: nickname.into(),
            content: ForwardContent::Text(text.into()),
        }
    }

    pub fn wrapping(user_id: i64, nickname: impl Into<String>, inner: ForwardNode) -> Self {
        Self {
            user_id,
            nickname: nickname.into(),
            content: ForwardContent::Nested(Box::new(inner)),
        }
    }

    /// Nesting depth, 1 for a plain text node.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut cursor = &self.content;
        while let ForwardContent::Nested(inner) = cursor {
            depth += 1;
            cursor = &inner.content;
        }
        depth
    }
}

pub fn load_nodes(path: &Path) -> Result<Vec<ForwardNode>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse forward nodes from {}", path.display()))
}

/// Three outer nodes; the middle one wraps a node that itself wraps a node.
pub fn sample_nodes(narrator_id: i64) -> Vec<ForwardNode> {
    let innermost = ForwardNode::text(10003, "Deep Inner Voice", "This is the deepest level message!");
    let inner = ForwardNode::wrapping(10002, "Inner Layer", innermost);
    vec![
        ForwardNode::text(
            narrator_id,
            "Outer Layer Narrator",
            "This is the first message of the outer layer.",
        ),
        ForwardNode::wrapping(narrator_id, "Nesting Point", inner),
        ForwardNode::text(
            narrator_id,
            "Outer Layer Narrator",
            "This is a message after the nested structure.",
        ),
    ]
}

pub fn send_forward(
    client: &GatewayClient,
    group_id: i64,
    nodes: &[ForwardNode],
) -> std::result::Result<GatewayReply, QqsumError> {
    if nodes.is_empty() {
        return Err(QqsumError::configuration("forward card needs at least one node"));
    }
    let max_depth = nodes.iter().map(ForwardNode::depth).max().unwrap_or(0);
    info!(group_id, nodes = nodes.len(), max_depth, "sending forward card");

    let params = json!({
        "group_id": group_id,
        "messages": nodes,
    });
    let reply = client.call("send_group_forward_msg", &params)?;
    if !reply.is_ok() {
        warn!(group_id, reply = %reply.failure_text(), "forward card rejected");
        return Err(QqsumError::Transport(format!(
            "send_group_forward_msg: {}",
            reply.failure_text()
        )));
    }
    Ok(reply)
}
