//! Structured query execution on top of the transport's generic query
//! primitive.
//!
//! One request per call, correlated by a freshly generated tag; the parsed
//! response document is walked for a named sub-document. No retries at this
//! layer; retry policy belongs to callers or to the transport.

use crate::errors::SocketonError;
use crate::transport::{Node, Transport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Server-side query identifiers for the newsletter surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryId {
    Create,
    Metadata,
    UpdateMetadata,
    Mute,
    Unmute,
    Follow,
    Unfollow,
    Subscribed,
    AdminCount,
    ChangeOwner,
    Delete,
    Demote,
}

impl QueryId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "6996806640408138",
            Self::Metadata => "6620195908089573",
            Self::UpdateMetadata => "7150902998257522",
            Self::Mute => "6274038279359549",
            Self::Unmute => "6068417879924485",
            Self::Follow => "7871414976211147",
            Self::Unfollow => "7238632346214362",
            Self::Subscribed => "6388546374527196",
            Self::AdminCount => "7130823597031706",
            Self::ChangeOwner => "7341777602580933",
            Self::Delete => "8316537688363079",
            Self::Demote => "6551828931592903",
        }
    }
}

/// Result paths under the response's `data` document.
pub mod paths {
    pub const NEWSLETTER: &str = "xwa2_newsletter";
    pub const NEWSLETTER_CREATE: &str = "xwa2_newsletter_create";
    pub const NEWSLETTER_UPDATE: &str = "xwa2_newsletter_update";
    pub const NEWSLETTER_MUTE: &str = "xwa2_newsletter_mute_v2";
    pub const NEWSLETTER_UNMUTE: &str = "xwa2_newsletter_unmute_v2";
    pub const NEWSLETTER_DELETE: &str = "xwa2_newsletter_delete_v2";
    pub const NEWSLETTER_DEMOTE: &str = "xwa2_newsletter_demote";
    pub const NEWSLETTER_CHANGE_OWNER: &str = "xwa2_newsletter_change_owner";
    pub const NEWSLETTER_ADMIN_COUNT: &str = "xwa2_newsletter_admin_count";
    pub const NEWSLETTER_SUBSCRIBED: &str = "xwa2_newsletter_subscribed";
}

/// Executes structured queries with a per-query timeout.
pub struct QueryExecutor {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send one raw node and await the matching response under the
    /// configured timeout. A timeout surfaces as a transport error, never
    /// as a reconnect trigger.
    pub async fn raw_query(&self, node: Node) -> Result<Node, SocketonError> {
        match tokio::time::timeout(self.timeout, self.transport.query(node)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(SocketonError::Transport(e.to_string())),
            Err(_) => Err(SocketonError::Transport(format!(
                "query timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    /// Build the `iq`/`w:mex` request node carrying a JSON-encoded
    /// variables document.
    pub fn mex_request(&self, variables: &Value, query_id: QueryId) -> Node {
        let payload = serde_json::json!({ "variables": variables });
        Node::new("iq")
            .attr("id", self.transport.generate_message_tag())
            .attr("type", "get")
            .attr("xmlns", "w:mex")
            .attr("to", "@s.whatsapp.net")
            .children(vec![
                Node::new("query")
                    .attr("query_id", query_id.as_str())
                    .bytes(payload.to_string().into_bytes()),
            ])
    }

    /// Send one structured query and extract `data.<result_path>` from the
    /// parsed response body.
    pub async fn execute(
        &self,
        variables: Value,
        query_id: QueryId,
        result_path: &str,
    ) -> Result<Value, SocketonError> {
        let response = self.raw_query(self.mex_request(&variables, query_id)).await?;
        extract_result_path(&response, result_path)
    }
}

/// Parse the `result` child's byte payload as a JSON document.
pub fn parse_result_document(response: &Node) -> Result<Value, SocketonError> {
    let result = response
        .get_child("result")
        .ok_or_else(|| SocketonError::MalformedResponse("missing result child".into()))?;
    let bytes = result
        .content_bytes()
        .ok_or_else(|| SocketonError::MalformedResponse("result carries no payload".into()))?;
    serde_json::from_slice(bytes)
        .map_err(|e| SocketonError::MalformedResponse(format!("result is not valid JSON: {}", e)))
}

/// Extract `data.<path>` from the response, treating explicit `null` the
/// same as absence.
pub fn extract_result_path(response: &Node, path: &str) -> Result<Value, SocketonError> {
    let document = parse_result_document(response)?;
    document
        .get("data")
        .and_then(|data| data.get(path))
        .filter(|value| !value.is_null())
        .cloned()
        .ok_or_else(|| SocketonError::PathNotFound(path.to_string()))
}

#[cfg(test)]
mod tests;
