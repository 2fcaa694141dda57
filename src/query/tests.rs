use super::*;
use crate::transport::GroupMetadata;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU32, Ordering};

struct MockTransport {
    tags: AtomicU32,
    requests: StdMutex<Vec<Node>>,
    responses: StdMutex<VecDeque<Result<Node, String>>>,
    /// When set, `query` parks forever so the executor timeout fires.
    hang: bool,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            tags: AtomicU32::new(0),
            requests: StdMutex::new(Vec::new()),
            responses: StdMutex::new(VecDeque::new()),
            hang: false,
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            tags: AtomicU32::new(0),
            requests: StdMutex::new(Vec::new()),
            responses: StdMutex::new(VecDeque::new()),
            hang: true,
        })
    }

    fn push_response(&self, response: Node) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    fn push_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    fn requests(&self) -> Vec<Node> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn generate_message_tag(&self) -> String {
        format!("tag-{}", self.tags.fetch_add(1, Ordering::SeqCst))
    }

    async fn query(&self, node: Node) -> anyhow::Result<Node> {
        self.requests.lock().unwrap().push(node);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => anyhow::bail!(message),
            None => anyhow::bail!("no queued response"),
        }
    }

    async fn reconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn request_pairing_code(
        &self,
        _phone_number: &str,
        _fixed: Option<&str>,
    ) -> anyhow::Result<String> {
        anyhow::bail!("not used in this test")
    }

    async fn group_metadata(&self, _jid: &str) -> anyhow::Result<GroupMetadata> {
        anyhow::bail!("not used in this test")
    }

    async fn end(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn executor(mock: &Arc<MockTransport>) -> QueryExecutor {
    QueryExecutor::new(mock.clone(), Duration::from_millis(500))
}

fn result_response(document: &Value) -> Node {
    Node::new("iq").children(vec![
        Node::new("result").bytes(document.to_string().into_bytes()),
    ])
}

#[test]
fn test_mex_request_shape() {
    let mock = MockTransport::new();
    let exec = executor(&mock);
    let variables = json!({ "newsletter_id": "123@newsletter" });

    let node = exec.mex_request(&variables, QueryId::Follow);

    assert_eq!(node.tag, "iq");
    assert_eq!(node.get_attr("type"), Some("get"));
    assert_eq!(node.get_attr("xmlns"), Some("w:mex"));
    assert_eq!(node.get_attr("to"), Some("@s.whatsapp.net"));
    assert_eq!(node.get_attr("id"), Some("tag-0"));

    let query = node.get_child("query").unwrap();
    assert_eq!(query.get_attr("query_id"), Some("7871414976211147"));
    let payload: Value = serde_json::from_slice(query.content_bytes().unwrap()).unwrap();
    assert_eq!(payload, json!({ "variables": variables }));
}

#[test]
fn test_mex_request_tags_are_fresh_per_request() {
    let mock = MockTransport::new();
    let exec = executor(&mock);
    let a = exec.mex_request(&json!({}), QueryId::Mute);
    let b = exec.mex_request(&json!({}), QueryId::Mute);
    assert_ne!(a.get_attr("id"), b.get_attr("id"));
}

#[tokio::test]
async fn test_execute_extracts_result_path() {
    let mock = MockTransport::new();
    mock.push_response(result_response(&json!({
        "data": { "xwa2_newsletter": { "id": "123@newsletter" } }
    })));
    let exec = executor(&mock);

    let value = exec
        .execute(json!({}), QueryId::Metadata, paths::NEWSLETTER)
        .await
        .unwrap();
    assert_eq!(value["id"], "123@newsletter");

    // The request that went out carried the metadata query id.
    let sent = mock.requests();
    assert_eq!(sent.len(), 1);
    let query = sent[0].get_child("query").unwrap();
    assert_eq!(query.get_attr("query_id"), Some("6620195908089573"));
}

#[tokio::test]
async fn test_missing_path_is_path_not_found() {
    let mock = MockTransport::new();
    mock.push_response(result_response(&json!({ "data": {} })));
    let exec = executor(&mock);

    let err = exec
        .execute(json!({}), QueryId::Metadata, paths::NEWSLETTER)
        .await
        .unwrap_err();
    assert!(matches!(err, SocketonError::PathNotFound(p) if p == "xwa2_newsletter"));
}

#[tokio::test]
async fn test_explicit_null_counts_as_absent() {
    let mock = MockTransport::new();
    mock.push_response(result_response(&json!({
        "data": { "xwa2_newsletter": null }
    })));
    let exec = executor(&mock);

    let err = exec
        .execute(json!({}), QueryId::Metadata, paths::NEWSLETTER)
        .await
        .unwrap_err();
    assert!(matches!(err, SocketonError::PathNotFound(_)));
}

#[tokio::test]
async fn test_missing_result_child_is_malformed() {
    let mock = MockTransport::new();
    mock.push_response(Node::new("iq"));
    let exec = executor(&mock);

    let err = exec
        .execute(json!({}), QueryId::Metadata, paths::NEWSLETTER)
        .await
        .unwrap_err();
    assert!(matches!(err, SocketonError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_non_json_payload_is_malformed() {
    let mock = MockTransport::new();
    mock.push_response(
        Node::new("iq").children(vec![Node::new("result").bytes(b"not json".to_vec())]),
    );
    let exec = executor(&mock);

    let err = exec
        .execute(json!({}), QueryId::Metadata, paths::NEWSLETTER)
        .await
        .unwrap_err();
    assert!(matches!(err, SocketonError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_transport_failure_surfaces_as_transport_error() {
    let mock = MockTransport::new();
    mock.push_error("stream closed");
    let exec = executor(&mock);

    let err = exec
        .execute(json!({}), QueryId::Metadata, paths::NEWSLETTER)
        .await
        .unwrap_err();
    match err {
        SocketonError::Transport(message) => assert!(message.contains("stream closed")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_query_times_out() {
    let mock = MockTransport::hanging();
    let exec = executor(&mock);

    let err = exec.raw_query(Node::new("iq")).await.unwrap_err();
    match err {
        SocketonError::Transport(ref message) => assert!(message.contains("timed out")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}
