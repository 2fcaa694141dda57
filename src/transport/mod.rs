//! External collaborator seams and the shapes they exchange.
//!
//! The transport owns wire encoding, the cryptographic session, and socket
//! I/O. This crate only sees the generic node tree it queries with, the
//! event stream it emits, and the credential/media side doors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A generic wire node: tag, attributes, and either child nodes or an
/// opaque byte payload. Correlation between a request and its response is
/// by the caller-generated `id` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub tag: String,
    pub attrs: HashMap<String, String>,
    pub content: NodeContent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NodeContent {
    #[default]
    None,
    Nodes(Vec<Node>),
    Bytes(Vec<u8>),
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: HashMap::new(),
            content: NodeContent::None,
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn children(mut self, nodes: Vec<Node>) -> Self {
        self.content = NodeContent::Nodes(nodes);
        self
    }

    pub fn bytes(mut self, payload: Vec<u8>) -> Self {
        self.content = NodeContent::Bytes(payload);
        self
    }

    /// First child with the given tag, if any.
    pub fn get_child(&self, tag: &str) -> Option<&Node> {
        match &self.content {
            NodeContent::Nodes(nodes) => nodes.iter().find(|n| n.tag == tag),
            _ => None,
        }
    }

    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Byte payload of this node, if it carries one.
    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }
}

/// Disconnect reason reported by the transport when the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    TimedOut,
    RestartRequired,
    BadSession,
    MultideviceMismatch,
    LoggedOut,
    Unknown,
}

impl DisconnectReason {
    /// Logout-class reasons terminate the session: credentials are gone and
    /// automatic reconnection must stop.
    pub fn is_logged_out(self) -> bool {
        matches!(self, Self::LoggedOut | Self::MultideviceMismatch)
    }
}

/// Key identifying an inbound message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageKey {
    pub id: String,
    pub remote_jid: String,
    pub from_me: bool,
    #[serde(default)]
    pub participant: Option<String>,
}

/// Context attached to an extended-text message: quoted message and
/// mentioned identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextInfo {
    #[serde(default)]
    pub quoted_message: Option<Box<MessageContent>>,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub mentioned_jid: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedTextMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMessage {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// Content payload of an inbound message. Only the shapes the normalizer
/// inspects are modeled; the transport may carry others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text: Option<ExtendedTextMessage>,
    #[serde(default)]
    pub image: Option<MediaMessage>,
    #[serde(default)]
    pub video: Option<MediaMessage>,
}

/// An inbound message as delivered by the transport, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    pub key: MessageKey,
    /// Epoch seconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub push_name: Option<String>,
    /// Absent for key-only updates (receipts, revokes); such messages are
    /// skipped by the pipeline.
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// Group membership change action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupParticipantsUpdate {
    pub group_id: String,
    pub participants: Vec<String>,
    pub action: ParticipantAction,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    #[serde(default)]
    pub connection: Option<WireConnectionState>,
    #[serde(default)]
    pub last_disconnect: Option<DisconnectReason>,
}

/// Raw connectivity state as the transport reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireConnectionState {
    Connecting,
    Open,
    Close,
}

/// Events emitted by the transport on its event stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Credentials changed; the orchestrator persists them via the
    /// credential store without inspecting internals.
    CredsUpdate,
    MessagesUpsert { messages: Vec<RawMessage> },
    ConnectionUpdate(ConnectionUpdate),
    GroupParticipantsUpdate(GroupParticipantsUpdate),
}

/// Group metadata as fetched from the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub jid: String,
    #[serde(default)]
    pub admin: Option<String>,
}

/// The wire-protocol client. Query/response correlation, reconnection of
/// the underlying socket, and pairing-code issuance all live here.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Freshly generated correlation tag for an outbound request.
    fn generate_message_tag(&self) -> String;

    /// Send one request and await the single matching response.
    async fn query(&self, node: Node) -> anyhow::Result<Node>;

    /// Re-establish the underlying socket connection.
    async fn reconnect(&self) -> anyhow::Result<()>;

    /// Request a pairing code for the given phone identifier. When `fixed`
    /// is supplied the transport registers that code instead of issuing a
    /// server-generated one.
    async fn request_pairing_code(
        &self,
        phone_number: &str,
        fixed: Option<&str>,
    ) -> anyhow::Result<String>;

    /// Fetch group metadata from the server.
    async fn group_metadata(&self, jid: &str) -> anyhow::Result<GroupMetadata>;

    /// Tear the connection down for good.
    async fn end(&self) -> anyhow::Result<()>;
}

/// Credential persistence. The orchestrator invokes `save` whenever the
/// transport signals a credential change and never inspects internals.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether the stored credentials are registered with the server. An
    /// unregistered store triggers the pairing flow on start.
    fn registered(&self) -> bool;

    async fn save(&self) -> anyhow::Result<()>;
}

/// Media collaborator, used only by the picture-update domain call.
#[async_trait]
pub trait MediaService: Send + Sync {
    /// Render raw image content into profile-picture bytes.
    async fn generate_profile_picture(&self, content: &[u8]) -> anyhow::Result<Vec<u8>>;
}
