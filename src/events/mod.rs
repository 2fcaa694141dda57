//! Event normalization and dispatch.
//!
//! Raw transport messages are folded into [`NormalizedMessage`] and handed
//! to the caller's handler. Handler failures are caught at the dispatch
//! boundary and reported through `on_error`; a single bad handler call
//! never stops the rest of the batch or crashes the pipeline.

use crate::connection::ConnectionStatus;
use crate::errors::SocketonError;
use crate::transport::{ParticipantAction, RawMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Stable application-facing view of an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub chat_id: String,
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    pub push_name: String,
    /// Best-effort plain-text extraction; see [`extract_text`].
    pub text: String,
    pub quoted: Option<QuotedSummary>,
    pub mentioned_jids: Vec<String>,
    pub is_group: bool,
    pub is_newsletter: bool,
    /// Resolved author identifier: the participant for group messages,
    /// otherwise the chat identifier stripped of its device suffix.
    pub author: String,
}

/// Summary of a quoted message, when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedSummary {
    pub chat_id: String,
    pub participant: Option<String>,
    pub text: String,
}

/// Membership-change notification fanned out per affected member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub group_id: String,
    pub participant: String,
    pub author: Option<String>,
    pub action: ParticipantAction,
}

/// Where an error surfaced, attached to every `on_error` invocation.
#[derive(Debug, Clone)]
pub enum ErrorContext {
    MessageHandler { message_id: String },
    GroupHandler { group_id: String, action: ParticipantAction },
    Pairing,
    Reconnect { attempt: u32 },
    CredentialSave,
    AutoFollow { jid: String },
}

/// Caller-facing event contract.
///
/// `on_message` is the one required method; everything else defaults to a
/// no-op. Errors returned from `on_message`, `on_group_join`, and
/// `on_group_leave` are caught at the dispatch boundary and forwarded to
/// `on_error`, never propagated into the session.
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    async fn on_message(&self, message: NormalizedMessage, raw: RawMessage)
    -> anyhow::Result<()>;

    async fn on_connection(&self, _status: ConnectionStatus) {}

    async fn on_group_join(&self, _event: MembershipEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_group_leave(&self, _event: MembershipEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_error(&self, _error: &SocketonError, _context: ErrorContext) {}
}

/// Priority-ordered plain-text extraction: the first present of plain
/// conversation text, extended-text body, image caption, video caption.
pub fn extract_text(raw: &RawMessage) -> String {
    let Some(content) = &raw.content else {
        return String::new();
    };
    content
        .conversation
        .clone()
        .or_else(|| content.extended_text.as_ref().and_then(|e| e.text.clone()))
        .or_else(|| content.image.as_ref().and_then(|i| i.caption.clone()))
        .or_else(|| content.video.as_ref().and_then(|v| v.caption.clone()))
        .unwrap_or_default()
}

/// Normalize one raw message. Returns `None` for messages without a
/// content payload (receipts, key-only updates).
pub fn normalize(raw: &RawMessage) -> Option<NormalizedMessage> {
    let content = raw.content.as_ref()?;
    let remote_jid = raw.key.remote_jid.clone();

    let context = content
        .extended_text
        .as_ref()
        .and_then(|e| e.context_info.as_ref());

    let quoted = context.and_then(|ctx| {
        ctx.quoted_message.as_ref().map(|q| QuotedSummary {
            chat_id: remote_jid.clone(),
            participant: ctx.participant.clone(),
            text: q
                .conversation
                .clone()
                .or_else(|| q.extended_text.as_ref().and_then(|e| e.text.clone()))
                .unwrap_or_default(),
        })
    });

    let mentioned_jids = context.map(|ctx| ctx.mentioned_jid.clone()).unwrap_or_default();

    let author = raw.key.participant.clone().unwrap_or_else(|| {
        remote_jid
            .split(':')
            .next()
            .unwrap_or(remote_jid.as_str())
            .to_string()
    });

    Some(NormalizedMessage {
        id: raw.key.id.clone(),
        chat_id: remote_jid.clone(),
        from_me: raw.key.from_me,
        timestamp: DateTime::from_timestamp(raw.timestamp, 0).unwrap_or(DateTime::UNIX_EPOCH),
        push_name: raw.push_name.clone().unwrap_or_default(),
        text: extract_text(raw),
        quoted,
        mentioned_jids,
        is_group: remote_jid.ends_with("@g.us"),
        is_newsletter: remote_jid.ends_with("@newsletter"),
        author,
    })
}

/// Dispatch one inbound batch in arrival order. Content-less messages are
/// skipped; a handler failure is reported with the failing message's id and
/// does not block the remaining messages.
pub async fn dispatch_batch(handler: &dyn SessionEventHandler, messages: Vec<RawMessage>) {
    for raw in messages {
        let Some(normalized) = normalize(&raw) else {
            continue;
        };
        let message_id = normalized.id.clone();
        if let Err(e) = handler.on_message(normalized, raw).await {
            error!(message_id = %message_id, error = %e, "error in message handler");
            let err = SocketonError::Internal(e);
            handler
                .on_error(&err, ErrorContext::MessageHandler { message_id })
                .await;
        }
    }
}

#[cfg(test)]
mod tests;
