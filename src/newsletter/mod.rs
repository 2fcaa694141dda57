//! Channel/newsletter domain operations.
//!
//! Each operation composes the same way: build a variables document, pick a
//! query identifier and result path, execute, parse. Parsing is strict
//! about shape but lenient about missing optional fields: a field that is
//! absent or fails numeric coercion resolves to `None`, never an error.

use crate::errors::SocketonError;
use crate::query::{QueryExecutor, QueryId, paths};
use crate::transport::{MediaService, Node};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How a newsletter is addressed in a metadata fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsletterKeyKind {
    Jid,
    Invite,
}

impl NewsletterKeyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jid => "JID",
            Self::Invite => "INVITE",
        }
    }
}

/// Viewer role supplied with a metadata fetch. Defaults to guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewRole {
    #[default]
    Guest,
    Subscriber,
    Admin,
    Owner,
}

impl ViewRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "GUEST",
            Self::Subscriber => "SUBSCRIBER",
            Self::Admin => "ADMIN",
            Self::Owner => "OWNER",
        }
    }
}

/// Newsletter metadata parsed from a nested response document. Any missing
/// field resolves to an absent value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsletterMetadata {
    pub id: Option<String>,
    pub state: Option<String>,
    pub creation_time: Option<i64>,
    pub name: Option<String>,
    pub name_time: Option<i64>,
    pub description: Option<String>,
    pub description_time: Option<i64>,
    pub invite: Option<String>,
    pub handle: Option<String>,
    pub reaction_codes: Option<String>,
    pub subscribers: Option<i64>,
    pub verification: Option<String>,
    pub viewer_metadata: Option<Value>,
}

/// Result of a create call. The creation response is a structurally
/// different document from the metadata fetch, hence the distinct shape;
/// the owner field is intentionally absent (the response does not carry
/// it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsletterCreateResult {
    pub id: String,
    pub name: Option<String>,
    pub creation_time: Option<i64>,
    pub description: Option<String>,
    pub invite: Option<String>,
    pub subscribers: Option<i64>,
    pub verification: Option<String>,
    pub picture: Option<PictureRef>,
    pub mute_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PictureRef {
    pub id: Option<String>,
    pub direct_path: Option<String>,
}

/// Partial metadata update. Only present fields are submitted; settings
/// updates are intentionally unsupported through this path and always
/// travel as an explicit `settings: null` sentinel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewsletterUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Base64-encoded picture bytes; empty string removes the picture.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Coerce a numeric or numeric-looking string field into a number,
/// reporting absent when coercion fails.
fn lenient_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn opt_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(ToString::to_string)
}

/// Result path for a thread-metadata document, disambiguated by whether it
/// came from a create call or a metadata fetch.
pub fn metadata_path(is_create: bool) -> &'static str {
    if is_create {
        paths::NEWSLETTER_CREATE
    } else {
        paths::NEWSLETTER
    }
}

/// Parse a thread-metadata document into [`NewsletterMetadata`].
pub fn parse_newsletter_metadata(document: &Value) -> NewsletterMetadata {
    let thread = document.get("thread_metadata");
    let field = |name: &str| thread.and_then(|t| t.get(name));

    NewsletterMetadata {
        id: opt_string(document.get("id")),
        state: opt_string(document.get("state").and_then(|s| s.get("type"))),
        creation_time: lenient_i64(field("creation_time")),
        name: opt_string(field("name").and_then(|n| n.get("text"))),
        name_time: lenient_i64(field("name").and_then(|n| n.get("update_time"))),
        description: opt_string(field("description").and_then(|d| d.get("text"))),
        description_time: lenient_i64(field("description").and_then(|d| d.get("update_time"))),
        invite: opt_string(field("invite")),
        handle: opt_string(field("handle")),
        reaction_codes: opt_string(
            field("settings")
                .and_then(|s| s.get("reaction_codes"))
                .and_then(|r| r.get("value")),
        ),
        subscribers: lenient_i64(field("subscribers_count")),
        verification: opt_string(field("verification")),
        viewer_metadata: document.get("viewer_metadata").filter(|v| !v.is_null()).cloned(),
    }
}

/// Parse a creation response into [`NewsletterCreateResult`]. The
/// identifier is the one required field.
pub fn parse_create_result(document: &Value) -> Result<NewsletterCreateResult, SocketonError> {
    let id = document
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            SocketonError::MalformedResponse("create response has no newsletter id".into())
        })?
        .to_string();

    let thread = document.get("thread_metadata");
    let field = |name: &str| thread.and_then(|t| t.get(name));

    let picture = field("picture").filter(|p| !p.is_null()).map(|p| PictureRef {
        id: opt_string(p.get("id")),
        direct_path: opt_string(p.get("direct_path")),
    });

    Ok(NewsletterCreateResult {
        id,
        name: opt_string(field("name").and_then(|n| n.get("text"))),
        creation_time: lenient_i64(field("creation_time")),
        description: opt_string(field("description").and_then(|d| d.get("text"))),
        invite: opt_string(field("invite")),
        subscribers: lenient_i64(field("subscribers_count")),
        verification: opt_string(field("verification")),
        picture,
        mute_state: opt_string(
            document
                .get("viewer_metadata")
                .and_then(|v| v.get("mute")),
        ),
    })
}

/// The newsletter operation surface, built entirely on the query executor
/// and the media collaborator.
pub struct NewsletterApi {
    executor: Arc<QueryExecutor>,
    media: Arc<dyn MediaService>,
}

impl NewsletterApi {
    pub fn new(executor: Arc<QueryExecutor>, media: Arc<dyn MediaService>) -> Self {
        Self { executor, media }
    }

    /// Create a newsletter with a name and optional description.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<NewsletterCreateResult, SocketonError> {
        let variables = json!({
            "input": {
                "name": name,
                "description": description,
            }
        });
        let document = self
            .executor
            .execute(variables, QueryId::Create, metadata_path(true))
            .await?;
        parse_create_result(&document)
    }

    /// Fetch newsletter metadata by jid or invite token.
    pub async fn metadata(
        &self,
        kind: NewsletterKeyKind,
        key: &str,
        role: Option<ViewRole>,
    ) -> Result<NewsletterMetadata, SocketonError> {
        let variables = json!({
            "input": {
                "key": key,
                "type": kind.as_str(),
                "view_role": role.unwrap_or_default().as_str(),
            },
            "fetch_viewer_metadata": true,
            "fetch_full_image": true,
            "fetch_creation_time": true,
        });
        let document = self
            .executor
            .execute(variables, QueryId::Metadata, metadata_path(false))
            .await?;
        Ok(parse_newsletter_metadata(&document))
    }

    /// Submit a partial metadata update merged with the `settings: null`
    /// sentinel.
    pub async fn update(
        &self,
        jid: &str,
        updates: NewsletterUpdates,
    ) -> Result<Value, SocketonError> {
        let mut updates_doc = serde_json::to_value(&updates)
            .map_err(|e| SocketonError::Internal(e.into()))?;
        if let Some(map) = updates_doc.as_object_mut() {
            map.insert("settings".to_string(), Value::Null);
        }
        let variables = json!({
            "newsletter_id": jid,
            "updates": updates_doc,
        });
        self.executor
            .execute(variables, QueryId::UpdateMetadata, paths::NEWSLETTER_UPDATE)
            .await
    }

    pub async fn update_name(&self, jid: &str, name: &str) -> Result<Value, SocketonError> {
        self.update(
            jid,
            NewsletterUpdates {
                name: Some(name.to_string()),
                ..NewsletterUpdates::default()
            },
        )
        .await
    }

    pub async fn update_description(
        &self,
        jid: &str,
        description: &str,
    ) -> Result<Value, SocketonError> {
        self.update(
            jid,
            NewsletterUpdates {
                description: Some(description.to_string()),
                ..NewsletterUpdates::default()
            },
        )
        .await
    }

    /// Render raw image content through the media collaborator and submit
    /// it as the newsletter picture.
    pub async fn update_picture(
        &self,
        jid: &str,
        content: &[u8],
    ) -> Result<Value, SocketonError> {
        let img = self
            .media
            .generate_profile_picture(content)
            .await
            .map_err(SocketonError::Internal)?;
        self.update(
            jid,
            NewsletterUpdates {
                picture: Some(BASE64.encode(img)),
                ..NewsletterUpdates::default()
            },
        )
        .await
    }

    pub async fn remove_picture(&self, jid: &str) -> Result<Value, SocketonError> {
        self.update(
            jid,
            NewsletterUpdates {
                picture: Some(String::new()),
                ..NewsletterUpdates::default()
            },
        )
        .await
    }

    pub async fn follow(&self, jid: &str) -> Result<(), SocketonError> {
        let request = self
            .executor
            .mex_request(&json!({ "newsletter_id": jid }), QueryId::Follow);
        self.executor.raw_query(request).await?;
        Ok(())
    }

    pub async fn unfollow(&self, jid: &str) -> Result<(), SocketonError> {
        let request = self
            .executor
            .mex_request(&json!({ "newsletter_id": jid }), QueryId::Unfollow);
        self.executor.raw_query(request).await?;
        Ok(())
    }

    pub async fn mute(&self, jid: &str) -> Result<(), SocketonError> {
        self.executor
            .execute(json!({ "newsletter_id": jid }), QueryId::Mute, paths::NEWSLETTER_MUTE)
            .await?;
        Ok(())
    }

    pub async fn unmute(&self, jid: &str) -> Result<(), SocketonError> {
        self.executor
            .execute(
                json!({ "newsletter_id": jid }),
                QueryId::Unmute,
                paths::NEWSLETTER_UNMUTE,
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, jid: &str) -> Result<(), SocketonError> {
        self.executor
            .execute(
                json!({ "newsletter_id": jid }),
                QueryId::Delete,
                paths::NEWSLETTER_DELETE,
            )
            .await?;
        Ok(())
    }

    pub async fn demote(&self, jid: &str, user_jid: &str) -> Result<(), SocketonError> {
        self.executor
            .execute(
                json!({ "newsletter_id": jid, "user_id": user_jid }),
                QueryId::Demote,
                paths::NEWSLETTER_DEMOTE,
            )
            .await?;
        Ok(())
    }

    pub async fn change_owner(&self, jid: &str, new_owner_jid: &str) -> Result<(), SocketonError> {
        self.executor
            .execute(
                json!({ "newsletter_id": jid, "user_id": new_owner_jid }),
                QueryId::ChangeOwner,
                paths::NEWSLETTER_CHANGE_OWNER,
            )
            .await?;
        Ok(())
    }

    /// Number of admins, parsed from the response scalar.
    pub async fn admin_count(&self, jid: &str) -> Result<i64, SocketonError> {
        let document = self
            .executor
            .execute(
                json!({ "newsletter_id": jid }),
                QueryId::AdminCount,
                paths::NEWSLETTER_ADMIN_COUNT,
            )
            .await?;
        lenient_i64(document.get("admin_count")).ok_or_else(|| {
            SocketonError::MalformedResponse("admin count response has no admin_count".into())
        })
    }

    /// List all subscribed newsletters, then fetch metadata for each one
    /// sequentially. Entries whose identifier cannot be resolved are
    /// skipped rather than aborting the whole operation.
    pub async fn fetch_all_participating(
        &self,
    ) -> Result<HashMap<String, NewsletterMetadata>, SocketonError> {
        let subscribed = self
            .executor
            .execute(json!({}), QueryId::Subscribed, paths::NEWSLETTER_SUBSCRIBED)
            .await?;
        let entries = subscribed.as_array().ok_or_else(|| {
            SocketonError::MalformedResponse("subscribed list is not an array".into())
        })?;

        let mut result = HashMap::new();
        for entry in entries {
            let Some(id) = entry.get("id").and_then(Value::as_str) else {
                debug!("skipping subscribed entry with no id");
                continue;
            };
            let metadata = self.metadata(NewsletterKeyKind::Jid, id, None).await?;
            if let Some(resolved_id) = metadata.id.clone() {
                result.insert(resolved_id, metadata);
            }
        }
        Ok(result)
    }

    /// Fetch message history. `since` and `after` cursors are serialized as
    /// decimal text only when present.
    pub async fn fetch_messages(
        &self,
        jid: &str,
        count: u32,
        since: Option<u64>,
        after: Option<u64>,
    ) -> Result<Node, SocketonError> {
        let mut updates = Node::new("message_updates").attr("count", count.to_string());
        if let Some(since) = since {
            updates = updates.attr("since", since.to_string());
        }
        if let Some(after) = after {
            updates = updates.attr("after", after.to_string());
        }
        let request = Node::new("iq")
            .attr("id", self.executor.transport().generate_message_tag())
            .attr("type", "get")
            .attr("xmlns", "newsletter")
            .attr("to", jid)
            .children(vec![updates]);
        self.executor.raw_query(request).await
    }

    /// Subscribe to live updates. Returns the lease duration hinted in the
    /// acknowledgement, or `None` when no duration is present (the
    /// subscription may still be active per transport semantics).
    pub async fn subscribe_live_updates(
        &self,
        jid: &str,
    ) -> Result<Option<Duration>, SocketonError> {
        let request = Node::new("iq")
            .attr("id", self.executor.transport().generate_message_tag())
            .attr("type", "set")
            .attr("xmlns", "newsletter")
            .attr("to", jid)
            .children(vec![Node::new("live_updates")]);
        let response = self.executor.raw_query(request).await?;
        let duration = response
            .get_child("live_updates")
            .and_then(|n| n.get_attr("duration"))
            .and_then(|d| d.parse::<u64>().ok())
            .map(Duration::from_secs);
        Ok(duration)
    }

    /// React to a newsletter message. An absent reaction sends the removal
    /// form (`edit: 7`).
    pub async fn react_message(
        &self,
        jid: &str,
        server_id: &str,
        reaction: Option<&str>,
    ) -> Result<(), SocketonError> {
        let mut request = Node::new("message")
            .attr("to", jid)
            .attr("type", "reaction")
            .attr("server_id", server_id)
            .attr("id", self.executor.transport().generate_message_tag());
        if reaction.is_none() {
            request = request.attr("edit", "7");
        }
        let reaction_node = match reaction {
            Some(code) => Node::new("reaction").attr("code", code),
            None => Node::new("reaction"),
        };
        self.executor
            .raw_query(request.children(vec![reaction_node]))
            .await?;
        Ok(())
    }
}
