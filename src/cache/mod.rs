use crate::transport::{GroupMetadata, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Last-known group metadata, keyed by group identifier.
///
/// No TTL; entries are invalidated only by membership-change events or an
/// explicit caller request. Owned by one `Session` instance; mutations are
/// serialized through the inner lock.
pub struct GroupMetadataCache {
    enabled: bool,
    entries: Mutex<HashMap<String, GroupMetadata>>,
}

impl GroupMetadataCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Serve the cached value when caching is enabled and the id is
    /// present; otherwise fetch from the server, store (when enabled), and
    /// return. Fetch failures are logged and yield `None` rather than
    /// erroring. Non-group identifiers short-circuit to `None`.
    pub async fn get(&self, jid: &str, transport: &Arc<dyn Transport>) -> Option<GroupMetadata> {
        if !jid.ends_with("@g.us") {
            return None;
        }

        if self.enabled {
            if let Some(metadata) = self.entries.lock().await.get(jid) {
                debug!(jid, "group metadata cache hit");
                return Some(metadata.clone());
            }
        }

        match transport.group_metadata(jid).await {
            Ok(metadata) => {
                if self.enabled {
                    self.entries
                        .lock()
                        .await
                        .insert(jid.to_string(), metadata.clone());
                }
                Some(metadata)
            }
            Err(e) => {
                error!(jid, error = %e, "failed to fetch group metadata");
                None
            }
        }
    }

    /// Refresh one entry from the server, re-caching the result. Used on
    /// membership-change events.
    pub async fn refresh(
        &self,
        jid: &str,
        transport: &Arc<dyn Transport>,
    ) -> Option<GroupMetadata> {
        self.invalidate(Some(jid)).await;
        self.get(jid, transport).await
    }

    /// Remove one entry, or clear the whole cache when `jid` is `None`.
    pub async fn invalidate(&self, jid: Option<&str>) {
        let mut entries = self.entries.lock().await;
        match jid {
            Some(jid) => {
                entries.remove(jid);
            }
            None => entries.clear(),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
