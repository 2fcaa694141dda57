//! The session orchestrator: wires the transport, credential store, cache,
//! reconnect controller, and the newsletter surface into one composed
//! lifecycle.

use crate::cache::GroupMetadataCache;
use crate::config::{AutoFollowConfig, SessionConfig};
use crate::connection::{ConnectionStatus, ReconnectController};
use crate::errors::SocketonError;
use crate::events::{self, ErrorContext, MembershipEvent, SessionEventHandler};
use crate::newsletter::NewsletterApi;
use crate::query::QueryExecutor;
use crate::transport::{
    ConnectionUpdate, CredentialStore, DisconnectReason, GroupMetadata, GroupParticipantsUpdate,
    MediaService, ParticipantAction, Transport, TransportEvent, WireConnectionState,
};
use anyhow::anyhow;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// State shared between the orchestrator and its spawned tasks.
struct Shared {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    handler: Arc<dyn SessionEventHandler>,
    controller: Arc<ReconnectController>,
    cache: Arc<GroupMetadataCache>,
}

/// One persistent device session. Each instance owns its own reconnect
/// state and metadata cache; concurrent sessions share nothing.
pub struct Session {
    shared: Arc<Shared>,
    newsletter: Arc<NewsletterApi>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    aux_tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Session {
    /// Validate the configuration and wire the collaborators. Fails
    /// synchronously with a configuration error before any network
    /// activity occurs.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        media: Arc<dyn MediaService>,
        handler: Arc<dyn SessionEventHandler>,
        events_rx: mpsc::Receiver<TransportEvent>,
    ) -> Result<Self, SocketonError> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = Arc::new(ReconnectController::new(
            config.reconnect.clone(),
            handler.clone(),
            shutdown_rx,
        ));
        let executor = Arc::new(QueryExecutor::new(transport.clone(), config.query_timeout));
        let newsletter = Arc::new(NewsletterApi::new(executor, media));
        let cache = Arc::new(GroupMetadataCache::new(config.metadata_cache));

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport,
                credentials,
                handler,
                controller,
                cache,
            }),
            newsletter,
            events_rx: Mutex::new(Some(events_rx)),
            event_task: Mutex::new(None),
            aux_tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    /// Start the event loop, the pairing flow (when the credential store is
    /// not yet registered), and the opt-in auto-follow sweep.
    pub async fn start(&self) -> Result<(), SocketonError> {
        let events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| SocketonError::Internal(anyhow!("session already started")))?;

        info!(session_dir = %self.shared.config.session_dir.display(), "starting session");
        self.shared
            .controller
            .set_status(ConnectionStatus::Connecting)
            .await;

        let shared = self.shared.clone();
        let shutdown = self.shutdown_tx.subscribe();
        let task = tokio::spawn(run_event_loop(shared, events_rx, shutdown));
        *self.event_task.lock().await = Some(task);

        if !self.shared.credentials.registered() {
            let shared = self.shared.clone();
            let shutdown = self.shutdown_tx.subscribe();
            self.aux_tasks
                .lock()
                .await
                .push(tokio::spawn(run_pairing_flow(shared, shutdown)));
        }

        if let Some(auto_follow) = self.shared.config.auto_follow.clone() {
            let newsletter = self.newsletter.clone();
            let handler = self.shared.handler.clone();
            let shutdown = self.shutdown_tx.subscribe();
            self.aux_tasks.lock().await.push(tokio::spawn(
                run_auto_follow_sweep(auto_follow, newsletter, handler, shutdown),
            ));
        }

        Ok(())
    }

    /// Tear the session down: interrupt any in-progress backoff wait,
    /// suppress further reconnects, end the transport, clear the cache,
    /// and publish the terminal `Shutdown` status.
    pub async fn shutdown(&self) {
        info!("shutting down session");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.shared.transport.end().await {
            warn!(error = %e, "transport end failed");
        }

        if let Some(task) = self.event_task.lock().await.take() {
            let _ = task.await;
        }
        for task in self.aux_tasks.lock().await.drain(..) {
            task.abort();
        }

        self.shared.cache.invalidate(None).await;
        self.shared.controller.shutdown().await;
    }

    /// The newsletter operation surface.
    pub fn newsletter(&self) -> &NewsletterApi {
        &self.newsletter
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.shared.controller.status().await
    }

    /// Cached-or-fetched group metadata; `None` on fetch failure or for
    /// non-group identifiers.
    pub async fn group_metadata(&self, jid: &str) -> Option<GroupMetadata> {
        self.shared.cache.get(jid, &self.shared.transport).await
    }

    /// Drop one cached group entry, or all of them.
    pub async fn clear_group_cache(&self, jid: Option<&str>) {
        self.shared.cache.invalidate(jid).await;
    }
}

async fn run_event_loop(
    shared: Arc<Shared>,
    mut events_rx: mpsc::Receiver<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = events_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            TransportEvent::CredsUpdate => {
                if let Err(e) = shared.credentials.save().await {
                    error!(error = %e, "failed to persist credentials");
                    let err = SocketonError::Internal(e);
                    shared
                        .handler
                        .on_error(&err, ErrorContext::CredentialSave)
                        .await;
                }
            }
            TransportEvent::MessagesUpsert { messages } => {
                events::dispatch_batch(shared.handler.as_ref(), messages).await;
            }
            TransportEvent::ConnectionUpdate(update) => {
                handle_connection_update(&shared, update).await;
            }
            TransportEvent::GroupParticipantsUpdate(update) => {
                handle_participants_update(&shared, update).await;
            }
        }
    }
}

async fn handle_connection_update(shared: &Arc<Shared>, update: ConnectionUpdate) {
    match update.connection {
        Some(WireConnectionState::Connecting) => {
            shared
                .controller
                .set_status(ConnectionStatus::Connecting)
                .await;
        }
        Some(WireConnectionState::Open) => {
            shared.controller.on_open().await;
        }
        Some(WireConnectionState::Close) => {
            let reason = update.last_disconnect;
            info!(?reason, "connection closed");
            if reason.is_some_and(DisconnectReason::is_logged_out) {
                shared.controller.on_logged_out().await;
            } else {
                shared.controller.set_status(ConnectionStatus::Closed).await;
                if shared.config.auto_reconnect {
                    let controller = shared.controller.clone();
                    let transport = shared.transport.clone();
                    tokio::spawn(async move {
                        controller.schedule_reconnect(transport).await;
                    });
                }
            }
        }
        None => {}
    }
}

async fn handle_participants_update(shared: &Arc<Shared>, update: GroupParticipantsUpdate) {
    let GroupParticipantsUpdate {
        group_id,
        participants,
        action,
        author,
    } = update;

    // Refresh server-side truth before fanning out to callbacks.
    let _ = shared.cache.refresh(&group_id, &shared.transport).await;

    for participant in participants {
        let event = MembershipEvent {
            group_id: group_id.clone(),
            participant,
            author: author.clone(),
            action,
        };
        let result = match action {
            ParticipantAction::Add => shared.handler.on_group_join(event).await,
            ParticipantAction::Remove => shared.handler.on_group_leave(event).await,
            // Role changes refresh the cache but have no fan-out callback.
            ParticipantAction::Promote | ParticipantAction::Demote => Ok(()),
        };
        if let Err(e) = result {
            error!(group_id = %group_id, error = %e, "error in group membership handler");
            let err = SocketonError::Internal(e);
            shared
                .handler
                .on_error(
                    &err,
                    ErrorContext::GroupHandler {
                        group_id: group_id.clone(),
                        action,
                    },
                )
                .await;
        }
    }
}

/// One-time pairing-code acquisition: wait the grace period for the
/// transport socket to settle, then request a fixed or server-issued code.
/// Failure is reported through the error callback, never raised.
async fn run_pairing_flow(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    info!("device not registered, requesting pairing code");
    shared
        .controller
        .set_status(ConnectionStatus::PairingRequested)
        .await;

    tokio::select! {
        _ = shutdown.changed() => return,
        () = tokio::time::sleep(shared.config.pairing_grace) => {}
    }

    let number = shared.config.pairing_number.trim();
    let fixed = shared.config.pairing_code.as_deref();
    match shared.transport.request_pairing_code(number, fixed).await {
        Ok(code) => {
            info!(number, "pairing code ready");
            shared
                .controller
                .set_status(ConnectionStatus::PairingReady { code })
                .await;
        }
        Err(e) => {
            error!(error = %e, "failed to request pairing code");
            let err = SocketonError::Transport(e.to_string());
            shared.handler.on_error(&err, ErrorContext::Pairing).await;
        }
    }
}

/// Sequentially follow the explicitly configured channels, sleeping the
/// configured delay between follows. Per-entry failures are reported and
/// skipped.
async fn run_auto_follow_sweep(
    config: AutoFollowConfig,
    newsletter: Arc<NewsletterApi>,
    handler: Arc<dyn SessionEventHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    for jid in config.jids {
        if *shutdown.borrow() {
            return;
        }
        match newsletter.follow(&jid).await {
            Ok(()) => info!(jid = %jid, "auto-followed newsletter"),
            Err(e) => {
                error!(jid = %jid, error = %e, "failed to auto-follow newsletter");
                handler
                    .on_error(&e, ErrorContext::AutoFollow { jid: jid.clone() })
                    .await;
            }
        }
        if !config.delay.is_zero() {
            tokio::select! {
                _ = shutdown.changed() => return,
                () = tokio::time::sleep(config.delay) => {}
            }
        }
    }
}
