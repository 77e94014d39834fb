//! Connection service.
//!
//! Tracks one database session per owner URI (the editor document or object
//! explorer node the client associates with a connection). Sessions are kept in
//! memory; every owner URI has its own async lock so concurrent requests for the
//! same owner serialize while different owners proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use dbtools_host::{HandlerError, Registrar, RegistrationError, RequestContext, Service};

pub const CONNECT_REQUEST: &str = "connection/connect";
pub const DISCONNECT_REQUEST: &str = "connection/disconnect";
pub const LIST_REQUEST: &str = "connection/list";
pub const CONNECTION_COMPLETE_NOTIFICATION: &str = "connection/complete";

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    pub server_name: String,
    pub database_name: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub owner_uri: String,
    pub connection: ConnectionDetails,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectParams {
    pub owner_uri: String,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListConnectionsParams {}

/// Sent to the client once a connect request has been handled
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCompleteParams {
    pub owner_uri: String,
    pub connection_id: String,
    pub provider: String,
    pub connection_summary: ConnectionDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub owner_uri: String,
    pub connection_id: String,
    pub server_name: String,
    pub database_name: String,
    pub severed: bool,
}

/// An open session, as handed to peer services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConnection {
    pub owner_uri: String,
    pub connection_id: String,
    pub details: ConnectionDetails,
}

#[derive(Debug)]
struct Session {
    connection: DbConnection,
    severed: bool,
    reconnects: u32,
}

type OwnerSlot = Arc<AsyncMutex<Option<Session>>>;

pub struct ConnectionService {
    provider: Mutex<String>,
    owners: Mutex<HashMap<String, OwnerSlot>>,
}

impl Default for ConnectionService {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionService {
    pub fn new() -> Self {
        Self {
            provider: Mutex::new(String::new()),
            owners: Mutex::new(HashMap::new()),
        }
    }

    fn owner_slot(&self, owner_uri: &str) -> OwnerSlot {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(owners.entry(owner_uri.to_string()).or_default())
    }

    fn existing_slot(&self, owner_uri: &str) -> Option<OwnerSlot> {
        let owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        owners.get(owner_uri).cloned()
    }

    fn is_live(&self, owner_uri: &str, slot: &OwnerSlot) -> bool {
        self.existing_slot(owner_uri)
            .is_some_and(|live| Arc::ptr_eq(&live, slot))
    }

    /// Lock the slot currently mapped to `owner_uri`, creating it if needed.
    /// Retries when a disconnect dropped the slot while we waited on it.
    async fn lock_live_slot(&self, owner_uri: &str) -> OwnedMutexGuard<Option<Session>> {
        loop {
            let slot = self.owner_slot(owner_uri);
            let guard = Arc::clone(&slot).lock_owned().await;
            if self.is_live(owner_uri, &slot) {
                return guard;
            }
        }
    }

    /// Owner URIs with a tracked slot
    pub fn owner_count(&self) -> usize {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Open (or replace) the session for `owner_uri`.
    pub async fn connect(&self, owner_uri: &str, details: ConnectionDetails) -> DbConnection {
        let mut session = self.lock_live_slot(owner_uri).await;
        if let Some(previous) = session.take() {
            info!(owner_uri, connection_id = %previous.connection.connection_id, "Replacing existing connection");
        }
        let connection = DbConnection {
            owner_uri: owner_uri.to_string(),
            connection_id: Uuid::now_v7().to_string(),
            details,
        };
        *session = Some(Session {
            connection: connection.clone(),
            severed: false,
            reconnects: 0,
        });
        info!(owner_uri, connection_id = %connection.connection_id, "Connected");
        connection
    }

    /// Close the session for `owner_uri`. Returns whether one was open.
    pub async fn disconnect(&self, owner_uri: &str) -> bool {
        let Some(slot) = self.existing_slot(owner_uri) else {
            return false;
        };
        let mut session = slot.lock().await;
        let closed = session.take().is_some();
        if self.is_live(owner_uri, &slot) {
            self.owners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(owner_uri);
        }
        drop(session);
        if closed {
            info!(owner_uri, "Disconnected");
        }
        closed
    }

    /// The open session for `owner_uri`.
    ///
    /// A severed session is reported as a transient fault so callers may
    /// [`ConnectionService::reconnect`] and try again.
    pub async fn get_connection(&self, owner_uri: &str) -> Result<DbConnection, HandlerError> {
        let slot = self
            .existing_slot(owner_uri)
            .ok_or_else(|| not_connected(owner_uri))?;
        let session = slot.lock().await;
        match session.as_ref() {
            None => Err(not_connected(owner_uri)),
            Some(session) if session.severed => Err(HandlerError::transient(
                "Server closed the connection unexpectedly",
            )),
            Some(session) => Ok(session.connection.clone()),
        }
    }

    /// Re-open a severed session with its original details.
    pub async fn reconnect(&self, owner_uri: &str) -> Result<DbConnection, HandlerError> {
        let slot = self
            .existing_slot(owner_uri)
            .ok_or_else(|| not_connected(owner_uri))?;
        let mut session = slot.lock().await;
        let session = session.as_mut().ok_or_else(|| not_connected(owner_uri))?;
        if session.severed {
            warn!(owner_uri, "Attempting to reconnect");
            session.severed = false;
            session.reconnects += 1;
            session.connection.connection_id = Uuid::now_v7().to_string();
        }
        Ok(session.connection.clone())
    }

    /// Mark the session for `owner_uri` as severed by the server.
    /// Returns whether a session was open.
    pub async fn mark_severed(&self, owner_uri: &str) -> bool {
        let Some(slot) = self.existing_slot(owner_uri) else {
            return false;
        };
        let mut session = slot.lock().await;
        match session.as_mut() {
            Some(session) => {
                session.severed = true;
                true
            }
            None => false,
        }
    }

    /// Times the session for `owner_uri` has been re-opened.
    pub async fn reconnect_count(&self, owner_uri: &str) -> u32 {
        match self.existing_slot(owner_uri) {
            Some(slot) => slot.lock().await.as_ref().map_or(0, |s| s.reconnects),
            None => 0,
        }
    }

    /// Open sessions ordered by owner URI.
    pub async fn list(&self) -> Vec<ConnectionSummary> {
        let slots: Vec<OwnerSlot> = {
            let owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
            owners.values().cloned().collect()
        };

        let mut summaries = Vec::new();
        for slot in slots {
            if let Some(session) = slot.lock().await.as_ref() {
                summaries.push(ConnectionSummary {
                    owner_uri: session.connection.owner_uri.clone(),
                    connection_id: session.connection.connection_id.clone(),
                    server_name: session.connection.details.server_name.clone(),
                    database_name: session.connection.details.database_name.clone(),
                    severed: session.severed,
                });
            }
        }
        summaries.sort_by(|a, b| a.owner_uri.cmp(&b.owner_uri));
        summaries
    }

    fn provider_name(&self) -> String {
        self.provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn handle_connect(&self, ctx: RequestContext<bool>, params: ConnectParams) -> Result<(), HandlerError> {
        let connection = self.connect(&params.owner_uri, params.connection).await;
        let peer = Arc::clone(ctx.connection());
        ctx.send_response(true).await;

        let complete = ConnectionCompleteParams {
            owner_uri: connection.owner_uri,
            connection_id: connection.connection_id,
            provider: self.provider_name(),
            connection_summary: connection.details,
        };
        let params = serde_json::to_value(complete)?;
        if let Err(err) = peer
            .send_notification(CONNECTION_COMPLETE_NOTIFICATION, Some(params))
            .await
        {
            warn!("Failed to send {}: {}", CONNECTION_COMPLETE_NOTIFICATION, err);
        }
        Ok(())
    }
}

fn not_connected(owner_uri: &str) -> HandlerError {
    HandlerError::failed(format!("No connection associated with URI: {}", owner_uri))
}

impl Service for ConnectionService {
    fn name(&self) -> &'static str {
        "connection"
    }

    fn register(self: Arc<Self>, registrar: &mut Registrar<'_>) -> Result<(), RegistrationError> {
        *self.provider.lock().unwrap_or_else(PoisonError::into_inner) =
            registrar.provider_name().to_string();

        let service = Arc::clone(&self);
        registrar.request(CONNECT_REQUEST, move |ctx: RequestContext<bool>, params: ConnectParams| {
            let service = Arc::clone(&service);
            async move { service.handle_connect(ctx, params).await }
        })?;

        let service = Arc::clone(&self);
        registrar.request(DISCONNECT_REQUEST, move |ctx: RequestContext<bool>, params: DisconnectParams| {
            let service = Arc::clone(&service);
            async move {
                let closed = service.disconnect(&params.owner_uri).await;
                ctx.send_response(closed).await;
                Ok(())
            }
        })?;

        let service = self;
        registrar.request(
            LIST_REQUEST,
            move |ctx: RequestContext<Vec<ConnectionSummary>>, _params: ListConnectionsParams| {
                let service = Arc::clone(&service);
                async move {
                    ctx.send_response(service.list().await).await;
                    Ok(())
                }
            },
        )?;

        tracing::info!(parent: registrar.span(), "Connection service registered");
        Ok(())
    }
}
