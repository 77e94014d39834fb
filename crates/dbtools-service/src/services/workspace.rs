//! Workspace service: client-side settings and client log lines.

use std::sync::{Arc, RwLock};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use dbtools_host::{NotificationContext, Registrar, RegistrationError, Service};

pub const DID_CHANGE_CONFIGURATION_NOTIFICATION: &str = "workspace/didChangeConfiguration";
pub const LOG_NOTIFICATION: &str = "log";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DidChangeConfigurationParams {
    pub settings: Value,
}

/// Severity of a client log line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LogParams {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(alias = "msg")]
    pub message: String,
}

#[derive(Default)]
pub struct WorkspaceService {
    settings: RwLock<Value>,
    last_client_log: RwLock<Option<String>>,
}

impl WorkspaceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest settings pushed by the client, `null` until the first push
    pub fn settings(&self) -> Value {
        self.settings
            .read()
            .map(|settings| settings.clone())
            .unwrap_or(Value::Null)
    }

    /// Most recent line received through the `log` notification
    pub fn last_client_log(&self) -> Option<String> {
        self.last_client_log.read().ok().and_then(|line| line.clone())
    }

    fn record_client_log(&self, message: &str) {
        if let Ok(mut last) = self.last_client_log.write() {
            *last = Some(message.to_string());
        }
    }

    fn update_settings(&self, settings: Value) {
        match self.settings.write() {
            Ok(mut current) => *current = settings,
            Err(_) => error!("Workspace settings lock poisoned, update dropped"),
        }
    }
}

impl Service for WorkspaceService {
    fn name(&self) -> &'static str {
        "workspace"
    }

    fn register(self: Arc<Self>, registrar: &mut Registrar<'_>) -> Result<(), RegistrationError> {
        let service = Arc::clone(&self);
        registrar.notification(
            DID_CHANGE_CONFIGURATION_NOTIFICATION,
            move |ctx: NotificationContext, params: DidChangeConfigurationParams| {
                let service = Arc::clone(&service);
                async move {
                    debug!(connection = %ctx.connection_id(), "Configuration changed");
                    service.update_settings(params.settings);
                    Ok(())
                }
            },
        )?;

        let service = Arc::clone(&self);
        registrar.notification(LOG_NOTIFICATION, move |ctx: NotificationContext, params: LogParams| {
            let service = Arc::clone(&service);
            async move {
                let connection = ctx.connection_id();
                match params.level {
                    LogLevel::Error => error!(connection, "client: {}", params.message),
                    LogLevel::Warning => warn!(connection, "client: {}", params.message),
                    LogLevel::Info => info!(connection, "client: {}", params.message),
                    LogLevel::Debug => debug!(connection, "client: {}", params.message),
                }
                service.record_client_log(&params.message);
                Ok(())
            }
        })?;
        Ok(())
    }
}
