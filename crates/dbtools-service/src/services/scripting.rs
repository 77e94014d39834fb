//! Scripting service: generates SQL for a database object.

use std::sync::{Arc, OnceLock};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::error;

use dbtools_host::{
    HandlerError, ProviderError, Registrar, RegistrationError, RequestContext, RetryPolicy,
    Service, ServiceProvider,
};

use super::connection::ConnectionService;

pub const SCRIPT_AS_REQUEST: &str = "scripting/scriptAs";

/// What to script. Carried on the wire as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum ScriptOperation {
    Select = 0,
    Create = 1,
    Insert = 2,
    Update = 3,
    Delete = 4,
    Execute = 5,
    Alter = 6,
}

impl From<ScriptOperation> for u8 {
    fn from(operation: ScriptOperation) -> Self {
        operation as u8
    }
}

impl TryFrom<u8> for ScriptOperation {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => ScriptOperation::Select,
            1 => ScriptOperation::Create,
            2 => ScriptOperation::Insert,
            3 => ScriptOperation::Update,
            4 => ScriptOperation::Delete,
            5 => ScriptOperation::Execute,
            6 => ScriptOperation::Alter,
            other => return Err(format!("unknown script operation {}", other)),
        })
    }
}

/// Object to script, as shown in the client's object explorer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptingObject {
    #[serde(rename = "type")]
    pub object_type: String,
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScriptAsParams {
    pub owner_uri: String,
    #[schemars(with = "u8")]
    pub operation: ScriptOperation,
    pub scripting_objects: Vec<ScriptingObject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScriptAsResponse {
    pub owner_uri: String,
    pub script: String,
}

/// Identifier quoting of the target database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
}

impl Dialect {
    pub fn for_provider(provider_name: &str) -> Self {
        if provider_name.eq_ignore_ascii_case("MYSQL") {
            Dialect::MySql
        } else {
            Dialect::Postgres
        }
    }

    fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
        }
    }

    fn qualified(&self, object: &ScriptingObject) -> String {
        if object.schema.is_empty() {
            self.quote(&object.name)
        } else {
            format!("{}.{}", self.quote(&object.schema), self.quote(&object.name))
        }
    }
}

/// Render `operation` for `object`.
pub fn script(
    dialect: Dialect,
    operation: ScriptOperation,
    object: &ScriptingObject,
) -> Result<String, HandlerError> {
    let target = dialect.qualified(object);
    let kind = object.object_type.to_ascii_lowercase();
    let script = match (operation, kind.as_str()) {
        (ScriptOperation::Select, "table" | "view") => {
            format!("SELECT * FROM {}\nLIMIT 1000;", target)
        }
        (ScriptOperation::Create, "table") => format!("CREATE TABLE {} (\n);", target),
        (ScriptOperation::Create, "view") => format!("CREATE VIEW {} AS\nSELECT 1;", target),
        (ScriptOperation::Delete, "table" | "view" | "function") => {
            format!("DROP {} {};", kind.to_ascii_uppercase(), target)
        }
        (ScriptOperation::Insert, "table") => {
            format!("INSERT INTO {}\nVALUES ();", target)
        }
        _ => {
            return Err(HandlerError::failed(format!(
                "Scripting operation {:?} is not supported for object type {}",
                operation, object.object_type
            )));
        }
    };
    Ok(script)
}

pub struct ScriptingService {
    retry: RetryPolicy,
    dialect: OnceLock<Dialect>,
    connections: OnceLock<Arc<ConnectionService>>,
}

impl Default for ScriptingService {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl ScriptingService {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            dialect: OnceLock::new(),
            connections: OnceLock::new(),
        }
    }

    fn connections(&self) -> Result<&Arc<ConnectionService>, HandlerError> {
        self.connections
            .get()
            .ok_or_else(|| HandlerError::failed("connection service is not available"))
    }

    async fn script_as(&self, params: &ScriptAsParams, attempt: u32) -> Result<String, HandlerError> {
        let connections = self.connections()?;
        if attempt > 1 {
            connections.reconnect(&params.owner_uri).await?;
        } else {
            connections.get_connection(&params.owner_uri).await?;
        }

        let object = params
            .scripting_objects
            .first()
            .ok_or_else(|| HandlerError::failed("scriptingObjects must not be empty"))?;
        let dialect = self.dialect.get().copied().unwrap_or(Dialect::Postgres);
        script(dialect, params.operation, object)
    }

    async fn handle_script_as(
        &self,
        ctx: RequestContext<ScriptAsResponse>,
        params: ScriptAsParams,
    ) -> Result<(), HandlerError> {
        let outcome = self
            .retry
            .run(|attempt| self.script_as(&params, attempt))
            .await;

        match outcome {
            Ok(script) => {
                ctx.send_response(ScriptAsResponse {
                    owner_uri: params.owner_uri,
                    script,
                })
                .await;
            }
            Err(err) => {
                error!(owner_uri = %params.owner_uri, "Scripting operation failed: {}", err);
                let data = serde_json::to_value(&params)?;
                ctx.send_error(err.message(), Some(data)).await;
            }
        }
        Ok(())
    }
}

impl Service for ScriptingService {
    fn name(&self) -> &'static str {
        "scripting"
    }

    fn register(self: Arc<Self>, registrar: &mut Registrar<'_>) -> Result<(), RegistrationError> {
        let _ = self
            .dialect
            .set(Dialect::for_provider(registrar.provider_name()));

        let service = self;
        registrar.request(
            SCRIPT_AS_REQUEST,
            move |ctx: RequestContext<ScriptAsResponse>, params: ScriptAsParams| {
                let service = Arc::clone(&service);
                async move { service.handle_script_as(ctx, params).await }
            },
        )?;

        tracing::info!(parent: registrar.span(), "Scripting service registered");
        Ok(())
    }

    fn initialize(&self, provider: &ServiceProvider) -> Result<(), ProviderError> {
        let connections = provider.get::<ConnectionService>()?;
        let _ = self.connections.set(connections);
        Ok(())
    }
}
