//! Method registry.
//!
//! [`MethodRegistryBuilder`] collects registrations while services run their
//! `register` phase; [`MethodRegistryBuilder::seal`] turns it into an immutable
//! [`MethodRegistry`] that the dispatcher shares without locking. The sealed type
//! has no way to register anything, so registration after start cannot happen.

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use dbtools_json_rpc::ErrorObject;

use crate::context::{NotificationContext, RawRequestContext, RequestContext};
use crate::error::{HandlerError, RegistrationError};

/// Whether a method expects a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Request,
    Notification,
}

/// Static description of one registration, used for introspection and docs.
#[derive(Debug, Clone, Serialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub kind: MethodKind,
    /// Service that registered the method, when registered through a provider
    pub service: Option<&'static str>,
    pub params_type: &'static str,
    pub params_schema: Value,
    pub result_type: Option<&'static str>,
    pub result_schema: Option<Value>,
}

/// Handler for a request method with parameters `P` and result `R`.
#[async_trait]
pub trait RequestHandler<P, R>: Send + Sync + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Handle one request. Must eventually answer through `ctx`; returning an
    /// error without answering makes the dispatcher reply with that error.
    async fn handle(&self, ctx: RequestContext<R>, params: P) -> Result<(), HandlerError>;
}

#[async_trait]
impl<P, R, F, Fut> RequestHandler<P, R> for F
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(RequestContext<R>, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: RequestContext<R>, params: P) -> Result<(), HandlerError> {
        (self)(ctx, params).await
    }
}

/// Handler for a notification method with parameters `P`.
#[async_trait]
pub trait NotificationHandler<P>: Send + Sync + 'static
where
    P: Send + 'static,
{
    async fn handle(&self, ctx: NotificationContext, params: P) -> Result<(), HandlerError>;
}

#[async_trait]
impl<P, F, Fut> NotificationHandler<P> for F
where
    P: Send + 'static,
    F: Fn(NotificationContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: NotificationContext, params: P) -> Result<(), HandlerError> {
        (self)(ctx, params).await
    }
}

/// Type-erased request entry point: decodes params, then calls the typed handler.
#[async_trait]
pub(crate) trait ErasedRequestHandler: Send + Sync {
    async fn call(&self, ctx: RawRequestContext, params: Option<Value>) -> Result<(), HandlerError>;
}

/// Type-erased notification entry point.
#[async_trait]
pub(crate) trait ErasedNotificationHandler: Send + Sync {
    async fn call(&self, ctx: NotificationContext, params: Option<Value>) -> Result<(), HandlerError>;
}

struct TypedRequest<P, R, H> {
    handler: H,
    _types: PhantomData<fn(P) -> R>,
}

#[async_trait]
impl<P, R, H> ErasedRequestHandler for TypedRequest<P, R, H>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    H: RequestHandler<P, R>,
{
    async fn call(&self, ctx: RawRequestContext, params: Option<Value>) -> Result<(), HandlerError> {
        match decode_params::<P>(params) {
            Ok(params) => self.handler.handle(RequestContext::new(ctx), params).await,
            Err(err) => {
                debug!(method = %ctx.method(), "Invalid params: {}", err);
                ctx.send_error_object(ErrorObject::invalid_params(&err.to_string()))
                    .await;
                Ok(())
            }
        }
    }
}

struct TypedNotification<P, H> {
    handler: H,
    _types: PhantomData<fn(P)>,
}

#[async_trait]
impl<P, H> ErasedNotificationHandler for TypedNotification<P, H>
where
    P: DeserializeOwned + Send + 'static,
    H: NotificationHandler<P>,
{
    async fn call(&self, ctx: NotificationContext, params: Option<Value>) -> Result<(), HandlerError> {
        let params = decode_params::<P>(params)
            .map_err(|e| HandlerError::failed(format!("invalid params: {}", e)))?;
        self.handler.handle(ctx, params).await
    }
}

/// Decode method parameters. Absent params, `null` and `{}` are interchangeable
/// for parameter types that accept either shape.
fn decode_params<P: DeserializeOwned>(params: Option<Value>) -> Result<P, serde_json::Error> {
    let value = params.unwrap_or(Value::Null);
    match serde_json::from_value::<P>(value.clone()) {
        Ok(params) => Ok(params),
        Err(err) => {
            let alternate = match &value {
                Value::Null => Value::Object(Map::new()),
                Value::Object(map) if map.is_empty() => Value::Null,
                _ => return Err(err),
            };
            serde_json::from_value::<P>(alternate).map_err(|_| err)
        }
    }
}

#[derive(Clone)]
pub(crate) enum MethodEntry {
    Request(Arc<dyn ErasedRequestHandler>),
    Notification(Arc<dyn ErasedNotificationHandler>),
}

/// One registered method: its description plus its handler.
#[derive(Clone)]
pub struct Registration {
    descriptor: MethodDescriptor,
    pub(crate) entry: MethodEntry,
}

impl Registration {
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> MethodKind {
        self.descriptor.kind
    }
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// Mutable registry used during the startup `register` phase.
#[derive(Default)]
pub struct MethodRegistryBuilder {
    methods: BTreeMap<String, Registration>,
}

impl MethodRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request method with a closure handler.
    pub fn request<P, R, F, Fut>(&mut self, name: &str, handler: F) -> Result<(), RegistrationError>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + JsonSchema + Send + 'static,
        F: Fn(RequestContext<R>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.request_handler::<P, R, F>(name, None, handler)
    }

    /// Register a request method with any [`RequestHandler`].
    pub fn request_handler<P, R, H>(
        &mut self,
        name: &str,
        service: Option<&'static str>,
        handler: H,
    ) -> Result<(), RegistrationError>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + JsonSchema + Send + 'static,
        H: RequestHandler<P, R>,
    {
        let descriptor = MethodDescriptor {
            name: name.to_string(),
            kind: MethodKind::Request,
            service,
            params_type: std::any::type_name::<P>(),
            params_schema: schema_of::<P>(),
            result_type: Some(std::any::type_name::<R>()),
            result_schema: Some(schema_of::<R>()),
        };
        let entry = MethodEntry::Request(Arc::new(TypedRequest {
            handler,
            _types: PhantomData,
        }));
        self.insert(descriptor, entry)
    }

    /// Register a notification method with a closure handler.
    pub fn notification<P, F, Fut>(&mut self, name: &str, handler: F) -> Result<(), RegistrationError>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(NotificationContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.notification_handler::<P, F>(name, None, handler)
    }

    /// Register a notification method with any [`NotificationHandler`].
    pub fn notification_handler<P, H>(
        &mut self,
        name: &str,
        service: Option<&'static str>,
        handler: H,
    ) -> Result<(), RegistrationError>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        H: NotificationHandler<P>,
    {
        let descriptor = MethodDescriptor {
            name: name.to_string(),
            kind: MethodKind::Notification,
            service,
            params_type: std::any::type_name::<P>(),
            params_schema: schema_of::<P>(),
            result_type: None,
            result_schema: None,
        };
        let entry = MethodEntry::Notification(Arc::new(TypedNotification {
            handler,
            _types: PhantomData,
        }));
        self.insert(descriptor, entry)
    }

    fn insert(
        &mut self,
        descriptor: MethodDescriptor,
        entry: MethodEntry,
    ) -> Result<(), RegistrationError> {
        if self.methods.contains_key(&descriptor.name) {
            return Err(RegistrationError::DuplicateMethod(descriptor.name));
        }
        debug!(method = %descriptor.name, kind = ?descriptor.kind, "Registered method");
        self.methods
            .insert(descriptor.name.clone(), Registration { descriptor, entry });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Freeze the registry. No registrations are accepted afterwards.
    pub fn seal(self) -> MethodRegistry {
        MethodRegistry {
            methods: self.methods,
        }
    }
}

/// Immutable method table shared by every connection.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: BTreeMap<String, Registration>,
}

impl MethodRegistry {
    pub fn lookup(&self, name: &str) -> Option<&Registration> {
        self.methods.get(name)
    }

    /// Descriptors in method-name order.
    pub fn descriptors(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values().map(|registration| &registration.descriptor)
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
