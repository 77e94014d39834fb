//! Service composition.
//!
//! Services are added to a [`crate::HostBuilder`] and go through two phases:
//! `register` (every service adds its methods to the registry) and `initialize`
//! (every service may look up its peers). Initialization starts only once every
//! service has registered, so peer lookup never depends on declaration order.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Span;

use crate::context::{NotificationContext, RequestContext};
use crate::error::{HandlerError, ProviderError, RegistrationError};
use crate::registry::{MethodRegistry, MethodRegistryBuilder, NotificationHandler, RequestHandler};

/// A unit of functionality contributing protocol methods.
pub trait Service: Send + Sync + 'static {
    /// Unique name, also used for lookup through [`ServiceProvider::get_by_name`]
    fn name(&self) -> &'static str;

    /// Add this service's methods. Handlers typically capture a clone of `self`.
    fn register(self: Arc<Self>, registrar: &mut Registrar<'_>) -> Result<(), RegistrationError>;

    /// Resolve peers. Runs after every service has registered.
    fn initialize(&self, _provider: &ServiceProvider) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Lifecycle of a service inside the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Registered,
    Initialized,
}

struct ServiceEntry {
    name: &'static str,
    service: Arc<dyn Service>,
    instance: Arc<dyn Any + Send + Sync>,
    state: ServiceState,
}

impl ServiceEntry {
    fn new<S: Service>(service: Arc<S>) -> Self {
        Self {
            name: service.name(),
            instance: service.clone(),
            service,
            state: ServiceState::Registered,
        }
    }
}

/// Shared container of the host's services.
///
/// Services are looked up by type with [`ServiceProvider::get`]; a lookup for a
/// type that was never added fails with a [`ProviderError`] during startup.
pub struct ServiceProvider {
    provider_name: String,
    entries: Vec<ServiceEntry>,
    by_name: HashMap<&'static str, usize>,
    registry: Option<Arc<MethodRegistry>>,
}

impl ServiceProvider {
    pub(crate) fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            entries: Vec::new(),
            by_name: HashMap::new(),
            registry: None,
        }
    }

    pub(crate) fn add<S: Service>(&mut self, service: Arc<S>) -> Result<(), RegistrationError> {
        let name = service.name();
        if self.by_name.contains_key(name) {
            return Err(RegistrationError::DuplicateService(name.to_string()));
        }
        self.by_name.insert(name, self.entries.len());
        self.entries.push(ServiceEntry::new(service));
        Ok(())
    }

    /// Name of the database provider this host serves (e.g. `PGSQL`)
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// The unique service of type `S`.
    pub fn get<S: Service>(&self) -> Result<Arc<S>, ProviderError> {
        self.entries
            .iter()
            .find_map(|entry| entry.instance.clone().downcast::<S>().ok())
            .ok_or(ProviderError::MissingService(type_name::<S>()))
    }

    /// The service registered under `name`.
    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn Service>, ProviderError> {
        self.by_name
            .get(name)
            .map(|&index| Arc::clone(&self.entries[index].service))
            .ok_or_else(|| ProviderError::UnknownService(name.to_string()))
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.by_name.get(name).map(|&index| self.entries[index].state)
    }

    /// The sealed method table. Available from the `initialize` phase on.
    pub fn registry(&self) -> Option<&Arc<MethodRegistry>> {
        self.registry.as_ref()
    }

    pub(crate) fn set_registry(&mut self, registry: Arc<MethodRegistry>) {
        self.registry = Some(registry);
    }

    /// Service names in the order they were added
    pub fn service_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Phase one: every service adds its methods to `builder`.
    pub(crate) fn register_all(
        &self,
        builder: &mut MethodRegistryBuilder,
    ) -> Result<(), RegistrationError> {
        for entry in &self.entries {
            let span = tracing::info_span!("service", service = entry.name, provider = %self.provider_name);
            let mut registrar = Registrar {
                builder: &mut *builder,
                service: entry.name,
                provider_name: &self.provider_name,
                span,
            };
            Arc::clone(&entry.service).register(&mut registrar)?;
            tracing::debug!(service = entry.name, "Service registered");
        }
        Ok(())
    }

    /// Phase two: every service resolves its peers. Stops at the first failure.
    pub(crate) fn initialize_all(&mut self) -> Result<(), (&'static str, ProviderError)> {
        for index in 0..self.entries.len() {
            let (name, service) = {
                let entry = &self.entries[index];
                (entry.name, Arc::clone(&entry.service))
            };
            service.initialize(self).map_err(|err| (name, err))?;
            self.entries[index].state = ServiceState::Initialized;
            tracing::debug!(service = name, "Service initialized");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("provider_name", &self.provider_name)
            .field("services", &self.service_names())
            .finish()
    }
}

/// Registration handle given to [`Service::register`].
///
/// Methods registered here are attributed to the service in generated docs.
pub struct Registrar<'a> {
    builder: &'a mut MethodRegistryBuilder,
    service: &'static str,
    provider_name: &'a str,
    span: Span,
}

impl<'a> Registrar<'a> {
    pub fn service_name(&self) -> &'static str {
        self.service
    }

    pub fn provider_name(&self) -> &str {
        self.provider_name
    }

    /// Span carrying the service and provider names; handlers may enter it or
    /// use it as a parent for their own spans.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn request<P, R, F, Fut>(&mut self, name: &str, handler: F) -> Result<&mut Self, RegistrationError>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + JsonSchema + Send + 'static,
        F: Fn(RequestContext<R>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.request_handler::<P, R, F>(name, handler)
    }

    pub fn request_handler<P, R, H>(&mut self, name: &str, handler: H) -> Result<&mut Self, RegistrationError>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + JsonSchema + Send + 'static,
        H: RequestHandler<P, R>,
    {
        self.builder
            .request_handler::<P, R, H>(name, Some(self.service), handler)?;
        Ok(self)
    }

    pub fn notification<P, F, Fut>(&mut self, name: &str, handler: F) -> Result<&mut Self, RegistrationError>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(NotificationContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.notification_handler::<P, F>(name, handler)
    }

    pub fn notification_handler<P, H>(&mut self, name: &str, handler: H) -> Result<&mut Self, RegistrationError>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        H: NotificationHandler<P>,
    {
        self.builder
            .notification_handler::<P, H>(name, Some(self.service), handler)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    impl Service for Alpha {
        fn name(&self) -> &'static str {
            "alpha"
        }

        fn register(self: Arc<Self>, _registrar: &mut Registrar<'_>) -> Result<(), RegistrationError> {
            Ok(())
        }
    }

    impl Service for Beta {
        fn name(&self) -> &'static str {
            "beta"
        }

        fn register(self: Arc<Self>, _registrar: &mut Registrar<'_>) -> Result<(), RegistrationError> {
            Ok(())
        }
    }

    #[test]
    fn test_typed_and_named_lookup() {
        let mut provider = ServiceProvider::new("PGSQL");
        provider.add(Arc::new(Alpha)).unwrap();

        assert_eq!(provider.provider_name(), "PGSQL");
        assert!(provider.get::<Alpha>().is_ok());
        assert!(matches!(
            provider.get::<Beta>(),
            Err(ProviderError::MissingService(_))
        ));
        assert_eq!(provider.get_by_name("alpha").unwrap().name(), "alpha");
        assert!(matches!(
            provider.get_by_name("gamma"),
            Err(ProviderError::UnknownService(name)) if name == "gamma"
        ));
    }

    #[test]
    fn test_duplicate_service_name_is_rejected() {
        let mut provider = ServiceProvider::new("PGSQL");
        provider.add(Arc::new(Alpha)).unwrap();
        assert_eq!(
            provider.add(Arc::new(Alpha)),
            Err(RegistrationError::DuplicateService("alpha".to_string()))
        );
        assert_eq!(provider.len(), 1);
    }

    #[test]
    fn test_initialize_marks_services() {
        let mut provider = ServiceProvider::new("MYSQL");
        provider.add(Arc::new(Alpha)).unwrap();
        provider.add(Arc::new(Beta)).unwrap();
        assert_eq!(provider.state("beta"), Some(ServiceState::Registered));

        provider.initialize_all().unwrap();
        assert_eq!(provider.state("alpha"), Some(ServiceState::Initialized));
        assert_eq!(provider.state("beta"), Some(ServiceState::Initialized));
        assert_eq!(provider.service_names(), vec!["alpha", "beta"]);
    }
}
