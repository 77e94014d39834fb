//! Host builder and runtime.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::error::{RegistrationError, StartupError};
use crate::provider::{Service, ServiceProvider};
use crate::registry::{MethodRegistry, MethodRegistryBuilder};
use crate::transport::TransportBinding;

/// Collects services and starts them in two phases.
///
/// ```no_run
/// # use dbtools_host::{HostBuilder, StartupError};
/// # fn example() -> Result<(), StartupError> {
/// let host = HostBuilder::new("PGSQL").build()?;
/// println!("{} methods", host.registry().len());
/// # Ok(())
/// # }
/// ```
pub struct HostBuilder {
    provider: ServiceProvider,
    error: Option<RegistrationError>,
}

impl HostBuilder {
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider: ServiceProvider::new(provider_name),
            error: None,
        }
    }

    /// Add a service. A duplicate service name is reported by [`HostBuilder::build`].
    pub fn service<S: Service>(self, service: S) -> Self {
        self.shared_service(Arc::new(service))
    }

    /// Add a service the caller keeps a handle to.
    pub fn shared_service<S: Service>(mut self, service: Arc<S>) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.provider.add(service) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Run `register` for every service, seal the registry, then run `initialize`
    /// for every service. Nothing is served before this succeeds.
    pub fn build(self) -> Result<Host, StartupError> {
        let HostBuilder {
            mut provider,
            error,
        } = self;
        if let Some(err) = error {
            return Err(err.into());
        }

        let mut builder = MethodRegistryBuilder::new();
        provider.register_all(&mut builder)?;
        let registry = Arc::new(builder.seal());
        provider.set_registry(Arc::clone(&registry));

        provider
            .initialize_all()
            .map_err(|(service, source)| StartupError::Initialize { service, source })?;

        info!(
            provider = provider.provider_name(),
            services = provider.len(),
            methods = registry.len(),
            "Host started"
        );
        Ok(Host {
            registry,
            provider: Arc::new(provider),
        })
    }
}

/// Fully initialized services plus their sealed method table.
#[derive(Debug, Clone)]
pub struct Host {
    registry: Arc<MethodRegistry>,
    provider: Arc<ServiceProvider>,
}

impl Host {
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<ServiceProvider> {
        &self.provider
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.registry))
    }

    /// Serve `binding` until its input ends or `shutdown` fires.
    pub async fn serve(
        &self,
        binding: Box<dyn TransportBinding>,
        shutdown: CancellationToken,
    ) -> Result<(), StartupError> {
        self.serve_with(binding, self.dispatcher(), shutdown).await
    }

    /// Like [`Host::serve`] with a caller-configured dispatcher.
    pub async fn serve_with(
        &self,
        binding: Box<dyn TransportBinding>,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<(), StartupError> {
        info!(transport = binding.kind(), "Serving");
        binding.serve(dispatcher, shutdown).await?;
        info!("Host stopped");
        Ok(())
    }
}
