//! Capabilities service: tells the client which provider and methods are available.

use std::sync::{Arc, OnceLock};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use dbtools_host::{
    ProviderError, Registrar, RegistrationError, RequestContext, Service, ServiceProvider,
};

pub const LIST_REQUEST: &str = "capabilities/list";

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct CapabilitiesParams {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResult {
    pub provider_name: String,
    pub provider_display_name: String,
    pub methods: Vec<String>,
}

pub struct CapabilitiesService {
    display_name: String,
    capabilities: OnceLock<CapabilitiesResult>,
}

impl CapabilitiesService {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            capabilities: OnceLock::new(),
        }
    }

    pub fn capabilities(&self) -> Option<&CapabilitiesResult> {
        self.capabilities.get()
    }
}

impl Service for CapabilitiesService {
    fn name(&self) -> &'static str {
        "capabilities"
    }

    fn register(self: Arc<Self>, registrar: &mut Registrar<'_>) -> Result<(), RegistrationError> {
        let service = self;
        registrar.request(
            LIST_REQUEST,
            move |ctx: RequestContext<CapabilitiesResult>, _params: CapabilitiesParams| {
                let service = Arc::clone(&service);
                async move {
                    match service.capabilities() {
                        Some(capabilities) => ctx.send_response(capabilities.clone()).await,
                        None => ctx.send_error("capabilities are not initialized", None).await,
                    }
                    Ok(())
                }
            },
        )?;
        Ok(())
    }

    fn initialize(&self, provider: &ServiceProvider) -> Result<(), ProviderError> {
        let registry = provider.registry().ok_or_else(|| ProviderError::Initialization {
            service: "capabilities",
            message: "method registry is not sealed".to_string(),
        })?;

        let mut methods = registry.method_names();
        methods.sort();
        let _ = self.capabilities.set(CapabilitiesResult {
            provider_name: provider.provider_name().to_string(),
            provider_display_name: self.display_name.clone(),
            methods,
        });
        Ok(())
    }
}
