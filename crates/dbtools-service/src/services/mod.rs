//! Services composed into the host.

pub mod capabilities;
pub mod connection;
pub mod scripting;
pub mod workspace;

use dbtools_host::{Host, HostBuilder, StartupError};

use crate::config::Provider;

pub use capabilities::CapabilitiesService;
pub use connection::ConnectionService;
pub use scripting::ScriptingService;
pub use workspace::WorkspaceService;

/// Build the host with every service for `provider`.
pub fn build_host(provider: Provider) -> Result<Host, StartupError> {
    HostBuilder::new(provider.as_str())
        .service(CapabilitiesService::new(provider.display_name()))
        .service(ConnectionService::new())
        .service(ScriptingService::default())
        .service(WorkspaceService::new())
        .build()
}
