//! Process configuration.
//!
//! Every setting is resolved with the precedence command line > environment
//! variable > `config.toml` > built-in default. Clap handles the first two; the
//! file and the defaults are layered underneath in [`ServiceConfig::resolve`].

use std::path::{Path, PathBuf};

use clap::builder::BoolishValueParser;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use thiserror::Error;

use dbtools_host::transport::http::{DEFAULT_LISTEN_ADDRESS, DEFAULT_LISTEN_PORT};
use dbtools_host::{TransportConfig, WebServerConfig};

/// Name of the configuration file looked up next to the executable
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Database provider served by this process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
pub enum Provider {
    #[default]
    #[value(name = "PGSQL")]
    #[serde(rename = "PGSQL", alias = "pgsql")]
    Pgsql,
    #[value(name = "MYSQL")]
    #[serde(rename = "MYSQL", alias = "mysql")]
    Mysql,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Pgsql => "PGSQL",
            Provider::Mysql => "MYSQL",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Pgsql => "PostgreSQL",
            Provider::Mysql => "MySQL",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("--console-logging can only be enabled if --enable-web-server is true")]
    ConsoleLoggingRequiresWebServer,
}

/// Command line, with environment fallbacks.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "dbtoolsservice", version, about = "Start the database tools service")]
pub struct Cli {
    /// Print Markdown documentation for every registered method and exit
    #[arg(long)]
    pub generate_markdown: bool,

    /// Read protocol input from this file instead of stdin
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Database provider to serve
    #[arg(long, value_enum, ignore_case = true)]
    pub provider: Option<Provider>,

    /// Configuration file (default: config.toml next to the executable)
    #[arg(long, env = "DBTOOLS_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory to store logs
    #[arg(long, env = "LOG_DIR", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Receive requests over HTTP and WebSocket instead of stdio
    #[arg(long, env = "ENABLE_WEB_SERVER", num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    pub enable_web_server: Option<bool>,

    /// Address the web server listens on (default: 0.0.0.0)
    #[arg(long, env = "LISTEN_ADDRESS")]
    pub listen_address: Option<String>,

    /// Port the web server listens on (default: 8443)
    #[arg(long, env = "LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// Log every frame and accept WebSocket upgrades from any origin
    #[arg(long, num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    pub debug_web_server: Option<bool>,

    /// Disable keep-alive for the web server. For debugging only
    #[arg(long, env = "DISABLE_KEEP_ALIVE", num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    pub disable_keep_alive: Option<bool>,

    /// Allow any origin by reflecting it back. For debugging only
    #[arg(long, env = "ENABLE_DYNAMIC_CORS", num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    pub enable_dynamic_cors: Option<bool>,

    /// Origins allowed to use the web server, comma separated
    #[arg(long, env = "CORS_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub cors_allowed_origins: Vec<String>,

    /// Also log to stderr (requires --enable-web-server)
    #[arg(long, env = "CONSOLE_LOGGING", num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    pub console_logging: Option<bool>,
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub general: GeneralSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralSection {
    pub log_dir: Option<PathBuf>,
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub enable_web_server: Option<bool>,
    pub listen_address: Option<String>,
    pub listen_port: Option<u16>,
    pub console_logging: Option<bool>,
    pub disable_keep_alive: Option<bool>,
    pub enable_dynamic_cors: Option<bool>,
    pub debug_web_server: Option<bool>,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl FileConfig {
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`. A missing file is only an error when `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(path, &contents),
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Fully resolved settings of one process run
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub provider: Provider,
    pub generate_markdown: bool,
    pub input: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub enable_web_server: bool,
    pub console_logging: bool,
    pub web: WebServerConfig,
}

impl ServiceConfig {
    /// Parse the process arguments and environment, then layer the config file underneath.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path, true)?,
            None => FileConfig::load(&executable_dir().join(CONFIG_FILE_NAME), false)?,
        };
        Self::resolve(cli, file)
    }

    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let FileConfig { general, server } = file;

        let enable_web_server = cli
            .enable_web_server
            .or(server.enable_web_server)
            .unwrap_or(false);
        let console_logging = cli
            .console_logging
            .or(server.console_logging)
            .unwrap_or(false);
        if console_logging && !enable_web_server {
            return Err(ConfigError::ConsoleLoggingRequiresWebServer);
        }

        let cors_allowed_origins = if cli.cors_allowed_origins.is_empty() {
            server.cors_allowed_origins.unwrap_or_default()
        } else {
            cli.cors_allowed_origins
        };

        Ok(Self {
            provider: cli.provider.or(general.provider).unwrap_or_default(),
            generate_markdown: cli.generate_markdown,
            input: cli.input,
            log_dir: cli
                .log_dir
                .or(general.log_dir)
                .unwrap_or_else(executable_dir),
            enable_web_server,
            console_logging,
            web: WebServerConfig {
                listen_address: cli
                    .listen_address
                    .or(server.listen_address)
                    .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string()),
                listen_port: cli
                    .listen_port
                    .or(server.listen_port)
                    .unwrap_or(DEFAULT_LISTEN_PORT),
                debug: cli
                    .debug_web_server
                    .or(server.debug_web_server)
                    .unwrap_or(false),
                disable_keep_alive: cli
                    .disable_keep_alive
                    .or(server.disable_keep_alive)
                    .unwrap_or(false),
                enable_dynamic_cors: cli
                    .enable_dynamic_cors
                    .or(server.enable_dynamic_cors)
                    .unwrap_or(false),
                cors_allowed_origins,
            },
        })
    }

    /// Transport selected by these settings.
    pub fn transport(&self) -> TransportConfig {
        if self.enable_web_server {
            TransportConfig::Network(self.web.clone())
        } else {
            TransportConfig::Stream {
                input: self.input.clone(),
            }
        }
    }
}

/// Directory of the running executable, falling back to the working directory.
fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
