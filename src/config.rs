use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    clock::{Clock, SystemClock},
    storage::{MemoryStorage, Storage},
    transport::{HttpTransport, Transport},
    Client, Result,
};

/// JENTIS environment a container is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production.
    Live,
    /// Staging.
    Stage,
}

impl Environment {
    /// Wire name of the environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Live => "live",
            Environment::Stage => "stage",
        }
    }
}

/// Tracking configuration: where payloads go and which container they belong to.
///
/// `TrackConfig` is an immutable value. To change any field, build a new one and pass it to
/// [`Client::configure`].
///
/// # Examples
/// ```
/// # use jentis::{Environment, TrackConfig};
/// let config = TrackConfig::new("qc3ipx.ckion-dev.jtm-demo.com", "ckion-demo", Environment::Live)
///     .with_version("2")
///     .with_debug_code("a675b5f1-48d2-43bf-b314-ba4830cda52d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackConfig {
    /// Host name of the collection endpoint.
    pub track_domain: String,
    /// Container id. Also scopes all storage keys.
    pub container: String,
    /// Environment the container version is published to.
    pub environment: Environment,
    /// Container version, used together with `debug_code` to preview unpublished versions.
    pub version: Option<String>,
    /// Debug code of an unpublished container version.
    pub debug_code: Option<String>,
    /// Inactivity period in seconds after which a new session is started.
    #[serde(default = "default_session_timeout_seconds")]
    pub session_timeout_seconds: u64,
    /// Sent as a bearer token when set.
    pub auth_token: Option<String>,
    /// URL scheme of the collection endpoint.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Persist pushed events until they are submitted, so they survive a process restart.
    #[serde(default)]
    pub offline_tracking_enabled: bool,
}

fn default_session_timeout_seconds() -> u64 {
    TrackConfig::DEFAULT_SESSION_TIMEOUT.as_secs()
}

fn default_scheme() -> String {
    TrackConfig::DEFAULT_SCHEME.to_owned()
}

impl TrackConfig {
    /// Default session timeout.
    pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

    /// Default URL scheme of the collection endpoint.
    pub const DEFAULT_SCHEME: &'static str = "https";

    /// Create a configuration with default session timeout and scheme.
    pub fn new(
        track_domain: impl Into<String>,
        container: impl Into<String>,
        environment: Environment,
    ) -> TrackConfig {
        TrackConfig {
            track_domain: track_domain.into(),
            container: container.into(),
            environment,
            version: None,
            debug_code: None,
            session_timeout_seconds: default_session_timeout_seconds(),
            auth_token: None,
            scheme: default_scheme(),
            offline_tracking_enabled: false,
        }
    }

    /// Set the container version.
    pub fn with_version(mut self, version: impl Into<String>) -> TrackConfig {
        self.version = Some(version.into());
        self
    }

    /// Set the debug code used to preview an unpublished version.
    pub fn with_debug_code(mut self, debug_code: impl Into<String>) -> TrackConfig {
        self.debug_code = Some(debug_code.into());
        self
    }

    /// Inactivity period after which a new session is started. Sub-second precision is dropped.
    pub fn with_session_timeout(mut self, timeout: Duration) -> TrackConfig {
        self.session_timeout_seconds = timeout.as_secs();
        self
    }

    /// Authenticate requests with a bearer token.
    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> TrackConfig {
        self.auth_token = Some(auth_token.into());
        self
    }

    /// Override URL scheme. Mostly useful to point the SDK at a local plain-HTTP server.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> TrackConfig {
        self.scheme = scheme.into();
        self
    }

    /// Keep unsent events in storage across process restarts.
    pub fn with_offline_tracking(mut self, enabled: bool) -> TrackConfig {
        self.offline_tracking_enabled = enabled;
        self
    }

    /// Session timeout as a [`Duration`].
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }
}

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use jentis::{ClientConfig, Environment, TrackConfig};
/// let client = ClientConfig::new()
///     .track_config(TrackConfig::new("track.example.com", "acme", Environment::Live))
///     .initiator("jentis.app.my-plugin")
///     .app_info("MyApp", "1.2.0")
///     .to_client();
/// ```
pub struct ClientConfig {
    pub(crate) track_config: Option<TrackConfig>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) initiator: String,
    pub(crate) system_type: String,
    pub(crate) user_agent: String,
    pub(crate) request_timeout: Duration,
}

impl ClientConfig {
    /// Default initiator reported in `system.initiator`.
    pub const DEFAULT_INITIATOR: &'static str = "jentis.app.rust-sdk";

    /// Default value of `system.type`.
    pub const DEFAULT_SYSTEM_TYPE: &'static str = "app";

    /// Default timeout of a single HTTP request.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a default configuration. Without [`ClientConfig::track_config`], the client loads
    /// the configuration persisted in storage, if any.
    pub fn new() -> ClientConfig {
        ClientConfig {
            track_config: None,
            storage: Arc::new(MemoryStorage::new()),
            clock: Arc::new(SystemClock),
            initiator: ClientConfig::DEFAULT_INITIATOR.to_owned(),
            system_type: ClientConfig::DEFAULT_SYSTEM_TYPE.to_owned(),
            user_agent: build_user_agent(None, None),
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Tracking configuration to activate on start.
    pub fn track_config(mut self, track_config: TrackConfig) -> Self {
        self.track_config = Some(track_config);
        self
    }

    /// Storage for configuration, identifiers and (with offline tracking) pending events.
    ///
    /// Defaults to [`MemoryStorage`], which means identifiers do not survive process restarts.
    pub fn storage(self, storage: impl Storage + 'static) -> Self {
        self.shared_storage(Arc::new(storage))
    }

    /// Same as [`ClientConfig::storage`] for storage that is shared with other code.
    pub fn shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// Source of time for sessions and payload timestamps. Defaults to [`SystemClock`].
    pub fn clock(self, clock: impl Clock + 'static) -> Self {
        self.shared_clock(Arc::new(clock))
    }

    /// Same as [`ClientConfig::clock`] for a clock that is shared with other code.
    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Identifies the integration producing events.
    pub fn initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = initiator.into();
        self
    }

    /// Value reported in `system.type`.
    pub fn system_type(mut self, system_type: impl Into<String>) -> Self {
        self.system_type = system_type.into();
        self
    }

    /// Replace the generated user agent completely.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Include application name and version in the generated user agent.
    pub fn app_info(mut self, app_name: &str, app_version: &str) -> Self {
        self.user_agent = build_user_agent(Some(app_name), Some(app_version));
        self
    }

    /// Timeout of a single HTTP request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create a new [`Client`] sending payloads over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportFailure`](crate::Error::TransportFailure) if the HTTP client
    /// cannot be initialized (e.g., TLS backend is unavailable).
    pub fn to_client(self) -> Result<Client<HttpTransport>> {
        let transport = HttpTransport::new(self.request_timeout)?;
        Ok(Client::new(self, transport))
    }

    /// Create a new [`Client`] using a custom [`Transport`].
    pub fn to_client_with_transport<T: Transport>(self, transport: T) -> Client<T> {
        Client::new(self, transport)
    }
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig::new()
    }
}

/// `JentisSDK/<version> (<os>; <arch>) [<app>/<app version>]`
fn build_user_agent(app_name: Option<&str>, app_version: Option<&str>) -> String {
    let mut user_agent = format!(
        "JentisSDK/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    if let Some(app_name) = app_name {
        user_agent.push(' ');
        user_agent.push_str(app_name);
        user_agent.push('/');
        user_agent.push_str(app_version.unwrap_or("unknown"));
    }
    user_agent
}
