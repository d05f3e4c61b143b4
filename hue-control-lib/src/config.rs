use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::util::strategy::{DEFAULT_DIRECTORY_ENDPOINT, PROBE_WINDOW, SSDP_ADDRESS, SSDP_PORT};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/**
Settings for a [`crate::control_interface::Hue`] instance.

Every field has a default, so a config can be deserialized from a partial document.
Durations are given in milliseconds.

```
use hue_control_lib::config::HueConfig;
use std::time::Duration;

let config = HueConfig::default()
    .with_username("newdeveloper")
    .with_probe_window(Duration::from_secs(3));
assert_eq!(config.username.as_deref(), Some("newdeveloper"));
```
 */
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HueConfig {
    /// Skip discovery and talk to this bridge directly.
    pub bridge_address: Option<String>,
    /// An existing whitelisted user on the bridge. Required for the lights API.
    pub username: Option<String>,
    /// The cloud endpoint queried by the directory lookup.
    pub directory_endpoint: String,
    /// How long the local probe listens for replies.
    #[serde(deserialize_with = "deserialize_duration_millis")]
    pub probe_window: Duration,
    /// Timeout applied to every HTTP request.
    #[serde(deserialize_with = "deserialize_duration_millis")]
    pub request_timeout: Duration,
    pub probe_address: String,
    pub probe_port: u16,
}

impl Default for HueConfig {
    fn default() -> Self {
        HueConfig {
            bridge_address: None,
            username: None,
            directory_endpoint: DEFAULT_DIRECTORY_ENDPOINT.to_string(),
            probe_window: PROBE_WINDOW,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_address: SSDP_ADDRESS.to_string(),
            probe_port: SSDP_PORT,
        }
    }
}

impl HueConfig {
    pub fn with_bridge_address(mut self, address: impl Into<String>) -> Self {
        self.bridge_address = Some(address.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_directory_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.directory_endpoint = endpoint.into();
        self
    }

    pub fn with_probe_window(mut self, window: Duration) -> Self {
        self.probe_window = window;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sends the local probe somewhere other than the SSDP multicast group.
    pub fn with_probe_target(mut self, address: impl Into<String>, port: u16) -> Self {
        self.probe_address = address.into();
        self.probe_port = port;
        self
    }
}

fn deserialize_duration_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis: u64 = Deserialize::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}
