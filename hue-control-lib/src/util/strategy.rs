use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::HueConfig;
use crate::util::error::DiscoveryError;
use crate::util::socket::{Message, Probe};

/// SSDP multicast group.
pub const SSDP_ADDRESS: &str = "239.255.255.250";
pub const SSDP_PORT: u16 = 1900;
/// Substring identifying a bridge's reply to the SSDP probe.
pub const BRIDGE_SIGNATURE: &str = "IpBridge";
/// How long the local probe listens for replies.
pub const PROBE_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_DIRECTORY_ENDPOINT: &str = "https://discovery.meethue.com/";

/// A way of finding bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SearchMethod {
    /// SSDP multicast probe on the local network.
    LocalProbe,
    /// Ask the cloud directory which bridges share our public address.
    DirectoryLookup,
    /// Reserved for scanning the local subnet. Never finds anything yet.
    AddressScan,
}

impl SearchMethod {
    /// The methods raced when the caller does not choose.
    pub const DEFAULT: [SearchMethod; 3] = [
        SearchMethod::LocalProbe,
        SearchMethod::DirectoryLookup,
        SearchMethod::AddressScan,
    ];
}

impl FromStr for SearchMethod {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local-probe" | "upnp" => Ok(SearchMethod::LocalProbe),
            "directory-lookup" | "nupnp" => Ok(SearchMethod::DirectoryLookup),
            "address-scan" | "ip" => Ok(SearchMethod::AddressScan),
            _ => Err(DiscoveryError::InvalidMethod(s.trim().to_string())),
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchMethod::LocalProbe => "local-probe",
            SearchMethod::DirectoryLookup => "directory-lookup",
            SearchMethod::AddressScan => "address-scan",
        };
        write!(f, "{}", name)
    }
}

/**
Which methods a search should race.

Parses from a single method name or a comma-separated list; an empty string
selects [`MethodSelector::All`].
 */
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MethodSelector {
    #[default]
    All,
    One(SearchMethod),
    Many(Vec<SearchMethod>),
}

impl MethodSelector {
    /// The methods to start, in start order.
    pub fn methods(&self) -> Vec<SearchMethod> {
        match self {
            MethodSelector::All => SearchMethod::DEFAULT.to_vec(),
            MethodSelector::One(method) => vec![*method],
            MethodSelector::Many(methods) => methods.clone(),
        }
    }
}

impl FromStr for MethodSelector {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(MethodSelector::All);
        }
        let mut methods = s
            .split(',')
            .map(SearchMethod::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if methods.len() == 1 {
            Ok(MethodSelector::One(methods.remove(0)))
        } else {
            Ok(MethodSelector::Many(methods))
        }
    }
}

impl From<SearchMethod> for MethodSelector {
    fn from(method: SearchMethod) -> Self {
        MethodSelector::One(method)
    }
}

impl From<Vec<SearchMethod>> for MethodSelector {
    fn from(methods: Vec<SearchMethod>) -> Self {
        MethodSelector::Many(methods)
    }
}

impl From<Option<SearchMethod>> for MethodSelector {
    fn from(method: Option<SearchMethod>) -> Self {
        method.map_or(MethodSelector::All, MethodSelector::One)
    }
}

/**
One discovery technique.

`run` returns the candidate addresses found, possibly with duplicates. Implementations
should return promptly with [`DiscoveryError::Cancelled`] once `cancel` fires, and
must release whatever they hold when their future is dropped.
 */
pub trait Strategy: Send + Sync {
    fn run(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<Vec<String>, DiscoveryError>>;
}

/// SSDP search on the local network.
pub struct LocalProbe {
    probe: Probe,
    address: String,
    port: u16,
    window: Duration,
}

impl LocalProbe {
    pub fn new(probe: Probe, address: impl Into<String>, port: u16, window: Duration) -> Self {
        LocalProbe {
            probe,
            address: address.into(),
            port,
            window,
        }
    }

    /// The `M-SEARCH` request, one header per line.
    pub fn request_lines() -> Vec<String> {
        vec![
            "M-SEARCH * HTTP/1.1".to_string(),
            format!("HOST: {}:{}", SSDP_ADDRESS, SSDP_PORT),
            "MAN: ssdp:discover".to_string(),
            "MX: 10".to_string(),
            "ST: ssdp:all".to_string(),
        ]
    }

    pub fn is_bridge_reply(message: &Message) -> bool {
        message.text.contains(BRIDGE_SIGNATURE)
    }
}

impl Strategy for LocalProbe {
    fn run(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<Vec<String>, DiscoveryError>> {
        async move {
            let sent = self
                .probe
                .send(
                    Self::request_lines(),
                    self.port,
                    &self.address,
                    self.window,
                    &cancel,
                )
                .await;
            match sent {
                Ok(messages) => {
                    let addresses: Vec<String> = messages
                        .iter()
                        .filter(|message| Self::is_bridge_reply(message))
                        .map(|message| {
                            info!("Reply from {} matched a bridge", message.source);
                            message.source.ip().to_string()
                        })
                        .collect();
                    debug!(
                        "Local probe got {} message(s), {} from bridges",
                        messages.len(),
                        addresses.len()
                    );
                    Ok(addresses)
                }
                Err(DiscoveryError::Network(e)) => {
                    warn!("Local probe failed, treating as no results: {}", e);
                    Ok(Vec::new())
                }
                Err(e) => Err(e),
            }
        }
        .boxed()
    }
}

/// One record of the cloud directory's reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DirectoryEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub internalipaddress: String,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Looks the bridge up through the cloud directory.
pub struct DirectoryLookup {
    client: Client,
    endpoint: String,
}

impl DirectoryLookup {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        DirectoryLookup {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn fetch(&self) -> Result<Vec<DirectoryEntry>, DiscoveryError> {
        debug!("Sending request to {} to find bridges", self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?;
        let entries = response.json::<Vec<DirectoryEntry>>().await?;
        debug!("Directory returned: {:?}", entries);
        Ok(entries)
    }
}

impl Strategy for DirectoryLookup {
    fn run(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<Vec<String>, DiscoveryError>> {
        async move {
            let entries = tokio::select! {
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                entries = self.fetch() => entries?,
            };
            Ok(entries
                .into_iter()
                .map(|entry| entry.internalipaddress)
                .collect())
        }
        .boxed()
    }
}

/// Placeholder for a subnet scan.
pub struct AddressScan;

impl Strategy for AddressScan {
    fn run(&self, _cancel: CancellationToken) -> BoxFuture<'_, Result<Vec<String>, DiscoveryError>> {
        async {
            debug!("Address scan is not implemented, reporting no results");
            Err(DiscoveryError::NoResults)
        }
        .boxed()
    }
}

/// The strategies a [`crate::util::discovery::Discovery`] can dispatch to.
#[derive(Clone, Default)]
pub struct StrategySet {
    strategies: HashMap<SearchMethod, Arc<dyn Strategy>>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All three methods, wired to `client` and `probe` as `config` describes.
    pub fn standard(client: Client, probe: Probe, config: &HueConfig) -> Self {
        StrategySet::new()
            .with_strategy(
                SearchMethod::LocalProbe,
                LocalProbe::new(
                    probe,
                    config.probe_address.clone(),
                    config.probe_port,
                    config.probe_window,
                ),
            )
            .with_strategy(
                SearchMethod::DirectoryLookup,
                DirectoryLookup::new(client, config.directory_endpoint.clone()),
            )
            .with_strategy(SearchMethod::AddressScan, AddressScan)
    }

    pub fn with_strategy(mut self, method: SearchMethod, strategy: impl Strategy + 'static) -> Self {
        self.insert(method, Arc::new(strategy));
        self
    }

    pub fn insert(&mut self, method: SearchMethod, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(method, strategy);
    }

    pub fn resolve(&self, method: SearchMethod) -> Result<Arc<dyn Strategy>, DiscoveryError> {
        self.strategies
            .get(&method)
            .cloned()
            .ok_or_else(|| DiscoveryError::InvalidMethod(method.to_string()))
    }

    /// Resolves every method, failing on the first one without a strategy.
    pub fn dispatch(
        &self,
        methods: &[SearchMethod],
    ) -> Result<Vec<(SearchMethod, Arc<dyn Strategy>)>, DiscoveryError> {
        methods
            .iter()
            .map(|method| self.resolve(*method).map(|strategy| (*method, strategy)))
            .collect()
    }
}
