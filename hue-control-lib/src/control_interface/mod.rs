use anyhow::{anyhow, Context};
use clap::ValueEnum;
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use url::Url;

use crate::config::HueConfig;
use crate::util::description::{fetch_description, parse_description, BridgeDescription, HttpDescriptionSource};
use crate::util::discovery::{Candidate, Discovery, SearchResult};
use crate::util::endpoint::endpoint;
use crate::util::socket::Probe;
use crate::util::strategy::{MethodSelector, StrategySet};

pub mod lights;

pub use lights::{Light, LightState, LightStateUpdate, Lights};

/**
The entry point an application holds.

Finds bridges through a [`Discovery`] and, once a bridge is resolved, gives access
to its lights. One HTTP client is shared by discovery, descriptions and the bridge API.
 */
pub struct Hue {
    config: HueConfig,
    client: Client,
    probe: Probe,
    discovery: Discovery,
    bridge: OnceCell<Bridge>,
}

/// The bridge a [`Hue`] talks to once ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bridge {
    pub address: String,
    pub id: Option<String>,
}

impl Bridge {
    /// URL of `path` under `/api/<username>` on this bridge.
    pub fn api_url(&self, username: &str, path: &str) -> anyhow::Result<Url> {
        endpoint(&self.address, &format!("/api/{}{}", username, path))
            .with_context(|| format!("Invalid bridge address: {}", self.address))
    }
}

impl From<Candidate> for Bridge {
    fn from(candidate: Candidate) -> Self {
        Bridge {
            address: candidate.address,
            id: candidate.id,
        }
    }
}

impl Hue {
    pub fn new(config: HueConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(config, client))
    }

    /// Uses `client` for every HTTP request instead of building one.
    pub fn with_client(config: HueConfig, client: Client) -> Self {
        let probe = Probe::new();
        let strategies = StrategySet::standard(client.clone(), probe.clone(), &config);
        Self::with_strategies(config, client, probe, strategies)
    }

    pub fn with_strategies(
        config: HueConfig,
        client: Client,
        probe: Probe,
        strategies: StrategySet,
    ) -> Self {
        debug!("Creating new hue instance with settings: {:?}", config);
        let describer = HttpDescriptionSource::new(client.clone());
        Hue {
            discovery: Discovery::new(strategies, std::sync::Arc::new(describer)),
            config,
            client,
            probe,
            bridge: OnceCell::new(),
        }
    }

    /// Searches for bridges on the network.
    ///
    /// See [`Discovery::search`]. A search already in flight on this instance, including
    /// one started by [`Hue::ready`], is joined rather than repeated.
    pub async fn discover(&self, selector: impl Into<MethodSelector>) -> SearchResult {
        let candidates = self.discovery.search(selector).await?;
        debug!("Search completed with the following results: {:?}", candidates);
        Ok(candidates)
    }

    /// Like [`Hue::discover`], with the methods given by name.
    pub async fn discover_named(&self, names: &str) -> SearchResult {
        self.discovery.search_named(names).await
    }

    /// Fetches the `description.xml` of the bridge at `address`, decoded unless `parse`
    /// is false.
    pub async fn description(&self, address: &str, parse: bool) -> anyhow::Result<BridgeDescription> {
        let xml = fetch_description(&self.client, address).await?;
        if parse {
            Ok(BridgeDescription::Parsed(parse_description(&xml)?))
        } else {
            Ok(BridgeDescription::Raw(xml))
        }
    }

    /**
    Resolves the bridge this instance talks to.

    The configured address is used if there is one, otherwise the first candidate of a
    search using every method. Resolution happens once; concurrent callers wait for the
    same attempt, and a failed attempt is retried by the next caller.
     */
    pub async fn ready(&self) -> anyhow::Result<&Bridge> {
        self.bridge.get_or_try_init(|| self.resolve_bridge()).await
    }

    async fn resolve_bridge(&self) -> anyhow::Result<Bridge> {
        if let Some(address) = &self.config.bridge_address {
            debug!("Using configured bridge at {}", address);
            return Ok(Bridge {
                address: address.clone(),
                id: None,
            });
        }

        let bridge: Bridge = self
            .discover(MethodSelector::All)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Hue bridge was found"))?
            .into();
        info!("Using bridge at {} ({:?})", bridge.address, bridge.id);
        Ok(bridge)
    }

    /// The resolved bridge, if [`Hue::ready`] has succeeded.
    pub fn bridge(&self) -> Option<&Bridge> {
        self.bridge.get()
    }

    pub fn lights(&self) -> Lights<'_> {
        Lights::new(self)
    }

    pub fn config(&self) -> &HueConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// The probe used by the local search; its socket count is observable.
    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RGB {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl From<(u8, u8, u8)> for RGB {
    fn from((red, green, blue): (u8, u8, u8)) -> Self {
        RGB { red, green, blue }
    }
}

impl From<RGB> for (u8, u8, u8) {
    fn from(rgb: RGB) -> Self {
        (rgb.red, rgb.green, rgb.blue)
    }
}

/// Named colours accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliColors {
    Red,
    Green,
    Blue,
    Yellow,
    Orange,
    Purple,
    Cyan,
    Magenta,
    Pink,
    Teal,
    Lavender,
    Warm,
}

impl From<CliColors> for RGB {
    fn from(color: CliColors) -> Self {
        let rgb = match color {
            CliColors::Red => (255, 0, 0),
            CliColors::Green => (0, 255, 0),
            CliColors::Blue => (0, 0, 255),
            CliColors::Yellow => (255, 255, 0),
            CliColors::Orange => (255, 165, 0),
            CliColors::Purple => (128, 0, 128),
            CliColors::Cyan => (0, 255, 255),
            CliColors::Magenta => (255, 0, 255),
            CliColors::Pink => (255, 192, 203),
            CliColors::Teal => (0, 128, 128),
            CliColors::Lavender => (230, 230, 250),
            CliColors::Warm => (255, 180, 107),
        };
        rgb.into()
    }
}
