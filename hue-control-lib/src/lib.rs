//! # Hue Control Library
//!
//! `hue-control-lib` finds Philips Hue bridges on the local network and talks to the
//! lights behind them.
//!
//! Discovery races several search methods at once: an SSDP probe on the local network,
//! a lookup in the cloud directory, and a reserved address scan. The first method to
//! find a bridge wins, the others are cancelled, and every address found is enriched
//! with the bridge's serial number from its `description.xml`.
//!
//! ## Example
//!
//! ```no_run
//! use hue_control_lib::config::HueConfig;
//! use hue_control_lib::control_interface::Hue;
//! use hue_control_lib::util::strategy::MethodSelector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let hue = Hue::new(HueConfig::default())?;
//!
//!     for bridge in hue.discover(MethodSelector::All).await? {
//!         println!("Found bridge: {:?}", bridge);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Disclaimer
//!
//! This project is not affiliated with, authorized by, endorsed by, or in any way officially connected
//! with Signify or Philips Hue.

// Settings for a `Hue` instance: bridge address, username, discovery endpoints and timeouts.
pub mod config;

// The `control_interface` module holds the `Hue` facade an application keeps around,
// the resolved `Bridge`, and the lights API.
//
// Example usage:
//
// ```
// use hue_control_lib::config::HueConfig;
// use hue_control_lib::control_interface::{Hue, LightStateUpdate};
//
// #[tokio::main]
// async fn main() {
//     let config = HueConfig::default().with_username("newdeveloper");
//     let hue = Hue::new(config).unwrap();
//     let update = LightStateUpdate::default().with_on(true);
//     hue.lights().set_state("1", &update).await.unwrap();
// }
// ```
pub mod control_interface;

// The `util` module provides the discovery machinery: the UDP probe, the search
// strategies, the orchestrator racing them, and description decoding.
//
// Example usage:
//
// ```
// use hue_control_lib::control_interface::Hue;
// use hue_control_lib::util::strategy::SearchMethod;
//
// #[tokio::main]
// async fn main() {
//     let hue = Hue::new(Default::default()).unwrap();
//     let bridges = hue.discover(SearchMethod::DirectoryLookup).await.unwrap();
// }
// ```
pub mod util;

#[cfg(test)]
pub(crate) mod test_fixtures;
