use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};

use hue_control_lib::config::HueConfig;
use hue_control_lib::control_interface::{CliColors, Hue, LightStateUpdate, RGB};
use hue_control_lib::util::description::BridgeDescription;
use hue_control_lib::util::discovery::Discovery;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "hue_control",
    about = "Finds Hue bridges and controls their lights",
    version = "0.1.0"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Searches the network for bridges
    #[clap(name = "discover")]
    Discover {
        /// Search methods to race, comma separated (upnp, nupnp, ip). All of them by default
        #[clap(short, long)]
        method: Option<String>,

        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// How long the local probe listens for replies, in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 5000)]
        timeout: u64,
    },
    /// Prints the description.xml of a bridge
    #[clap(name = "description")]
    Description {
        /// Address of the bridge
        #[clap(long)]
        ip: String,

        /// Print the XML as served instead of decoding it
        #[clap(long)]
        raw: bool,

        /// Output format for the decoded description (json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Json)]
        output: OutputFormat,
    },
    /// Subcommand for operations on the lights of a bridge
    #[clap(name = "lights")]
    Lights {
        /// Address of the bridge. Discovered if not given
        #[clap(long)]
        ip: Option<String>,

        /// A user already registered on the bridge
        #[clap(short, long)]
        username: String,

        #[clap(subcommand)]
        action: LightAction,
    },
}

/// Actions available under the `lights` subcommand
#[derive(Subcommand)]
pub enum LightAction {
    /// Lists every light.
    #[clap(name = "list")]
    List,
    /// Prints one light.
    #[clap(name = "get")]
    Get { id: String },
    /// Changes the state of a light.
    #[clap(name = "set")]
    Set {
        id: String,

        #[clap(long, conflicts_with = "off")]
        on: bool,

        #[clap(long)]
        off: bool,

        /// Brightness in percent (0-100)
        #[clap(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        brightness: Option<u8>,

        /// The color to display by name
        #[clap(value_enum)]
        color: Option<CliColors>,

        /// Red component of the color (0-255)
        #[clap(short = 'r', long = "red", value_parser = clap::value_parser!(u8))]
        red: Option<u8>,

        /// Green component of the color (0-255)
        #[clap(short = 'g', long = "green", value_parser = clap::value_parser!(u8))]
        green: Option<u8>,

        /// Blue component of the color (0-255)
        #[clap(short = 'b', long = "blue", value_parser = clap::value_parser!(u8))]
        blue: Option<u8>,

        /// Transition time in milliseconds
        #[clap(long, value_parser = parse_duration)]
        transition: Option<Duration>,
    },
    /// Renames a light.
    #[clap(name = "rename")]
    Rename { id: String, name: String },
}

fn parse_duration(s: &str) -> Result<Duration, &'static str> {
    let millis = s
        .parse::<u64>()
        .map_err(|_| "could not parse duration in milliseconds")?;
    Ok(Duration::from_millis(millis))
}

fn print_formatted<T: serde::Serialize>(value: &T, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Json | OutputFormat::Plaintext => {
            println!("{}", serde_json::to_string_pretty(value)?)
        }
    }
    Ok(())
}

fn state_update(
    on: bool,
    off: bool,
    brightness: Option<u8>,
    color: Option<CliColors>,
    rgb: (Option<u8>, Option<u8>, Option<u8>),
    transition: Option<Duration>,
) -> Result<LightStateUpdate> {
    let mut update = LightStateUpdate::default();
    if on || off {
        update = update.with_on(on);
    }
    let color_to_show: Option<RGB> = match (color, rgb) {
        (None, (None, None, None)) => None,
        (Some(color_name), (None, None, None)) => Some(color_name.into()),
        (None, (Some(r), Some(g), Some(b))) => Some((r, g, b).into()),
        _ => return Err(anyhow!("Invalid color specification")),
    };
    if let Some(rgb) = color_to_show {
        update = update.with_rgb(rgb);
    }
    if let Some(percent) = brightness {
        update = update.with_brightness(percent);
    }
    if let Some(transition) = transition {
        let steps = (transition.as_millis() / 100).min(u128::from(u16::MAX)) as u16;
        update = update.with_transition_time(steps);
    }
    Ok(update)
}

async fn handle_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Discover {
            method,
            output,
            timeout,
        } => {
            let config = HueConfig::default().with_probe_window(Duration::from_millis(timeout));
            let hue = Hue::new(config)?;
            let bridges = hue.discover_named(method.as_deref().unwrap_or("")).await?;
            match output {
                OutputFormat::Plaintext => {
                    Discovery::pretty_print_candidates(&bridges);
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string(&bridges)?;
                    println!("{}", json);
                }
                OutputFormat::Yaml => {
                    let yaml = serde_yaml::to_string(&bridges)?;
                    println!("{}", yaml);
                }
            }
        }
        Commands::Description { ip, raw, output } => {
            let hue = Hue::new(HueConfig::default())?;
            match hue.description(&ip, !raw).await? {
                BridgeDescription::Raw(xml) => println!("{}", xml),
                parsed => print_formatted(&parsed, output)?,
            }
        }
        Commands::Lights {
            ip,
            username,
            action,
        } => {
            let mut config = HueConfig::default().with_username(username);
            if let Some(ip) = ip {
                config = config.with_bridge_address(ip);
            }
            let hue = Hue::new(config)?;
            let lights = hue.lights();

            match action {
                LightAction::List => {
                    for (id, light) in lights.list().await? {
                        println!(
                            "{:>3}  {:<32} {}",
                            id,
                            light.name,
                            if light.state.on { "on" } else { "off" }
                        );
                    }
                }
                LightAction::Get { id } => {
                    let light = lights.get(&id).await?;
                    println!("Light {}:\n{:#?}", id, light);
                }
                LightAction::Set {
                    id,
                    on,
                    off,
                    brightness,
                    color,
                    red,
                    green,
                    blue,
                    transition,
                } => {
                    let update =
                        state_update(on, off, brightness, color, (red, green, blue), transition)?;
                    let confirmed = lights.set_state(&id, &update).await?;
                    for path in confirmed {
                        println!("Updated {}", path);
                    }
                }
                LightAction::Rename { id, name } => {
                    lights.rename(&id, &name).await?;
                    println!("Light {} renamed to {}", id, name);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_discover() {
        let cli = Cli::parse_from(["hue_control", "discover", "--method", "upnp,nupnp", "-o", "json"]);
        match cli.command {
            Commands::Discover { method, output, timeout } => {
                assert_eq!(method.as_deref(), Some("upnp,nupnp"));
                assert!(output == OutputFormat::Json);
                assert_eq!(timeout, 5000);
            }
            _ => panic!("expected discover"),
        }
    }

    #[test]
    fn test_state_update_from_flags() {
        let update = state_update(
            true,
            false,
            Some(100),
            Some(CliColors::Red),
            (None, None, None),
            Some(Duration::from_millis(400)),
        )
        .unwrap();
        assert_eq!(update.on, Some(true));
        assert_eq!(update.hue, Some(0));
        assert_eq!(update.bri, Some(254));
        assert_eq!(update.transitiontime, Some(4));

        assert!(state_update(false, false, None, Some(CliColors::Red), (Some(1), None, None), None).is_err());
        assert!(state_update(false, false, None, None, (None, None, None), None)
            .unwrap()
            .is_empty());
    }
}
