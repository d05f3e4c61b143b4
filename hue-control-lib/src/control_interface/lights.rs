use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use log::debug;
use palette::{FromColor, Hsv, Srgb};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::control_interface::{Hue, RGB};
use crate::util::traits::check_api_errors;

/// Largest `bri` and `sat` value the bridge accepts.
const MAX_LEVEL: f32 = 254.0;
/// `hue` wraps around at this value.
const HUE_RANGE: f32 = 65535.0;

/// A light as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub name: String,
    #[serde(rename = "type", default)]
    pub light_type: String,
    #[serde(default)]
    pub modelid: String,
    #[serde(default)]
    pub uniqueid: Option<String>,
    pub state: LightState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    #[serde(default)]
    pub bri: Option<u8>,
    #[serde(default)]
    pub hue: Option<u16>,
    #[serde(default)]
    pub sat: Option<u8>,
    #[serde(default)]
    pub reachable: Option<bool>,
}

/**
A change to a light's state. Only the fields that are set are sent.

```
use hue_control_lib::control_interface::{LightStateUpdate, RGB};

let update = LightStateUpdate::default()
    .with_on(true)
    .with_rgb(RGB { red: 255, green: 0, blue: 0 });
assert_eq!(update.hue, Some(0));
assert_eq!(update.sat, Some(254));
```
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightStateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    /// In steps of 100 ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transitiontime: Option<u16>,
}

impl LightStateUpdate {
    pub fn with_on(mut self, on: bool) -> Self {
        self.on = Some(on);
        self
    }

    /// Brightness in percent, 0..100.
    pub fn with_brightness(mut self, percent: u8) -> Self {
        self.bri = Some(scale(f32::from(percent.min(100)) / 100.0));
        self
    }

    pub fn with_transition_time(mut self, steps: u16) -> Self {
        self.transitiontime = Some(steps);
        self
    }

    /// Sets hue, saturation and brightness to match `rgb`.
    pub fn with_rgb(mut self, rgb: RGB) -> Self {
        let color: Srgb<f32> = Srgb::new(rgb.red, rgb.green, rgb.blue).into_format();
        let hsv: Hsv = Hsv::from_color(color);
        let degrees = hsv.hue.into_positive_degrees();
        self.hue = Some((degrees / 360.0 * HUE_RANGE).round() as u16);
        self.sat = Some(scale(hsv.saturation));
        self.bri = Some(scale(hsv.value));
        self
    }

    pub fn from_rgb(rgb: RGB) -> Self {
        Self::default().with_rgb(rgb)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn scale(fraction: f32) -> u8 {
    (fraction.clamp(0.0, 1.0) * MAX_LEVEL).round() as u8
}

/// The lights of the bridge a [`Hue`] resolves. Every call waits for [`Hue::ready`].
pub struct Lights<'a> {
    hue: &'a Hue,
}

impl<'a> Lights<'a> {
    pub(crate) fn new(hue: &'a Hue) -> Self {
        Lights { hue }
    }

    /// Every light on the bridge, by id.
    pub async fn list(&self) -> anyhow::Result<BTreeMap<String, Light>> {
        let body = self.request(Method::GET, "/lights", None).await?;
        serde_json::from_value(body).context("Failed to decode lights")
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Light> {
        let body = self
            .request(Method::GET, &format!("/lights/{}", id), None)
            .await?;
        serde_json::from_value(body).with_context(|| format!("Failed to decode light {}", id))
    }

    /// Applies `update` and returns the attribute paths the bridge confirmed.
    pub async fn set_state(&self, id: &str, update: &LightStateUpdate) -> anyhow::Result<Vec<String>> {
        if update.is_empty() {
            return Err(anyhow!("No state changes given for light {}", id));
        }
        let body = serde_json::to_value(update)?;
        let response = self
            .request(Method::PUT, &format!("/lights/{}/state", id), Some(body))
            .await?;
        Ok(confirmed_paths(&response))
    }

    pub async fn rename(&self, id: &str, name: &str) -> anyhow::Result<()> {
        self.request(
            Method::PUT,
            &format!("/lights/{}", id),
            Some(json!({ "name": name })),
        )
        .await?;
        Ok(())
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> anyhow::Result<Value> {
        let username = self
            .hue
            .config()
            .username
            .as_deref()
            .ok_or_else(|| anyhow!("A bridge username is required to use the lights API"))?;
        let bridge = self.hue.ready().await?;
        let url = bridge.api_url(username, path)?;
        debug!("{} {}", method, url);

        let mut request = self.hue.client().request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to call {}", path))?;

        if response.status() != StatusCode::OK {
            return Err(anyhow!(
                "Failed to call {} with status: {}",
                path,
                response.status()
            ));
        }
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to decode response of {}", path))?;
        check_api_errors(&body)?;
        Ok(body)
    }
}

/// The keys of every `success` entry in a bridge response.
fn confirmed_paths(response: &Value) -> Vec<String> {
    response
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("success")?.as_object())
        .flat_map(|success| success.keys().cloned())
        .collect()
}
