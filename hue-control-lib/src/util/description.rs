use std::collections::HashSet;

use anyhow::{anyhow, Context};
use futures::future::{BoxFuture, FutureExt};
use log::debug;
use reqwest::{Client, StatusCode};
use roxmltree::{Document, Node};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::util::endpoint::endpoint;

/// Where a bridge publishes its UPnP device description.
pub const DESCRIPTION_PATH: &str = "/description.xml";

/// Key holding an element's attributes in the decoded form.
const ATTRIBUTES_KEY: &str = "$";
/// Key holding an element's text when it also has attributes or children.
const TEXT_KEY: &str = "_";

/// A bridge's `description.xml`, either decoded or as served.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BridgeDescription {
    Parsed(Value),
    Raw(String),
}

impl BridgeDescription {
    /// The bridge serial number, if this is a decoded description that carries one.
    pub fn serial_number(&self) -> Option<String> {
        match self {
            BridgeDescription::Parsed(value) => serial_number(value),
            BridgeDescription::Raw(_) => None,
        }
    }
}

/// Fetches bridge descriptions for the discovery enrichment pass.
pub trait DescriptionSource: Send + Sync {
    fn describe<'a>(&'a self, address: &'a str) -> BoxFuture<'a, anyhow::Result<Value>>;
}

/// Fetches descriptions over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDescriptionSource {
    client: Client,
}

impl HttpDescriptionSource {
    pub fn new(client: Client) -> Self {
        HttpDescriptionSource { client }
    }
}

impl DescriptionSource for HttpDescriptionSource {
    fn describe<'a>(&'a self, address: &'a str) -> BoxFuture<'a, anyhow::Result<Value>> {
        async move {
            let xml = fetch_description(&self.client, address).await?;
            parse_description(&xml)
        }
        .boxed()
    }
}

/// GETs `description.xml` from the bridge at `address`.
pub async fn fetch_description(client: &Client, address: &str) -> anyhow::Result<String> {
    let url = endpoint(address, DESCRIPTION_PATH)
        .with_context(|| format!("Invalid bridge address: {}", address))?;
    debug!("Fetching description data from {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to fetch bridge description")?;

    if response.status() != StatusCode::OK {
        return Err(anyhow!(
            "Failed to fetch bridge description with status: {}",
            response.status()
        ));
    }
    response
        .text()
        .await
        .context("Failed to read bridge description")
}

/**
Decodes a description document into JSON.

Text is trimmed. An element with only text becomes a string; otherwise it becomes an
object with its attributes under `"$"`, its text under `"_"`, and one key per child
tag. A tag that occurs once maps to a single value, a repeated tag to an array. The
root element itself is not wrapped, so `device.serialNumber` is at the top level.
Namespace declarations of the root element are kept as `xmlns` attributes.
 */
pub fn parse_description(xml: &str) -> anyhow::Result<Value> {
    let document = Document::parse(xml).context("Failed to parse bridge description")?;
    let root = document.root_element();
    Ok(element_to_value(root, namespace_declarations(root)))
}

fn namespace_declarations(node: Node) -> Map<String, Value> {
    node.namespaces()
        .filter(|namespace| namespace.name() != Some("xml"))
        .map(|namespace| {
            let key = match namespace.name() {
                Some(prefix) => format!("xmlns:{}", prefix),
                None => "xmlns".to_string(),
            };
            (key, Value::String(namespace.uri().to_string()))
        })
        .collect()
}

fn element_to_value(node: Node, declarations: Map<String, Value>) -> Value {
    let text: String = node
        .children()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect();
    let text = text.trim();

    let has_children = node.children().any(|child| child.is_element());
    let has_attributes = !declarations.is_empty() || node.attributes().next().is_some();
    if !has_children && !has_attributes {
        return Value::String(text.to_string());
    }

    let mut object = Map::new();
    if has_attributes {
        let mut attributes = declarations;
        attributes.extend(node.attributes().map(|attribute| {
            (
                attribute.name().to_string(),
                Value::String(attribute.value().to_string()),
            )
        }));
        object.insert(ATTRIBUTES_KEY.to_string(), Value::Object(attributes));
    }
    if !text.is_empty() {
        object.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
    }

    let mut repeated = HashSet::new();
    for child in node.children().filter(|child| child.is_element()) {
        let key = child.tag_name().name().to_string();
        let value = element_to_value(child, Map::new());
        match object.get_mut(&key) {
            None => {
                object.insert(key, value);
            }
            Some(Value::Array(values)) if repeated.contains(&key) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
                repeated.insert(key);
            }
        }
    }
    Value::Object(object)
}

/// `device.serialNumber` of a decoded description.
pub fn serial_number(description: &Value) -> Option<String> {
    match description.get("device")?.get("serialNumber")? {
        Value::String(serial) if !serial.is_empty() => Some(serial.clone()),
        Value::Number(serial) => Some(serial.to_string()),
        _ => None,
    }
}
