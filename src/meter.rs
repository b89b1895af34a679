use serde::de::Deserializer;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Tag written into every published sensor's attributes
pub const INTEGRATION: &str = "climkit";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MeterType {
    Electricity,
    Heating,
    ColdWater,
    HotWater,
    Other(String),
}

impl Default for MeterType {
    fn default() -> Self {
        MeterType::Other("other".to_string())
    }
}

impl From<String> for MeterType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "electricity" => MeterType::Electricity,
            "heating" => MeterType::Heating,
            "cold_water" => MeterType::ColdWater,
            "hot_water" => MeterType::HotWater,
            _ => MeterType::Other(raw),
        }
    }
}

impl From<MeterType> for String {
    fn from(meter_type: MeterType) -> Self {
        meter_type.as_str().to_string()
    }
}

impl MeterType {
    pub fn as_str(&self) -> &str {
        match self {
            MeterType::Electricity => "electricity",
            MeterType::Heating => "heating",
            MeterType::ColdWater => "cold_water",
            MeterType::HotWater => "hot_water",
            MeterType::Other(raw) => raw,
        }
    }

    /// Home Assistant device class for this kind of meter
    pub fn device_class(&self) -> Option<&'static str> {
        match self {
            MeterType::Electricity | MeterType::Heating => Some("energy"),
            MeterType::ColdWater | MeterType::HotWater => Some("water"),
            MeterType::Other(_) => None,
        }
    }

    /// Unit of measurement matching [`MeterType::device_class`]
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            MeterType::Electricity | MeterType::Heating => Some("kWh"),
            MeterType::ColdWater | MeterType::HotWater => Some("m³"),
            MeterType::Other(_) => None,
        }
    }
}

impl fmt::Display for MeterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An installation as listed by `/all_installations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(deserialize_with = "string_or_number")]
    pub site_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

fn default_mode() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meter {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub meter_type: MeterType,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub site_address: Option<String>,
    #[serde(default)]
    pub is_rule_meter: bool,
}

impl Meter {
    /// Address if known, else the meter's name, else its id
    pub fn label(&self) -> &str {
        self.site_address
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }

    /// Entity id of the form `sensor.<label>_<type>_<mode>_<id>`, every part slugged.
    /// Parts that slug to nothing are left out rather than leaving `__` behind.
    pub fn sensor_name(&self) -> String {
        let parts: Vec<String> = [
            self.label(),
            self.meter_type.as_str(),
            self.mode.as_str(),
            self.id.as_str(),
        ]
        .into_iter()
        .map(slugify)
        .filter(|part| !part.is_empty())
        .collect();

        if parts.is_empty() {
            return "sensor.meter".to_string();
        }
        format!("sensor.{}", parts.join("_"))
    }
}

/// Raw `/meter_data` payload. An empty payload stands for a failed fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterData {
    #[serde(default, deserialize_with = "number_or_numeric_string")]
    pub value: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MeterData {
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.extra.is_empty()
    }

    pub fn reading(&self) -> Reading {
        Reading {
            value: self.value.unwrap_or_default(),
            available: self.value.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    /// False when the fetch failed or returned no value, so a zero here is not a real zero
    pub available: bool,
}

/// One state update for the host platform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    #[serde(skip)]
    pub entity_id: String,
    pub state: String,
    pub attributes: Map<String, Value>,
}

impl SensorState {
    pub fn new(site_id: &str, meter: &Meter, reading: Reading) -> Self {
        let mut attributes = Map::new();
        attributes.insert("integration".into(), INTEGRATION.into());
        attributes.insert("mode".into(), meter.mode.clone().into());
        attributes.insert("type".into(), meter.meter_type.as_str().into());
        attributes.insert("meter_id".into(), meter.id.clone().into());
        attributes.insert("is_rule_meter".into(), meter.is_rule_meter.into());
        attributes.insert("site_id".into(), site_id.into());
        attributes.insert("state_class".into(), "total_increasing".into());
        attributes.insert("available".into(), reading.available.into());
        attributes.insert("friendly_name".into(), meter.label().into());
        if let Some(device_class) = meter.meter_type.device_class() {
            attributes.insert("device_class".into(), device_class.into());
        }
        if let Some(unit) = meter.meter_type.unit() {
            attributes.insert("unit_of_measurement".into(), unit.into());
        }

        Self {
            entity_id: meter.sensor_name(),
            state: reading.value.to_string(),
            attributes,
        }
    }
}

/// Folds to ASCII and lowercases, keeping `[a-z0-9]` and collapsing every other run into a single `_`
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if let Some(ascii) = fold_to_ascii(c) {
            slug.push_str(ascii);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// ASCII spelling of the lowercase Latin letters found in Swiss, French, German and Italian addresses
fn fold_to_ascii(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'ď' | 'đ' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'ĥ' | 'ħ' => "h",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'ĵ' => "j",
        'ķ' => "k",
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => "l",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => "o",
        'œ' => "oe",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'ś' | 'ŝ' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'ţ' | 'ť' | 'ŧ' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'ŵ' => "w",
        'ý' | 'ÿ' | 'ŷ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    let id: Id = serde::Deserialize::deserialize(deserializer)?;
    Ok(match id {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

/// Readings arrive as JSON numbers, or as strings holding one; anything else counts as absent
fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Other(Value),
    }

    let raw: Option<Raw> = serde::Deserialize::deserialize(deserializer)?;
    Ok(match raw {
        Some(Raw::Number(value)) => Some(value),
        Some(Raw::Text(text)) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Some(Raw::Other(_)) | None => None,
    })
}
