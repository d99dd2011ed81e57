use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::EnumIter;

/// Instance of readings of the current weather
pub const CURRENT_INSTANCE: &str = "current";

/// Instance of readings accumulated over the last hour (rain, snow)
pub const LAST_HOUR_INSTANCE: &str = "hour";

/// Instance of the upcoming forecast
pub const FORECAST_INSTANCE: &str = "forecast";

/// Instance of the forecast maximum
pub const MAX_INSTANCE: &str = "max";

/// Instance of the forecast minimum
pub const MIN_INSTANCE: &str = "min";

/// Configuration values of a node, keyed by attribute name
pub type AttrMap = BTreeMap<String, String>;

/// Contains the different types of outputs that can be published
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter)]
pub enum OutputType {
    /// Short description of the weather
    Weather,

    /// Temperature in °C
    Temperature,

    /// Relative humidity in %
    Humidity,

    /// Atmospheric pressure in hPa
    AtmosphericPressure,

    /// Wind direction in degrees
    WindHeading,

    /// Wind speed in m/s
    WindSpeed,

    /// Rain volume, in thousandths of the reported mm
    Rain,

    /// Snow volume, in thousandths of the reported mm
    Snow,
}

impl OutputType {
    /// Name of the output type as used in the topics
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Weather => "weather",
            OutputType::Temperature => "temperature",
            OutputType::Humidity => "humidity",
            OutputType::AtmosphericPressure => "atmosphericpressure",
            OutputType::WindHeading => "windheading",
            OutputType::WindSpeed => "windspeed",
            OutputType::Rain => "rain",
            OutputType::Snow => "snow",
        }
    }

    /// Unit of the published values, if any
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            OutputType::Weather => None,
            OutputType::Temperature => Some("C"),
            OutputType::Humidity => Some("%"),
            OutputType::AtmosphericPressure => Some("hPa"),
            OutputType::WindHeading => Some("degrees"),
            OutputType::WindSpeed => Some("m/s"),
            OutputType::Rain | OutputType::Snow => None,
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data type of a configuration attribute
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// One of a set of values, such as a language code
    Enum,
}

/// Describes a configuration attribute of a node
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConfigAttr {
    /// Type of the value
    pub datatype: DataType,

    /// Human readable description
    pub description: String,

    /// Value used when nothing was configured
    pub default: String,

    /// Configured value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ConfigAttr {
    /// Creates an attribute that has not been configured yet
    ///
    /// ## Example
    ///
    /// ```
    /// use openweathermap_publisher::discovery::{ConfigAttr, DataType};
    ///
    /// let attr = ConfigAttr::new(DataType::Enum, "Reporting language", "en");
    /// assert_eq!(attr.value(), "en");
    /// ```
    pub fn new(datatype: DataType, description: &str, default: &str) -> ConfigAttr {
        ConfigAttr {
            datatype,
            description: description.to_string(),
            default: default.to_string(),
            value: None,
        }
    }

    /// Effective value: the configured value, or the default
    pub fn value(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.default)
    }
}

/// Run state of a node
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Ready,
    Error,
    Disconnected,
}

/// Node discovery message
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Node {
    /// Identifier of the node. For a city node this is the city name
    pub id: String,

    /// Address of the node: `zone/publisher/node`
    pub address: String,

    /// Configuration attributes
    pub config: BTreeMap<String, ConfigAttr>,

    #[serde(rename = "runstate")]
    pub run_state: RunState,

    /// Last error reported for this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Node {
    /// Creates a node in the ready state without configuration
    pub fn new(zone: &str, publisher_id: &str, id: &str) -> Node {
        Node {
            id: id.to_string(),
            address: format!("{zone}/{publisher_id}/{id}"),
            config: Default::default(),
            run_state: RunState::Ready,
            error: None,
        }
    }

    /// Effective value of a configuration attribute
    pub fn config_value(&self, name: &str) -> Option<&str> {
        self.config.get(name).map(ConfigAttr::value)
    }
}

impl fmt::Display for Node {
    /// Formats the node in JSON format
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Ok(node) = serde_json::to_string(&self) else {
            return Err(fmt::Error);
        };
        write!(f, "{node}")
    }
}

/// Output discovery message
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutputDescriptor {
    /// Address of the output: `zone/publisher/node/type/instance`
    pub address: String,

    #[serde(rename = "type")]
    pub output_type: &'static str,

    pub instance: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
}

impl OutputDescriptor {
    pub fn new(node: &Node, output_type: OutputType, instance: &str) -> OutputDescriptor {
        OutputDescriptor {
            address: format!("{}/{output_type}/{instance}", node.address),
            output_type: output_type.as_str(),
            instance: instance.to_string(),
            unit: output_type.unit(),
        }
    }
}

impl fmt::Display for OutputDescriptor {
    /// Formats the descriptor in JSON format
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Ok(descriptor) = serde_json::to_string(&self) else {
            return Err(fmt::Error);
        };
        write!(f, "{descriptor}")
    }
}
