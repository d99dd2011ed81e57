use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use std::collections::HashMap;
use std::error::Error;

/// Contains the configuration for communicating with the MQTT broker
#[serde_inline_default]
#[derive(Deserialize)]
pub struct Mqtt {
    /// Hostname or IP address. Default: localhost
    #[serde_inline_default(String::from("localhost"))]
    pub host: String,

    /// Port of the connection to the broker. Default: 1883
    #[serde_inline_default(1883)]
    pub port: u16,

    /// Username for the connection to the broker. Default: empty
    #[serde(default)]
    pub user: String,

    /// Password for the connection to the broker. Default: empty
    #[serde(default)]
    pub password: String,

    /// Zone the publisher belongs to. This is the first segment of every topic. Default: local
    #[serde_inline_default(String::from("local"))]
    pub zone: String,

    /// Client identifier of the MQTT connection. Default: `openweathermap-<hostname>`
    #[serde(default = "client_id", rename = "client-id")]
    pub client_id: String,
}

/// Contains the configuration of the weather publisher
#[serde_inline_default]
#[derive(Deserialize)]
pub struct Weather {
    /// Cities to publish, as understood by OpenWeatherMap. For example `Amsterdam,NL`
    #[serde(default)]
    pub cities: Vec<String>,

    /// OpenWeatherMap API key
    pub apikey: String,

    /// Publisher identifier, second segment of every topic. Default: openweathermap
    #[serde_inline_default(String::from(crate::weather::PUBLISHER_ID))]
    pub publisher: String,

    /// Reporting language for some cities. Cities that are not listed report in `en`
    ///
    /// See <https://openweathermap.org/current#multi> for the supported languages
    #[serde(default)]
    pub languages: HashMap<String, String>,

    /// Delay between each current weather report in seconds. Default: 900 seconds
    #[serde_inline_default(900)]
    #[serde(rename = "update-period")]
    pub update_period: u64,

    /// Publish the daily forecast. This needs a paid OpenWeatherMap account. Default: false
    #[serde(default)]
    pub forecast: bool,

    /// Delay between each forecast report in seconds. Default: 6 hours
    #[serde_inline_default(6 * 3600)]
    #[serde(rename = "forecast-period")]
    pub forecast_period: u64,

    /// Base URL of the OpenWeatherMap API. Default: <https://api.openweathermap.org/data/2.5>
    #[serde_inline_default(String::from(crate::openweathermap::DEFAULT_BASE_URL))]
    #[serde(rename = "base-url")]
    pub base_url: String,
}

/// Contains all the configuration for `openweathermap-publisher`
#[serde_inline_default]
#[derive(Deserialize)]
pub struct Configuration {
    /// Contains the configuration for communicating with the MQTT broker
    pub mqtt: Mqtt,

    /// Contains the configuration of the weather publisher
    pub weather: Weather,

    /// Sets the verbosity of the logs.
    ///   * 1 => Error
    ///  * 2 => Warning
    ///  * 3 => Info
    ///  * 4 => Debug
    ///  * 5 => Trace
    #[serde_inline_default(2)]
    #[serde(rename = "log-verbosity")]
    pub log_verbosity: usize,
}

fn client_id() -> String {
    let host = sysinfo::System::host_name().unwrap_or_else(|| String::from("localhost"));
    format!("{}-{host}", crate::weather::PUBLISHER_ID)
}

impl Configuration {
    /// Load the configuration from a file
    ///
    /// ## Example
    ///
    /// ```
    /// use openweathermap_publisher::Configuration;
    ///
    /// let config = Configuration::load("conf/openweathermap-publisher.conf").expect("Cannot load configuration");
    ///
    /// assert_eq!(config.mqtt.host, "localhost");
    /// ```
    pub fn load(path: &str) -> Result<Configuration, Box<dyn Error>> {
        Self::parse(std::fs::read_to_string(path)?.as_str())
    }

    /// Parse the configuration from a TOML string
    pub fn parse(content: &str) -> Result<Configuration, Box<dyn Error>> {
        toml::from_str(content).map_err(|err| err.into())
    }
}
