//! # openweathermap-publisher
//!
//! `openweathermap-publisher` publishes the weather of a list of cities to MQTT
//!
//! Each city is a node with a fixed set of outputs (temperature, humidity, wind, ...)
//! that are refreshed from the OpenWeatherMap API.

pub use self::configuration::Configuration;
pub use self::configuration::Mqtt;
pub use self::configuration::Weather;
pub use self::daemon::Daemon;
pub use self::discovery::OutputType;
pub use self::openweathermap::{OpenWeatherMap, WeatherClient};
pub use self::publisher::Publisher;
pub use self::weather::WeatherApp;

/// Contains the configuration stuff
pub mod configuration;
/// Contains the daemon code
pub mod daemon;
/// Contains the node and output descriptions sent to MQTT
pub mod discovery;
/// Contains the OpenWeatherMap API client
pub mod openweathermap;
/// Contains the registry of published nodes and outputs
pub mod publisher;
/// Contains the values that are sent to MQTT
pub mod status;
/// Contains the mapping of the weather to the outputs
pub mod weather;
