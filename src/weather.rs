use crate::configuration::Weather;
use crate::discovery::{
    AttrMap, CURRENT_INSTANCE, ConfigAttr, DataType, FORECAST_INSTANCE, LAST_HOUR_INSTANCE,
    MAX_INSTANCE, MIN_INSTANCE, Node, OutputType,
};
use crate::openweathermap::{ApiError, CurrentWeather, WeatherClient, WeatherDescription};
use crate::publisher::{ConfigHandler, PUBLISHER_NODE_ID, Publisher};
use crate::status::{HistoryList, HistoryValue};
use log::{debug, info};
use std::collections::HashMap;

/// Default publisher identifier
pub const PUBLISHER_ID: &str = "openweathermap";

/// Name of the node configuration that holds the reporting language
pub const LANGUAGE_CONFIG: &str = "language";

/// Reporting language of a node that wasn't configured
pub const DEFAULT_LANGUAGE: &str = "en";

const LANGUAGE_DESCRIPTION: &str =
    "Reporting language. See https://openweathermap.org/current#multi for more options";

/// Outputs created for every city
pub const CITY_OUTPUTS: [(OutputType, &str); 11] = [
    (OutputType::Weather, CURRENT_INSTANCE),
    (OutputType::Temperature, CURRENT_INSTANCE),
    (OutputType::Humidity, CURRENT_INSTANCE),
    (OutputType::AtmosphericPressure, CURRENT_INSTANCE),
    (OutputType::WindHeading, CURRENT_INSTANCE),
    (OutputType::WindSpeed, CURRENT_INSTANCE),
    (OutputType::Rain, LAST_HOUR_INSTANCE),
    (OutputType::Snow, LAST_HOUR_INSTANCE),
    (OutputType::Weather, FORECAST_INSTANCE),
    (OutputType::Temperature, MAX_INSTANCE),
    (OutputType::Temperature, MIN_INSTANCE),
];

/// Error status set on a node when its current weather can't be fetched
pub const CURRENT_UNAVAILABLE: &str = "Current weather not available";

/// Error status set on a node when its forecast can't be fetched
pub const FORECAST_UNAVAILABLE: &str = "Error getting the daily forecast";

/// Error status set on a node when its forecast is empty
pub const FORECAST_EMPTY: &str = "Daily forecast not provided";

/// Failure that aborted an update cycle
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("cannot fetch weather for {city}: {source}")]
    Fetch {
        city: String,
        #[source]
        source: ApiError,
    },

    #[error("no daily forecast for {city}")]
    EmptyForecast { city: String },
}

/// Publishes the weather of the configured cities
pub struct WeatherApp<C> {
    cities: Vec<String>,
    api_key: String,
    languages: HashMap<String, String>,
    client: C,
}

/// First weather description, empty if there is none
fn description(weather: &[WeatherDescription]) -> &str {
    weather.first().map_or("", |w| w.description.as_str())
}

/// Precipitation as published: the reported volume × 1000, one decimal
pub fn format_precipitation(last_hour: f64) -> String {
    format!("{:.1}", last_hour * 1000.0)
}

/// Values of the current weather outputs, in the order they are published
pub fn current_values(weather: &CurrentWeather) -> [(OutputType, &'static str, String); 8] {
    [
        (
            OutputType::Weather,
            CURRENT_INSTANCE,
            description(&weather.weather).to_string(),
        ),
        (
            OutputType::Temperature,
            CURRENT_INSTANCE,
            format!("{:.1}", weather.main.temperature),
        ),
        (
            OutputType::Humidity,
            CURRENT_INSTANCE,
            weather.main.humidity.to_string(),
        ),
        (
            OutputType::AtmosphericPressure,
            CURRENT_INSTANCE,
            format!("{:.0}", weather.main.pressure),
        ),
        (
            OutputType::WindSpeed,
            CURRENT_INSTANCE,
            format!("{:.1}", weather.wind.speed),
        ),
        (
            OutputType::WindHeading,
            CURRENT_INSTANCE,
            format!("{:.0}", weather.wind.heading),
        ),
        (
            OutputType::Rain,
            LAST_HOUR_INSTANCE,
            format_precipitation(weather.rain.last_hour),
        ),
        (
            OutputType::Snow,
            LAST_HOUR_INSTANCE,
            format_precipitation(weather.snow.last_hour),
        ),
    ]
}

impl<C: WeatherClient> WeatherApp<C> {
    /// Creates the application from its configuration and a weather client
    pub fn new(config: &Weather, client: C) -> WeatherApp<C> {
        WeatherApp {
            cities: config.cities.clone(),
            api_key: config.apikey.clone(),
            languages: config.languages.clone(),
            client,
        }
    }

    /// Returns the weather client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Creates a node for each city, with its language configuration and outputs
    ///
    /// Calling this again with the same cities doesn't change anything.
    pub fn publish_nodes(&self, publisher: &mut Publisher) {
        for city in &self.cities {
            publisher.update_node(city);

            let language = self
                .languages
                .get(city)
                .map_or(DEFAULT_LANGUAGE, String::as_str);
            publisher.update_node_config(
                city,
                LANGUAGE_CONFIG,
                ConfigAttr::new(DataType::Enum, LANGUAGE_DESCRIPTION, language),
            );

            for (output_type, instance) in CITY_OUTPUTS {
                publisher.new_output(city, output_type, instance);
            }
        }
    }

    /// Nodes that are published for cities, with their reporting language
    fn city_nodes(publisher: &Publisher) -> Vec<(String, String)> {
        publisher
            .nodes()
            .filter(|node| node.id != PUBLISHER_NODE_ID)
            .map(|node| {
                let language = node
                    .config_value(LANGUAGE_CONFIG)
                    .unwrap_or(DEFAULT_LANGUAGE);
                (node.id.clone(), language.to_string())
            })
            .collect()
    }

    /// Fetches the current weather of each city and updates the outputs
    ///
    /// The first city that fails gets an error status and stops the cycle: the
    /// remaining cities are not updated.
    pub async fn update_weather(&self, publisher: &mut Publisher) -> Result<(), UpdateError> {
        info!("Updating the current weather");

        for (city, language) in Self::city_nodes(publisher) {
            let weather = match self
                .client
                .fetch_current(&self.api_key, &city, &language)
                .await
            {
                Ok(weather) => weather,
                Err(source) => {
                    publisher.set_error_status(&city, CURRENT_UNAVAILABLE);
                    return Err(UpdateError::Fetch { city, source });
                }
            };

            debug!("Current weather of {city}: {weather:?}");
            publisher.set_ready_status(&city);
            for (output_type, instance, value) in current_values(&weather) {
                publisher.update_output_value(&city, output_type, instance, &value);
            }
        }

        Ok(())
    }

    /// Fetches the daily forecast of each city and publishes it
    ///
    /// Like [`WeatherApp::update_weather`], the first failing city stops the cycle.
    pub async fn update_forecast(&self, publisher: &mut Publisher) -> Result<(), UpdateError> {
        info!("Updating the daily forecast");

        for (city, language) in Self::city_nodes(publisher) {
            let forecast = match self
                .client
                .fetch_daily_forecast(&self.api_key, &city, &language)
                .await
            {
                Ok(forecast) => forecast,
                Err(source) => {
                    publisher.set_error_status(&city, FORECAST_UNAVAILABLE);
                    return Err(UpdateError::Fetch { city, source });
                }
            };
            if forecast.list.is_empty() {
                publisher.set_error_status(&city, FORECAST_EMPTY);
                return Err(UpdateError::EmptyForecast { city });
            }

            let mut weather_list = HistoryList::new();
            let mut max_temp_list = HistoryList::new();
            let mut min_temp_list = HistoryList::new();

            for day in &forecast.list {
                weather_list.push(HistoryValue::at_unix(day.date, description(&day.weather)));
                max_temp_list.push(HistoryValue::at_unix(
                    day.date,
                    &format!("{:.1}", day.temp.max),
                ));
                min_temp_list.push(HistoryValue::at_unix(
                    day.date,
                    &format!("{:.1}", day.temp.min),
                ));
            }

            publisher.update_forecast(&city, OutputType::Weather, FORECAST_INSTANCE, weather_list);
            publisher.update_forecast(&city, OutputType::Temperature, MAX_INSTANCE, max_temp_list);
            publisher.update_forecast(&city, OutputType::Temperature, MIN_INSTANCE, min_temp_list);
        }

        Ok(())
    }
}

impl<C> ConfigHandler for WeatherApp<C> {
    /// Configuration changes are acknowledged but not applied
    fn on_node_config(&mut self, node: &Node, config: &AttrMap) -> Option<AttrMap> {
        debug!("Not applying configuration {config:?} to node {}", node.id);
        None
    }
}
