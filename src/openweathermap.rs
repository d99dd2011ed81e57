use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Base URL of the OpenWeatherMap 2.5 API
pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Number of days requested for the daily forecast
const FORECAST_DAYS: u8 = 7;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by the weather API client
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

/// Short description of the weather, for example `light rain`
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WeatherDescription {
    #[serde(default)]
    pub main: String,

    #[serde(default)]
    pub description: String,
}

/// Temperature, humidity and pressure
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MainReading {
    /// Temperature in °C
    #[serde(rename = "temp")]
    pub temperature: f64,

    /// Relative humidity in %
    pub humidity: i64,

    /// Atmospheric pressure in hPa
    pub pressure: f64,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Wind {
    /// Wind speed in m/s
    #[serde(default)]
    pub speed: f64,

    /// Wind direction in degrees
    #[serde(default, rename = "deg")]
    pub heading: f64,
}

/// Precipitation volume. OpenWeatherMap omits the block when there is none
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Precipitation {
    /// Volume over the last hour
    #[serde(default, rename = "1h")]
    pub last_hour: f64,
}

/// Current weather of a city
///
/// See <https://openweathermap.org/current#fields_json>
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CurrentWeather {
    #[serde(default)]
    pub weather: Vec<WeatherDescription>,

    pub main: MainReading,

    #[serde(default)]
    pub wind: Wind,

    #[serde(default)]
    pub rain: Precipitation,

    #[serde(default)]
    pub snow: Precipitation,

    /// Time of the measurement, unix seconds
    #[serde(default)]
    pub dt: i64,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DayTemperature {
    pub min: f64,
    pub max: f64,
}

/// Forecast of a single day
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DailyForecastEntry {
    /// Forecast date, unix seconds
    #[serde(rename = "dt")]
    pub date: i64,

    pub temp: DayTemperature,

    #[serde(default)]
    pub weather: Vec<WeatherDescription>,
}

/// Daily forecast of a city
///
/// See <https://openweathermap.org/forecast16>
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DailyForecast {
    #[serde(default)]
    pub list: Vec<DailyForecastEntry>,
}

/// Source of weather data
#[async_trait]
pub trait WeatherClient: Send + Sync {
    /// Fetches the current weather of a city
    async fn fetch_current(
        &self,
        api_key: &str,
        city: &str,
        language: &str,
    ) -> Result<CurrentWeather, ApiError>;

    /// Fetches the daily forecast of a city
    async fn fetch_daily_forecast(
        &self,
        api_key: &str,
        city: &str,
        language: &str,
    ) -> Result<DailyForecast, ApiError>;
}

/// Weather client for the OpenWeatherMap HTTP API
pub struct OpenWeatherMap {
    base_url: String,
    client: reqwest::Client,
}

impl Default for OpenWeatherMap {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl OpenWeatherMap {
    /// Creates a client for the API at `base_url`
    pub fn new(base_url: &str) -> OpenWeatherMap {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Cannot build HTTP client");

        OpenWeatherMap {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// URL of an API endpoint, for example `weather`
    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = self.url(endpoint);
        debug!("Requesting {url}");

        let resp = self.client.get(&url).query(query).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl WeatherClient for OpenWeatherMap {
    async fn fetch_current(
        &self,
        api_key: &str,
        city: &str,
        language: &str,
    ) -> Result<CurrentWeather, ApiError> {
        self.get(
            "weather",
            &[
                ("q", city),
                ("appid", api_key),
                ("lang", language),
                ("units", "metric"),
            ],
        )
        .await
    }

    async fn fetch_daily_forecast(
        &self,
        api_key: &str,
        city: &str,
        language: &str,
    ) -> Result<DailyForecast, ApiError> {
        let days = FORECAST_DAYS.to_string();
        self.get(
            "forecast/daily",
            &[
                ("q", city),
                ("appid", api_key),
                ("lang", language),
                ("units", "metric"),
                ("cnt", days.as_str()),
            ],
        )
        .await
    }
}
