use async_trait::async_trait;
use openweathermap_publisher::configuration::Configuration;
use openweathermap_publisher::daemon::Daemon;
use openweathermap_publisher::discovery::{
    CURRENT_INSTANCE, ConfigAttr, DataType, FORECAST_INSTANCE, LAST_HOUR_INSTANCE, MAX_INSTANCE,
    MIN_INSTANCE, OutputType, RunState,
};
use openweathermap_publisher::openweathermap::{
    ApiError, CurrentWeather, DailyForecast, DailyForecastEntry, DayTemperature, MainReading,
    Precipitation, WeatherClient, WeatherDescription, Wind,
};
use openweathermap_publisher::publisher::{PUBLISHER_NODE_ID, Publisher};
use openweathermap_publisher::weather::{
    CITY_OUTPUTS, CURRENT_UNAVAILABLE, FORECAST_EMPTY, FORECAST_UNAVAILABLE, LANGUAGE_CONFIG,
    UpdateError, WeatherApp,
};
use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;

const AMSTERDAM: &str = "Amsterdam,NL";
const BERLIN: &str = "Berlin,DE";
const VANCOUVER: &str = "Vancouver,CA";

/// Weather client answering from canned responses. Unknown cities fail.
#[derive(Default)]
struct MockClient {
    current: HashMap<String, CurrentWeather>,
    forecast: HashMap<String, DailyForecast>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockClient {
    fn with_current(mut self, city: &str, weather: CurrentWeather) -> Self {
        self.current.insert(city.to_string(), weather);
        self
    }

    fn with_forecast(mut self, city: &str, forecast: DailyForecast) -> Self {
        self.forecast.insert(city.to_string(), forecast);
        self
    }

    fn record(&self, city: &str, language: &str) {
        self.calls
            .lock()
            .expect("poisoned lock")
            .push((city.to_string(), language.to_string()));
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("poisoned lock").clone()
    }

    fn not_found() -> ApiError {
        ApiError::Api {
            status: 404,
            message: String::from("city not found"),
        }
    }
}

#[async_trait]
impl WeatherClient for MockClient {
    async fn fetch_current(
        &self,
        _api_key: &str,
        city: &str,
        language: &str,
    ) -> Result<CurrentWeather, ApiError> {
        self.record(city, language);
        self.current.get(city).cloned().ok_or_else(Self::not_found)
    }

    async fn fetch_daily_forecast(
        &self,
        _api_key: &str,
        city: &str,
        language: &str,
    ) -> Result<DailyForecast, ApiError> {
        self.record(city, language);
        self.forecast.get(city).cloned().ok_or_else(Self::not_found)
    }
}

fn config(cities: &[&str], extra: &str) -> Result<Configuration, Box<dyn Error>> {
    Configuration::parse(&format!(
        r#"
        [mqtt]

        [weather]
        apikey = "secret"
        cities = {}
        {extra}
        "#,
        serde_json::to_string(cities)?
    ))
}

fn current(description: Option<&str>, temperature: f64, rain: f64) -> CurrentWeather {
    CurrentWeather {
        weather: description
            .map(|d| WeatherDescription {
                main: String::new(),
                description: d.to_string(),
            })
            .into_iter()
            .collect(),
        main: MainReading {
            temperature,
            humidity: 75,
            pressure: 1019.4,
        },
        wind: Wind {
            speed: 3.14,
            heading: 180.0,
        },
        rain: Precipitation { last_hour: rain },
        snow: Precipitation::default(),
        dt: 1700000000,
    }
}

fn day(date: i64, description: &str, min: f64, max: f64) -> DailyForecastEntry {
    DailyForecastEntry {
        date,
        temp: DayTemperature { min, max },
        weather: vec![WeatherDescription {
            main: String::new(),
            description: description.to_string(),
        }],
    }
}

fn provisioned(
    cities: &[&str],
    client: MockClient,
) -> Result<(WeatherApp<MockClient>, Publisher), Box<dyn Error>> {
    let conf = config(cities, "")?;
    let mut publisher = Publisher::new(&conf.mqtt.zone, &conf.weather.publisher);
    let app = WeatherApp::new(&conf.weather, client);
    app.publish_nodes(&mut publisher);
    Ok((app, publisher))
}

#[test]
fn test_provisioning() -> Result<(), Box<dyn Error>> {
    let cities = [AMSTERDAM, BERLIN, VANCOUVER];
    let (app, mut publisher) = provisioned(&cities, MockClient::default())?;

    // One node per city, plus the publisher node
    assert_eq!(publisher.node_ids().len(), cities.len() + 1);
    assert!(publisher.node(PUBLISHER_NODE_ID).is_some());
    for city in cities {
        assert_eq!(publisher.node_outputs(city).count(), CITY_OUTPUTS.len());
        for (output_type, instance) in CITY_OUTPUTS {
            assert!(publisher.output(city, output_type, instance).is_some());
        }
    }
    assert_eq!(publisher.node_outputs(PUBLISHER_NODE_ID).count(), 0);

    // Provisioning again changes nothing
    app.publish_nodes(&mut publisher);
    assert_eq!(publisher.node_ids().len(), cities.len() + 1);
    for city in cities {
        assert_eq!(publisher.node_outputs(city).count(), CITY_OUTPUTS.len());
    }

    Ok(())
}

#[test]
fn test_forecast_outputs() -> Result<(), Box<dyn Error>> {
    let (_, publisher) = provisioned(&[AMSTERDAM], MockClient::default())?;

    assert!(
        publisher
            .output(AMSTERDAM, OutputType::Weather, FORECAST_INSTANCE)
            .is_some()
    );
    assert!(
        publisher
            .output(AMSTERDAM, OutputType::Temperature, MAX_INSTANCE)
            .is_some()
    );
    assert!(
        publisher
            .output(AMSTERDAM, OutputType::Temperature, MIN_INSTANCE)
            .is_some()
    );
    assert!(
        publisher
            .output(AMSTERDAM, OutputType::AtmosphericPressure, MIN_INSTANCE)
            .is_none()
    );

    Ok(())
}

#[test]
fn test_default_language() -> Result<(), Box<dyn Error>> {
    let mut publisher = Publisher::new("local", "openweathermap");

    // Berlin was configured before provisioning
    publisher.update_node(BERLIN);
    publisher.update_node_config(
        BERLIN,
        LANGUAGE_CONFIG,
        ConfigAttr::new(DataType::Enum, "Reporting language", "en"),
    );
    publisher.set_node_config_value(BERLIN, LANGUAGE_CONFIG, "de");

    let conf = config(&[AMSTERDAM, BERLIN], "")?;
    WeatherApp::new(&conf.weather, MockClient::default()).publish_nodes(&mut publisher);

    assert_eq!(
        publisher.node_config_value(AMSTERDAM, LANGUAGE_CONFIG),
        Some("en")
    );
    assert_eq!(
        publisher.node_config_value(BERLIN, LANGUAGE_CONFIG),
        Some("de")
    );

    Ok(())
}

#[tokio::test]
async fn test_update_weather() -> Result<(), Box<dyn Error>> {
    let client = MockClient::default()
        .with_current(AMSTERDAM, current(Some("light rain"), 11.96, 0.002))
        .with_current(VANCOUVER, current(None, -2.04, 0.0));
    let (app, mut publisher) = provisioned(&[AMSTERDAM, VANCOUVER], client)?;

    app.update_weather(&mut publisher).await?;

    let value = |city, output_type, instance| {
        publisher
            .output_value(city, output_type, instance)
            .map(str::to_string)
    };

    assert_eq!(
        value(AMSTERDAM, OutputType::Weather, CURRENT_INSTANCE).as_deref(),
        Some("light rain")
    );
    assert_eq!(
        value(AMSTERDAM, OutputType::Temperature, CURRENT_INSTANCE).as_deref(),
        Some("12.0")
    );
    assert_eq!(
        value(AMSTERDAM, OutputType::Humidity, CURRENT_INSTANCE).as_deref(),
        Some("75")
    );
    assert_eq!(
        value(AMSTERDAM, OutputType::AtmosphericPressure, CURRENT_INSTANCE).as_deref(),
        Some("1019")
    );
    assert_eq!(
        value(AMSTERDAM, OutputType::WindSpeed, CURRENT_INSTANCE).as_deref(),
        Some("3.1")
    );
    assert_eq!(
        value(AMSTERDAM, OutputType::WindHeading, CURRENT_INSTANCE).as_deref(),
        Some("180")
    );
    assert_eq!(
        value(AMSTERDAM, OutputType::Rain, LAST_HOUR_INSTANCE).as_deref(),
        Some("2.0")
    );
    assert_eq!(
        value(AMSTERDAM, OutputType::Snow, LAST_HOUR_INSTANCE).as_deref(),
        Some("0.0")
    );

    // No description in the response: empty string
    assert_eq!(
        value(VANCOUVER, OutputType::Weather, CURRENT_INSTANCE).as_deref(),
        Some("")
    );
    assert_eq!(
        value(VANCOUVER, OutputType::Temperature, CURRENT_INSTANCE).as_deref(),
        Some("-2.0")
    );

    // Forecast outputs are not touched by the current weather
    assert_eq!(
        value(AMSTERDAM, OutputType::Weather, FORECAST_INSTANCE),
        None
    );

    // Every city was requested in the default language
    assert_eq!(
        app_calls(&app),
        vec![
            (AMSTERDAM.to_string(), "en".to_string()),
            (VANCOUVER.to_string(), "en".to_string()),
        ]
    );

    Ok(())
}

fn app_calls(app: &WeatherApp<MockClient>) -> Vec<(String, String)> {
    app.client().calls()
}

#[tokio::test]
async fn test_first_failure_aborts() -> Result<(), Box<dyn Error>> {
    // Amsterdam is processed first and fails
    let client = MockClient::default().with_current(BERLIN, current(Some("clear sky"), 20.0, 0.0));
    let (app, mut publisher) = provisioned(&[BERLIN, AMSTERDAM], client)?;
    publisher.take_messages();

    let result = app.update_weather(&mut publisher).await;

    assert!(matches!(result, Err(UpdateError::Fetch { ref city, .. }) if city == AMSTERDAM));

    for city in [AMSTERDAM, BERLIN] {
        for (output_type, instance) in CITY_OUTPUTS {
            assert_eq!(publisher.output_value(city, output_type, instance), None);
        }
    }

    let node = publisher.node(AMSTERDAM).expect("node not found");
    assert_eq!(node.run_state, RunState::Error);
    assert_eq!(node.error.as_deref(), Some(CURRENT_UNAVAILABLE));
    assert_eq!(
        publisher.node(BERLIN).map(|n| n.run_state),
        Some(RunState::Ready)
    );

    // Berlin was never requested
    assert_eq!(app_calls(&app).len(), 1);

    // Only the status of the failing node is published
    let messages = publisher.take_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].topic,
        "local/openweathermap/Amsterdam,NL/$node"
    );

    Ok(())
}

#[tokio::test]
async fn test_unchanged_values_not_published() -> Result<(), Box<dyn Error>> {
    let client = MockClient::default().with_current(AMSTERDAM, current(Some("mist"), 5.0, 0.0));
    let (app, mut publisher) = provisioned(&[AMSTERDAM], client)?;

    app.update_weather(&mut publisher).await?;
    assert!(!publisher.take_messages().is_empty());

    app.update_weather(&mut publisher).await?;
    assert!(publisher.take_messages().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_configured_language() -> Result<(), Box<dyn Error>> {
    let conf = config(
        &[AMSTERDAM],
        r#"
        [weather.languages]
        "Amsterdam,NL" = "nl"
        "#,
    )?;
    let client = MockClient::default().with_current(AMSTERDAM, current(Some("motregen"), 8.0, 0.0));
    let mut publisher = Publisher::new(&conf.mqtt.zone, &conf.weather.publisher);
    let app = WeatherApp::new(&conf.weather, client);
    app.publish_nodes(&mut publisher);

    app.update_weather(&mut publisher).await?;

    assert_eq!(
        app_calls(&app),
        vec![(AMSTERDAM.to_string(), "nl".to_string())]
    );

    Ok(())
}

#[tokio::test]
async fn test_update_forecast() -> Result<(), Box<dyn Error>> {
    let forecast = DailyForecast {
        list: vec![
            day(1700000000, "light rain", 4.24, 9.71),
            day(1700086400, "few clouds", 2.0, 7.5),
        ],
    };
    let client = MockClient::default().with_forecast(AMSTERDAM, forecast);
    let (app, mut publisher) = provisioned(&[AMSTERDAM], client)?;

    app.update_forecast(&mut publisher).await?;

    let forecast_values = |output_type, instance| -> Vec<String> {
        publisher
            .output(AMSTERDAM, output_type, instance)
            .map(|o| o.forecast().iter().map(|v| v.value.clone()).collect())
            .unwrap_or_default()
    };

    assert_eq!(
        forecast_values(OutputType::Weather, FORECAST_INSTANCE),
        vec!["light rain", "few clouds"]
    );
    assert_eq!(
        forecast_values(OutputType::Temperature, MAX_INSTANCE),
        vec!["9.7", "7.5"]
    );
    // Minimums are published on their own, not appended to the maximums
    assert_eq!(
        forecast_values(OutputType::Temperature, MIN_INSTANCE),
        vec!["4.2", "2.0"]
    );

    let min = publisher
        .output(AMSTERDAM, OutputType::Temperature, MIN_INSTANCE)
        .expect("output not found");
    assert_eq!(min.forecast()[1].timestamp.timestamp(), 1700086400);

    Ok(())
}

#[tokio::test]
async fn test_forecast_failures() -> Result<(), Box<dyn Error>> {
    let client = MockClient::default().with_forecast(AMSTERDAM, DailyForecast::default());
    let (app, mut publisher) = provisioned(&[AMSTERDAM, BERLIN], client)?;

    let result = app.update_forecast(&mut publisher).await;
    assert!(matches!(result, Err(UpdateError::EmptyForecast { .. })));
    assert_eq!(
        publisher.node(AMSTERDAM).and_then(|n| n.error.clone()).as_deref(),
        Some(FORECAST_EMPTY)
    );
    // Berlin comes after Amsterdam and was skipped
    assert_eq!(publisher.node(BERLIN).and_then(|n| n.error.clone()), None);

    let client = MockClient::default();
    let (app, mut publisher) = provisioned(&[BERLIN], client)?;

    let result = app.update_forecast(&mut publisher).await;
    assert!(matches!(result, Err(UpdateError::Fetch { .. })));
    assert_eq!(
        publisher.node(BERLIN).and_then(|n| n.error.clone()).as_deref(),
        Some(FORECAST_UNAVAILABLE)
    );

    Ok(())
}

#[tokio::test]
async fn test_recovery_after_failure() -> Result<(), Box<dyn Error>> {
    let (app, mut publisher) = provisioned(&[AMSTERDAM], MockClient::default())?;
    assert!(app.update_weather(&mut publisher).await.is_err());

    let client = MockClient::default().with_current(AMSTERDAM, current(Some("sunny"), 21.0, 0.0));
    let conf = config(&[AMSTERDAM], "")?;
    let app = WeatherApp::new(&conf.weather, client);
    app.update_weather(&mut publisher).await?;

    let node = publisher.node(AMSTERDAM).expect("node not found");
    assert_eq!(node.run_state, RunState::Ready);
    assert_eq!(node.error, None);

    Ok(())
}

#[test]
fn test_configuration_not_applied() -> Result<(), Box<dyn Error>> {
    let (mut app, mut publisher) = provisioned(&[AMSTERDAM], MockClient::default())?;

    let changed = publisher.handle_configure(
        "local/openweathermap/Amsterdam,NL/$configure",
        r#"{"language": "fr"}"#,
        &mut app,
    );

    assert!(!changed);
    assert_eq!(
        publisher.node_config_value(AMSTERDAM, LANGUAGE_CONFIG),
        Some("en")
    );

    Ok(())
}

#[tokio::test]
async fn test_daemon_messages() -> Result<(), Box<dyn Error>> {
    let conf = config(&[AMSTERDAM], "")?;
    let client = MockClient::default().with_current(AMSTERDAM, current(Some("drizzle"), 9.0, 0.0));
    let mut daemon = Daemon::with_client(conf, client);

    daemon.publish_nodes();
    let discovery = daemon.take_messages();
    assert!(discovery.iter().all(|m| m.retain));
    assert!(
        discovery
            .iter()
            .any(|m| m.topic == "local/openweathermap/Amsterdam,NL/$output/temperature/current")
    );

    daemon.update_weather().await;
    let messages = daemon.take_messages();
    let temperature = messages
        .iter()
        .find(|m| m.topic == "local/openweathermap/Amsterdam,NL/$value/temperature/current")
        .expect("temperature not published");
    assert_eq!(temperature.payload, "9.0");

    // Configuration requests are acknowledged without any change
    daemon.handle_configure(
        "local/openweathermap/Amsterdam,NL/$configure",
        r#"{"language": "fr"}"#,
    );
    assert!(daemon.take_messages().is_empty());

    Ok(())
}
