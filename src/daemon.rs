use crate::configuration::Configuration;
use crate::openweathermap::{OpenWeatherMap, WeatherClient};
use crate::publisher::{Message, Publisher};
use crate::weather::WeatherApp;
use log::{debug, error, info, trace, warn};
use rumqttc::{AsyncClient, ClientError, Event, LastWill, MqttOptions, Packet, QoS};
use std::error::Error;
use std::time::Duration;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tokio::task;
use tokio::time::{Interval, MissedTickBehavior, interval, sleep};

/// Notification of the MQTT event loop, as seen by the daemon
#[derive(Debug, PartialEq)]
enum Notification {
    /// The broker accepted the connection. Subscriptions must be renewed
    Connected,

    /// A message was received on a subscribed topic
    Received { topic: String, payload: String },

    Other,
}

impl From<Event> for Notification {
    fn from(event: Event) -> Self {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => Notification::Connected,
            Event::Incoming(Packet::Publish(publish)) => Notification::Received {
                payload: String::from_utf8_lossy(&publish.payload).to_string(),
                topic: publish.topic,
            },
            _ => Notification::Other,
        }
    }
}

/// Daemon that periodically publishes the weather to MQTT
pub struct Daemon<C = OpenWeatherMap> {
    config: Configuration,
    mqtt_config: MqttOptions,
    publisher: Publisher,
    app: WeatherApp<C>,
}

impl Daemon {
    /// Constructs a daemon that reads the weather from OpenWeatherMap
    ///
    /// ```
    /// use openweathermap_publisher::{Configuration, Daemon};
    ///
    /// let config = Configuration::load("conf/openweathermap-publisher.conf").expect("Cannot load configuration");
    /// let mut daemon = Daemon::new(config);
    ///
    /// // later, run daemon.run() in an async function
    /// ```
    pub fn new(config: Configuration) -> Daemon {
        let client = OpenWeatherMap::new(&config.weather.base_url);
        Daemon::with_client(config, client)
    }
}

impl<C: WeatherClient> Daemon<C> {
    /// Constructs a daemon that reads the weather from `client`
    pub fn with_client(config: Configuration, client: C) -> Daemon<C> {
        info!(
            "Daemon for {} starting with {} cities",
            config.weather.publisher,
            config.weather.cities.len()
        );

        let publisher = Publisher::new(&config.mqtt.zone, &config.weather.publisher);
        let app = WeatherApp::new(&config.weather, client);

        let mut mqtt_config =
            MqttOptions::new(&config.mqtt.client_id, &config.mqtt.host, config.mqtt.port);
        mqtt_config.set_credentials(&config.mqtt.user, &config.mqtt.password);

        let will = publisher.last_will();
        mqtt_config.set_last_will(LastWill::new(
            will.topic,
            will.payload,
            QoS::AtLeastOnce,
            will.retain,
        ));

        info!(
            "Connecting to MQTT broker {}:{}",
            config.mqtt.host, config.mqtt.port
        );

        Daemon {
            config,
            mqtt_config,
            publisher,
            app,
        }
    }

    /// Returns the registry of published nodes and outputs
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Creates the nodes and outputs of the configured cities
    pub fn publish_nodes(&mut self) {
        self.app.publish_nodes(&mut self.publisher);
    }

    /// Updates the current weather, logging a failed cycle
    pub async fn update_weather(&mut self) {
        if let Err(e) = self.app.update_weather(&mut self.publisher).await {
            error!("Weather update aborted: {e}");
        }
    }

    /// Updates the daily forecast, logging a failed cycle
    pub async fn update_forecast(&mut self) {
        if let Err(e) = self.app.update_forecast(&mut self.publisher).await {
            error!("Forecast update aborted: {e}");
        }
    }

    /// Handles a message received on a `$configure` topic
    pub fn handle_configure(&mut self, topic: &str, payload: &str) {
        self.publisher
            .handle_configure(topic, payload, &mut self.app);
    }

    /// Removes the messages that are waiting to be sent to MQTT
    pub fn take_messages(&mut self) -> Vec<Message> {
        self.publisher.take_messages()
    }

    /// Runs the main loop that periodically sends the MQTT events
    pub async fn run(self: &mut Daemon<C>) {
        self.publish_nodes();

        let (client, mut event_loop) = AsyncClient::new(self.mqtt_config.clone(), 64);
        let (config_tx, config_rx) = mpsc::channel(16);
        let subscriber = client.clone();
        let configure_filter = self.publisher.configure_filter();

        task::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => {
                        trace!("MQTT notification received: {event:?}");
                        match Notification::from(event) {
                            // The session is not kept by the broker across connections
                            Notification::Connected => {
                                debug!("Subscribing to {configure_filter}");
                                if let Err(e) =
                                    subscriber.try_subscribe(&configure_filter, QoS::AtLeastOnce)
                                {
                                    error!("Cannot subscribe to {configure_filter}: {e}");
                                }
                            }
                            Notification::Received { topic, payload } => {
                                if config_tx.send((topic, payload)).await.is_err() {
                                    break;
                                }
                            }
                            Notification::Other => {}
                        }
                    }
                    Err(e) => {
                        warn!("MQTT connection error: {e}");
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        self.main_loop(client, config_rx)
            .await
            .unwrap_or_else(|e| {
                error!("MQTT main loop failed: {e}");
            });
    }

    /// Periodic timer, first tick immediately
    fn timer(period: u64) -> Interval {
        let mut timer = interval(Duration::from_secs(period.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    /// Waits for the next tick, or forever when there is no timer
    async fn tick(timer: &mut Option<Interval>) {
        match timer {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn main_loop(
        self: &mut Daemon<C>,
        client: AsyncClient,
        mut config_rx: mpsc::Receiver<(String, String)>,
    ) -> Result<(), Box<dyn Error>> {
        let mut terminal_signal = tokio::signal::unix::signal(SignalKind::terminate())?;

        let mut weather_timer = Self::timer(self.config.weather.update_period);
        let mut forecast_timer = self
            .config
            .weather
            .forecast
            .then(|| Self::timer(self.config.weather.forecast_period));

        loop {
            tokio::select! {
                _ = weather_timer.tick() => self.update_weather().await,
                _ = Self::tick(&mut forecast_timer) => self.update_forecast().await,
                Some((topic, payload)) = config_rx.recv() => self.handle_configure(&topic, &payload),
                _ = tokio::signal::ctrl_c() => {
                    debug!("Ctrl-C received");
                    break;
                },
                _ = terminal_signal.recv() => {
                    debug!("Interrupt received");
                    break;
                }
            }

            self.flush(&client).await?;
        }

        self.publisher.set_disconnected();
        self.flush(&client).await?;

        sleep(Duration::from_secs(1)).await;

        Ok(())
    }

    /// Sends the queued messages to MQTT
    async fn flush(&mut self, client: &AsyncClient) -> Result<(), ClientError> {
        for message in self.publisher.take_messages() {
            Self::publish(client, message).await?;
        }
        Ok(())
    }

    // Publish a message to MQTT
    async fn publish(client: &AsyncClient, message: Message) -> Result<(), ClientError> {
        debug!("Publishing to topic {} : {}", message.topic, message.payload);
        client
            .publish(message.topic, QoS::AtLeastOnce, message.retain, message.payload)
            .await
    }
}
