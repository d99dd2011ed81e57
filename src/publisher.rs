use crate::discovery::{AttrMap, ConfigAttr, Node, OutputDescriptor, OutputType, RunState};
use crate::status::{HistoryList, HistoryMessage, HistoryValue, LatestMessage};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::{BTreeMap, VecDeque};

/// Identifier of the node that represents the publisher itself
pub const PUBLISHER_NODE_ID: &str = "$publisher";

/// Number of values kept in the history of an output
pub const HISTORY_LIMIT: usize = 24;

/// Message waiting to be sent to the MQTT broker
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Identifies an output: node, type and instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputKey {
    pub node_id: String,
    pub output_type: OutputType,
    pub instance: String,
}

impl OutputKey {
    pub fn new(node_id: &str, output_type: OutputType, instance: &str) -> OutputKey {
        OutputKey {
            node_id: node_id.to_string(),
            output_type,
            instance: instance.to_string(),
        }
    }
}

/// Output of a node with its published values
#[derive(Debug)]
pub struct Output {
    pub descriptor: OutputDescriptor,
    history: VecDeque<HistoryValue>,
    forecast: HistoryList,
}

impl Output {
    /// Last published value
    pub fn latest(&self) -> Option<&HistoryValue> {
        self.history.back()
    }

    /// Published values, oldest first
    pub fn history(&self) -> impl Iterator<Item = &HistoryValue> {
        self.history.iter()
    }

    /// Last published forecast
    pub fn forecast(&self) -> &[HistoryValue] {
        &self.forecast
    }
}

/// Receives the configuration requests sent to the nodes
pub trait ConfigHandler {
    /// Called when a configuration update is requested for `node`
    ///
    /// Returns the attributes that must be applied, or `None` to apply nothing.
    fn on_node_config(&mut self, node: &Node, config: &AttrMap) -> Option<AttrMap>;
}

/// Registry of the published nodes and outputs
///
/// Every change that must reach the subscribers is queued as a [`Message`],
/// to be retrieved with [`Publisher::take_messages`].
pub struct Publisher {
    zone: String,
    publisher_id: String,
    nodes: BTreeMap<String, Node>,
    outputs: BTreeMap<OutputKey, Output>,
    outbox: Vec<Message>,
}

impl Publisher {
    /// Creates a publisher with only its own node
    ///
    /// ```
    /// use openweathermap_publisher::publisher::{Publisher, PUBLISHER_NODE_ID};
    ///
    /// let publisher = Publisher::new("local", "openweathermap");
    /// assert_eq!(publisher.node_ids(), vec![PUBLISHER_NODE_ID.to_string()]);
    /// ```
    pub fn new(zone: &str, publisher_id: &str) -> Publisher {
        let mut publisher = Publisher {
            zone: zone.to_string(),
            publisher_id: publisher_id.to_string(),
            nodes: BTreeMap::new(),
            outputs: BTreeMap::new(),
            outbox: Vec::new(),
        };
        publisher.update_node(PUBLISHER_NODE_ID);
        publisher
    }

    /// Base topic of a node: `zone/publisher/node`
    fn node_topic(&self, node_id: &str) -> String {
        format!("{}/{}/{node_id}", self.zone, self.publisher_id)
    }

    /// Topic of a message kind for an output, for example `$value`
    fn output_topic(&self, key: &OutputKey, kind: &str) -> String {
        format!(
            "{}/{kind}/{}/{}",
            self.node_topic(&key.node_id),
            key.output_type,
            key.instance
        )
    }

    /// Topic on which the discovery message of a node is sent
    pub fn node_discovery_topic(&self, node_id: &str) -> String {
        format!("{}/$node", self.node_topic(node_id))
    }

    /// Topic filter matching the configuration requests of all nodes
    pub fn configure_filter(&self) -> String {
        format!("{}/{}/+/$configure", self.zone, self.publisher_id)
    }

    fn queue(&mut self, topic: String, payload: String, retain: bool) {
        debug!("Queueing message to topic {topic} : {payload}");
        self.outbox.push(Message {
            topic,
            payload,
            retain,
        });
    }

    fn publish_node(&mut self, node_id: &str) {
        let Some(node) = self.nodes.get(node_id) else {
            return;
        };
        let payload = node.to_string();
        self.queue(self.node_discovery_topic(node_id), payload, true);
    }

    /// Creates the node if it doesn't exist yet
    ///
    /// Returns `true` if the node was created.
    pub fn update_node(&mut self, node_id: &str) -> bool {
        if self.nodes.contains_key(node_id) {
            return false;
        }

        info!("Adding node {node_id}");
        self.nodes.insert(
            node_id.to_string(),
            Node::new(&self.zone, &self.publisher_id, node_id),
        );
        self.publish_node(node_id);
        true
    }

    /// Adds a configuration attribute to a node
    ///
    /// If the attribute already exists, its configured value is kept and only its
    /// description is updated.
    pub fn update_node_config(&mut self, node_id: &str, name: &str, attr: ConfigAttr) {
        let Some(node) = self.nodes.get_mut(node_id) else {
            warn!("Cannot configure unknown node {node_id}");
            return;
        };

        match node.config.get_mut(name) {
            Some(existing) => {
                let value = existing.value.take();
                *existing = ConfigAttr { value, ..attr };
            }
            None => {
                node.config.insert(name.to_string(), attr);
            }
        }
        self.publish_node(node_id);
    }

    /// Sets the value of an existing configuration attribute
    ///
    /// Returns `false` if the node or the attribute doesn't exist.
    pub fn set_node_config_value(&mut self, node_id: &str, name: &str, value: &str) -> bool {
        let Some(attr) = self
            .nodes
            .get_mut(node_id)
            .and_then(|node| node.config.get_mut(name))
        else {
            warn!("Node {node_id} has no configuration {name}");
            return false;
        };

        attr.value = Some(value.to_string());
        self.publish_node(node_id);
        true
    }

    /// Effective value of a configuration attribute of a node
    pub fn node_config_value(&self, node_id: &str, name: &str) -> Option<&str> {
        self.nodes.get(node_id)?.config_value(name)
    }

    /// Creates an output if it doesn't exist yet
    ///
    /// Returns `true` if the output was created.
    pub fn new_output(&mut self, node_id: &str, output_type: OutputType, instance: &str) -> bool {
        let key = OutputKey::new(node_id, output_type, instance);
        if self.outputs.contains_key(&key) {
            return false;
        }
        let Some(node) = self.nodes.get(node_id) else {
            warn!("Cannot add output {output_type}/{instance} to unknown node {node_id}");
            return false;
        };

        let descriptor = OutputDescriptor::new(node, output_type, instance);
        let topic = self.output_topic(&key, "$output");
        let payload = descriptor.to_string();
        self.outputs.insert(
            key,
            Output {
                descriptor,
                history: VecDeque::with_capacity(HISTORY_LIMIT),
                forecast: Vec::new(),
            },
        );
        self.queue(topic, payload, true);
        true
    }

    /// Updates the value of an output
    ///
    /// Nothing is published when the value didn't change. Returns `true` if the
    /// value was published.
    pub fn update_output_value(
        &mut self,
        node_id: &str,
        output_type: OutputType,
        instance: &str,
        value: &str,
    ) -> bool {
        let key = OutputKey::new(node_id, output_type, instance);
        let Some(output) = self.outputs.get_mut(&key) else {
            warn!("Ignoring value for unknown output {node_id}/{output_type}/{instance}");
            return false;
        };

        if output.latest().is_some_and(|latest| latest.value == value) {
            return false;
        }

        if output.history.len() == HISTORY_LIMIT {
            output.history.pop_front();
        }
        output.history.push_back(HistoryValue::new(Utc::now(), value));

        let output = &self.outputs[&key];
        let address = output.descriptor.address.as_str();
        let Some(latest) = output.latest() else {
            return false;
        };
        let history: HistoryList = output.history().cloned().collect();
        let latest_payload = LatestMessage { address, latest }.to_string();
        let history_payload = HistoryMessage {
            address,
            history: &history,
        }
        .to_string();

        self.queue(self.output_topic(&key, "$value"), value.to_string(), true);
        self.queue(self.output_topic(&key, "$latest"), latest_payload, true);
        self.queue(self.output_topic(&key, "$history"), history_payload, true);
        true
    }

    /// Replaces the forecast of an output and publishes it
    pub fn update_forecast(
        &mut self,
        node_id: &str,
        output_type: OutputType,
        instance: &str,
        forecast: HistoryList,
    ) {
        let key = OutputKey::new(node_id, output_type, instance);
        let Some(output) = self.outputs.get_mut(&key) else {
            warn!("Ignoring forecast for unknown output {node_id}/{output_type}/{instance}");
            return;
        };

        output.forecast = forecast;
        let payload = HistoryMessage {
            address: &output.descriptor.address,
            history: &output.forecast,
        }
        .to_string();
        self.queue(self.output_topic(&key, "$forecast"), payload, true);
    }

    fn set_status(&mut self, node_id: &str, run_state: RunState, error: Option<&str>) {
        let Some(node) = self.nodes.get_mut(node_id) else {
            warn!("Cannot set status of unknown node {node_id}");
            return;
        };

        let error = error.map(str::to_string);
        if node.run_state == run_state && node.error == error {
            return;
        }
        node.run_state = run_state;
        node.error = error;
        self.publish_node(node_id);
    }

    /// Marks a node as failing, with a message for the subscribers
    pub fn set_error_status(&mut self, node_id: &str, message: &str) {
        warn!("Node {node_id}: {message}");
        self.set_status(node_id, RunState::Error, Some(message));
    }

    /// Marks a node as working again
    pub fn set_ready_status(&mut self, node_id: &str) {
        self.set_status(node_id, RunState::Ready, None);
    }

    /// Marks the publisher node as disconnected, when shutting down
    pub fn set_disconnected(&mut self) {
        self.set_status(PUBLISHER_NODE_ID, RunState::Disconnected, None);
    }

    /// Discovery message of the publisher node once disconnected
    ///
    /// This is registered as the last will of the MQTT connection.
    pub fn last_will(&self) -> Message {
        let mut node = Node::new(&self.zone, &self.publisher_id, PUBLISHER_NODE_ID);
        node.run_state = RunState::Disconnected;
        Message {
            topic: self.node_discovery_topic(PUBLISHER_NODE_ID),
            payload: node.to_string(),
            retain: true,
        }
    }

    /// Handles a message received on a `$configure` topic
    ///
    /// The handler decides which attributes are applied. Returns `true` if the
    /// node configuration changed.
    pub fn handle_configure<H: ConfigHandler>(
        &mut self,
        topic: &str,
        payload: &str,
        handler: &mut H,
    ) -> bool {
        let prefix = format!("{}/{}/", self.zone, self.publisher_id);
        let Some(node_id) = topic
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix("/$configure"))
        else {
            warn!("Ignoring configuration on unexpected topic {topic}");
            return false;
        };
        let Some(node) = self.nodes.get(node_id) else {
            warn!("Ignoring configuration for unknown node {node_id}");
            return false;
        };
        let config: AttrMap = match serde_json::from_str(payload) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring invalid configuration for node {node_id}: {e}");
                return false;
            }
        };

        info!("Configuration requested for node {node_id}: {config:?}");
        let Some(applied) = handler.on_node_config(node, &config) else {
            return false;
        };

        let mut changed = false;
        for (name, value) in &applied {
            changed |= self.set_node_config_value(node_id, name, value);
        }
        changed
    }

    /// Identifiers of all the nodes, in order
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn output(&self, node_id: &str, output_type: OutputType, instance: &str) -> Option<&Output> {
        self.outputs
            .get(&OutputKey::new(node_id, output_type, instance))
    }

    /// Outputs of a node, ordered by type and instance
    pub fn node_outputs<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a OutputKey> {
        self.outputs.keys().filter(move |key| key.node_id == node_id)
    }

    /// Last published value of an output
    pub fn output_value(
        &self,
        node_id: &str,
        output_type: OutputType,
        instance: &str,
    ) -> Option<&str> {
        self.output(node_id, output_type, instance)?
            .latest()
            .map(|latest| latest.value.as_str())
    }

    /// Removes and returns the messages waiting to be sent
    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }
}
