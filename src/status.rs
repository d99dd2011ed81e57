use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// A value with the time it applies to
///
/// Used both for the history of published values and for forecast entries.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HistoryValue {
    pub timestamp: DateTime<Utc>,
    pub value: String,
}

impl HistoryValue {
    pub fn new(timestamp: DateTime<Utc>, value: &str) -> HistoryValue {
        HistoryValue {
            timestamp,
            value: value.to_string(),
        }
    }

    /// Creates a value for a unix timestamp in seconds
    ///
    /// Out of range timestamps fall back to the epoch.
    pub fn at_unix(seconds: i64, value: &str) -> HistoryValue {
        Self::new(
            DateTime::from_timestamp(seconds, 0).unwrap_or_default(),
            value,
        )
    }
}

/// Sequence of values, oldest first
pub type HistoryList = Vec<HistoryValue>;

/// Message sent on the `$latest` topic of an output
#[derive(Serialize, Debug)]
pub struct LatestMessage<'a> {
    /// Address of the output
    pub address: &'a str,

    #[serde(flatten)]
    pub latest: &'a HistoryValue,
}

/// Message sent on the `$history` and `$forecast` topics of an output
#[derive(Serialize, Debug)]
pub struct HistoryMessage<'a> {
    /// Address of the output
    pub address: &'a str,

    pub history: &'a [HistoryValue],
}

impl fmt::Display for LatestMessage<'_> {
    /// Formats the message to a JSON string
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Ok(str) = serde_json::to_string(&self) else {
            return Err(fmt::Error);
        };
        write!(f, "{str}")
    }
}

impl fmt::Display for HistoryMessage<'_> {
    /// Formats the message to a JSON string
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Ok(str) = serde_json::to_string(&self) else {
            return Err(fmt::Error);
        };
        write!(f, "{str}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_latest() {
        let value = HistoryValue::at_unix(1700000000, "12.3");
        let message = LatestMessage {
            address: "local/openweathermap/Amsterdam,NL/temperature/current",
            latest: &value,
        };

        let json: Value = serde_json::from_str(&message.to_string()).expect("Cannot read message");

        assert_eq!(json["value"], "12.3");
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20Z");
        assert_eq!(
            json["address"],
            "local/openweathermap/Amsterdam,NL/temperature/current"
        );
    }

    #[test]
    fn test_history() {
        let history = vec![
            HistoryValue::at_unix(0, "a"),
            HistoryValue::at_unix(86400, "b"),
        ];
        let message = HistoryMessage {
            address: "local/openweathermap/Amsterdam,NL/weather/forecast",
            history: &history,
        };

        let json: Value = serde_json::from_str(&message.to_string()).expect("Cannot read message");

        assert_eq!(json["history"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["history"][1]["value"], "b");
    }

    #[test]
    fn test_out_of_range_timestamp() {
        let value = HistoryValue::at_unix(i64::MAX, "x");
        assert_eq!(value.timestamp, DateTime::<Utc>::default());
    }
}
