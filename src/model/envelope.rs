//! Event envelope: the normalized `{topic, payload}` unit handed to the dispatcher.
//!
//! Both hub adapters decode their wire shapes into [`EventEnvelope`] once, at
//! the adapter boundary. The dispatcher only ever sees this form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

/// Event category used for routing.
///
/// The vocabulary is closed, but servers may add informational channels at
/// any time. Those decode to [`Topic::Unknown`] and are ignored downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Series,
    Episode,
    Movie,
    Version,
    Queue,
    QueueDetails,
    Health,
    Command,
    Unknown(String),
}

impl Topic {
    /// Parse a topic name as sent by either server.
    ///
    /// The movie server spells the queue detail channel `queue/details`.
    pub fn parse(name: &str) -> Self {
        match name {
            "series" => Topic::Series,
            "episode" => Topic::Episode,
            "movie" => Topic::Movie,
            "version" => Topic::Version,
            "queue" => Topic::Queue,
            "queue-details" | "queue/details" => Topic::QueueDetails,
            "health" => Topic::Health,
            "command" => Topic::Command,
            other => Topic::Unknown(other.to_string()),
        }
    }

    /// Topics the servers emit for their own UI that carry nothing for us.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            Topic::Version | Topic::Queue | Topic::QueueDetails | Topic::Health | Topic::Command
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            Topic::Series => "series",
            Topic::Episode => "episode",
            Topic::Movie => "movie",
            Topic::Version => "version",
            Topic::Queue => "queue",
            Topic::QueueDetails => "queue-details",
            Topic::Health => "health",
            Topic::Command => "command",
            Topic::Unknown(name) => name,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Opaque message body. Either a single object or an ordered sequence of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Value),
    Sequence(Vec<Value>),
}

impl Payload {
    /// Wrap a raw JSON value, splitting arrays into a sequence.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Payload::Sequence(items),
            other => Payload::Single(other),
        }
    }

    /// The significant element: the object itself, or the first of a sequence.
    pub fn first(&self) -> Option<&Value> {
        match self {
            Payload::Single(value) => Some(value),
            Payload::Sequence(items) => items.first(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Payload::Single(value) => value.clone(),
            Payload::Sequence(items) => Value::Array(items.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A decoded server event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub topic: Topic,
    pub payload: Payload,
}

impl EventEnvelope {
    /// Envelope for a callback-channel delivery: the channel name is the topic.
    pub fn from_channel(channel: &str, payload: Payload) -> Self {
        Self {
            topic: Topic::parse(channel),
            payload,
        }
    }

    /// Envelope for a self-describing message whose body carries a `name`
    /// field, either directly or on the first element of a list.
    ///
    /// Returns `None` for any other shape.
    pub fn from_message(value: Value) -> Option<Self> {
        let payload = Payload::from_value(value);
        let name = payload.first()?.get("name")?.as_str()?.to_string();
        Some(Self {
            topic: Topic::parse(&name),
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Typed payload schemas
// ---------------------------------------------------------------------------

/// Body shape shared by the catalog resources: `{"name", "body": {"action", "resource"}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMessage {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<ResourceBody>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceBody {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub resource: Option<Resource>,
}

/// The catalog entity a message refers to. Only the fields routing needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: i64,
    #[serde(default)]
    pub series_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// A series catalog change.
#[derive(Debug, Clone)]
pub struct SeriesPayload {
    pub action: Option<String>,
    pub series: Resource,
}

/// An episode (or episode file) change.
#[derive(Debug, Clone)]
pub struct EpisodePayload {
    pub action: Option<String>,
    pub episode: Resource,
}

/// A movie catalog change.
#[derive(Debug, Clone)]
pub struct MoviePayload {
    pub action: Option<String>,
    pub movie: Resource,
}

/// Decode the significant element into a [`ResourceMessage`].
///
/// Accepts both the wrapped `{"name", "body"}` form and a bare `{"action", "resource"}` body.
fn decode_resource(payload: &Payload) -> Option<(Option<String>, Resource)> {
    let value = payload.first()?;
    let body = match serde_json::from_value::<ResourceMessage>(value.clone()) {
        Ok(ResourceMessage { body: Some(body), .. }) => body,
        _ => serde_json::from_value::<ResourceBody>(value.clone()).ok()?,
    };
    let resource = body.resource?;
    Some((body.action, resource))
}

impl SeriesPayload {
    /// Unknown shapes decode to `None`; callers ignore them.
    pub fn decode(payload: &Payload) -> Option<Self> {
        decode_resource(payload).map(|(action, series)| Self { action, series })
    }
}

impl EpisodePayload {
    pub fn decode(payload: &Payload) -> Option<Self> {
        decode_resource(payload).map(|(action, episode)| Self { action, episode })
    }
}

impl MoviePayload {
    pub fn decode(payload: &Payload) -> Option<Self> {
        decode_resource(payload).map(|(action, movie)| Self { action, movie })
    }
}
