use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::EncodeError;

/// Well-known event type discriminators.
pub mod event_types {
    pub const LOG: &str = "log";
    pub const STATUS: &str = "status";
    pub const PEER_LIST: &str = "peerList";
    /// Sent once to a freshly registered console, carrying its connection id.
    pub const CONNECTED: &str = "connected";
}

/// Payload carried in the `data` field of an envelope.
///
/// Every variant has a fixed field list; encoding dispatches through an
/// exhaustive match, never through introspection.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Encodes as `null`
    Empty,
    Log(LogRecord),
    Status(RoomStatus),
    PeerList(Vec<PeerProfile>),
    /// A scalar or array
    Value(FieldValue),
    /// Open shape with caller-enumerated fields
    Record(FieldList),
}

impl Payload {
    /// Reject values that have no JSON rendering before anything is written.
    pub(crate) fn validate(&self) -> Result<(), EncodeError> {
        match self {
            Payload::Empty | Payload::Log(_) | Payload::Status(_) | Payload::PeerList(_) => Ok(()),
            Payload::Value(value) => value.validate("data"),
            Payload::Record(fields) => fields.validate("data"),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Empty => serializer.serialize_unit(),
            Payload::Log(record) => record.serialize(serializer),
            Payload::Status(status) => status.serialize(serializer),
            Payload::PeerList(peers) => peers.serialize(serializer),
            Payload::Value(value) => value.serialize(serializer),
            Payload::Record(fields) => fields.serialize(serializer),
        }
    }
}

/// Log line forwarded to consoles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub category: String,
    pub message: String,
}

impl LogRecord {
    /// Record stamped with the current time.
    pub fn new(
        level: impl Into<String>,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.into(),
            category: category.into(),
            message: message.into(),
        }
    }
}

/// RFC 3339 with `Z` suffix and as many fractional digits as the instant needs.
fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Lifecycle of the overlay room this service is hosting or joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Idle,
    Hosting,
    HostOk,
    GuestConnecting,
    GuestOk,
    Error,
}

/// Room status snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStatus {
    pub state: RoomState,
    pub room: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeerKind {
    Host,
    Guest,
    Local,
}

/// One player known to the room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerProfile {
    pub name: String,
    pub machine_id: String,
    pub vendor: String,
    pub kind: PeerKind,
}

/// Value inside an open-shaped payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<FieldValue>),
    Record(FieldList),
}

impl FieldValue {
    fn validate(&self, path: &str) -> Result<(), EncodeError> {
        match self {
            FieldValue::Null | FieldValue::Bool(_) | FieldValue::Int(_) | FieldValue::Str(_) => {
                Ok(())
            }
            FieldValue::Float(f) if !f.is_finite() => Err(EncodeError::NonFiniteNumber {
                field: path.to_string(),
            }),
            FieldValue::Float(_) => Ok(()),
            FieldValue::List(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(idx, item)| item.validate(&format!("{path}[{idx}]"))),
            FieldValue::Record(fields) => fields.validate(path),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::Float(f) => serializer.serialize_f64(*f),
            FieldValue::Str(s) => serializer.serialize_str(s),
            FieldValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Record(fields) => fields.serialize(serializer),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<FieldList> for FieldValue {
    fn from(value: FieldList) -> Self {
        FieldValue::Record(value)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(values: Vec<T>) -> Self {
        FieldValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Ordered field enumeration for open-shaped payloads.
///
/// Fields are emitted exactly in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldList {
    fields: Vec<(String, FieldValue)>,
}

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field (builder style).
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    fn validate(&self, path: &str) -> Result<(), EncodeError> {
        for (idx, (name, value)) in self.fields.iter().enumerate() {
            let field_path = format!("{path}.{name}");
            if self.fields[..idx].iter().any(|(earlier, _)| earlier == name) {
                return Err(EncodeError::DuplicateField { field: field_path });
            }
            value.validate(&field_path)?;
        }
        Ok(())
    }
}

impl Serialize for FieldList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// One outbound application message. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: String,
    payload: Payload,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn log(record: LogRecord) -> Self {
        Self::new(event_types::LOG, Payload::Log(record))
    }

    pub fn status(status: RoomStatus) -> Self {
        Self::new(event_types::STATUS, Payload::Status(status))
    }

    pub fn peer_list(peers: Vec<PeerProfile>) -> Self {
        Self::new(event_types::PEER_LIST, Payload::PeerList(peers))
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}
