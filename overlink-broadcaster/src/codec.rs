//! Envelope codec: `{"type":"<type>","data":<data>}`, UTF-8, no BOM.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::EncodeError;
use crate::events::{Event, Payload};

/// An encoded envelope, shared by every recipient of one broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Arc<str>);

impl Frame {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self(Arc::from(text))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    data: &'a Payload,
}

/// Encode one envelope. Never touches caller data.
pub fn encode(event_type: &str, payload: &Payload) -> Result<Frame, EncodeError> {
    if event_type.is_empty() {
        return Err(EncodeError::EmptyEventType);
    }
    payload.validate()?;

    let json = serde_json::to_string(&Envelope {
        event_type,
        data: payload,
    })?;
    Ok(Frame::from(json))
}

pub fn encode_event(event: &Event) -> Result<Frame, EncodeError> {
    encode(event.event_type(), event.payload())
}
