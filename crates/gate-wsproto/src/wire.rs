//! Object framing shared by `graphql-transport-ws` and `graphql-ws`.

use serde::{Deserialize, Serialize};
use serde_json::value::{RawValue, to_raw_value};
use serde_json::{Map, Value};

use crate::errors::Result;

/// `{"id": ..., "type": ..., "payload": ...}` with `id` and `payload`
/// omitted when absent. Field order is part of the wire format.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ObjectMessage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

impl ObjectMessage {
    pub(crate) fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            ..Self::default()
        }
    }

    pub(crate) fn with_id(kind: &str, id: &str) -> Self {
        Self {
            id: id.to_owned(),
            kind: kind.to_owned(),
            payload: None,
        }
    }

    pub(crate) fn payload(mut self, payload: Box<RawValue>) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// `data` with `extensions` merged in as a top-level key. `data` must be a
/// JSON object when extensions are present.
pub(crate) fn merge_extensions(data: &RawValue, extensions: Option<&RawValue>) -> Result<Box<RawValue>> {
    let Some(extensions) = extensions else {
        return Ok(data.to_owned());
    };
    let mut object: Map<String, Value> = serde_json::from_str(data.get())?;
    let _ = object.insert("extensions".to_owned(), serde_json::from_str(extensions.get())?);
    Ok(to_raw_value(&object)?)
}

#[derive(Serialize)]
struct ErrorsPayload<'a> {
    errors: &'a RawValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<&'a RawValue>,
}

/// `{"errors": errors, "extensions": extensions}`.
pub(crate) fn errors_payload(errors: &RawValue, extensions: Option<&RawValue>) -> Result<Box<RawValue>> {
    Ok(to_raw_value(&ErrorsPayload { errors, extensions })?)
}
