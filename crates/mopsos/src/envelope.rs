// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! CloudEvents envelope decoding.
//!
//! Supports the two single-event HTTP bindings:
//!
//! | Mode | Detection | Attributes | Data |
//! |------|-----------|------------|------|
//! | Structured | `Content-Type: application/cloudevents+json` | JSON body members | `data` or `data_base64` |
//! | Binary | `ce-specversion` header present | `ce-*` headers | request body |
//!
//! Batch mode (`application/cloudevents-batch+json`) is rejected. Only `specversion`
//! is mandatory; the other context attributes default to empty strings.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

const STRUCTURED_PREFIX: &str = "application/cloudevents";
const BATCH_PREFIX: &str = "application/cloudevents-batch";
const HEADER_PREFIX: &str = "ce-";

/// Supported CloudEvents specification versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVersion {
    /// CloudEvents 0.3
    V03,
    /// CloudEvents 1.0
    V10,
}

impl SpecVersion {
    /// Parse the `specversion` attribute.
    pub fn parse(value: &str) -> Result<Self, EnvelopeError> {
        match value {
            "1.0" => Ok(Self::V10),
            "0.3" => Ok(Self::V03),
            other => Err(EnvelopeError::UnsupportedSpecVersion(other.to_string())),
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V03 => "0.3",
            Self::V10 => "1.0",
        }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while turning an HTTP request into an [`Envelope`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvelopeError {
    /// Neither a structured content type nor binary `ce-*` headers were found.
    #[error("request is not a CloudEvent (unknown encoding)")]
    UnknownEncoding,

    /// Batched events are not accepted.
    #[error("batch mode is not supported")]
    BatchUnsupported,

    /// `specversion` is absent.
    #[error("missing specversion")]
    MissingSpecVersion,

    /// `specversion` is not 1.0 or 0.3.
    #[error("unsupported specversion '{0}'")]
    UnsupportedSpecVersion(String),

    /// Structured body is not a JSON object.
    #[error("invalid JSON envelope: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A context attribute has the wrong shape.
    #[error("invalid attribute '{name}': {reason}")]
    InvalidAttribute {
        /// Attribute name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// `data_base64` is not valid base64.
    #[error("invalid data_base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Errors raised while projecting envelope data into a typed value.
#[derive(Debug, Error)]
pub enum DataError {
    /// The data content type is not JSON.
    #[error("unsupported data content type '{0}'")]
    UnsupportedContentType(String),

    /// The data is not valid JSON for the target type.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A decoded CloudEvent.
///
/// Context attributes are read-only once decoded. Extensions may still be set,
/// which is how trace context is attached to an incoming event.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    id: String,
    source: String,
    ty: String,
    spec_version: SpecVersion,
    data_content_type: Option<String>,
    data_schema: Option<String>,
    subject: Option<String>,
    time: Option<DateTime<Utc>>,
    data: Option<Vec<u8>>,
    extensions: BTreeMap<String, String>,
}

impl Envelope {
    /// Create a CloudEvents 1.0 envelope without data.
    pub fn new(id: impl Into<String>, source: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            ty: ty.into(),
            spec_version: SpecVersion::V10,
            data_content_type: None,
            data_schema: None,
            subject: None,
            time: None,
            data: None,
            extensions: BTreeMap::new(),
        }
    }

    /// Attach data with its content type.
    pub fn with_data(mut self, content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.data_content_type = Some(content_type.into());
        self.data = Some(data.into());
        self
    }

    /// Attach an extension attribute.
    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(name.into(), value.into());
        self
    }

    /// Decode a CloudEvent from HTTP request headers and body.
    pub fn from_http(headers: &HeaderMap, body: &[u8]) -> Result<Self, EnvelopeError> {
        let content_type = header_str(headers, CONTENT_TYPE.as_str())?;
        let media_type = content_type
            .map(|ct| media_type(ct).to_ascii_lowercase())
            .unwrap_or_default();

        if media_type.starts_with(BATCH_PREFIX) {
            return Err(EnvelopeError::BatchUnsupported);
        }
        if media_type.starts_with(STRUCTURED_PREFIX) {
            return Self::from_structured(body);
        }
        if headers.contains_key("ce-specversion") {
            return Self::from_binary(headers, content_type, body);
        }
        Err(EnvelopeError::UnknownEncoding)
    }

    /// Decode the structured JSON representation.
    pub fn from_structured(body: &[u8]) -> Result<Self, EnvelopeError> {
        let mut members: Map<String, Value> = serde_json::from_slice(body)?;

        let spec_version = match members.remove("specversion") {
            Some(Value::String(v)) => SpecVersion::parse(&v)?,
            Some(_) => {
                return Err(EnvelopeError::InvalidAttribute {
                    name: "specversion".to_string(),
                    reason: "must be a string",
                });
            }
            None => return Err(EnvelopeError::MissingSpecVersion),
        };

        let mut envelope = Self::new(
            take_string(&mut members, "id")?.unwrap_or_default(),
            take_string(&mut members, "source")?.unwrap_or_default(),
            take_string(&mut members, "type")?.unwrap_or_default(),
        );
        envelope.spec_version = spec_version;
        envelope.data_content_type = take_string(&mut members, "datacontenttype")?;
        envelope.subject = take_string(&mut members, "subject")?;
        envelope.data_schema = match spec_version {
            SpecVersion::V10 => take_string(&mut members, "dataschema")?,
            SpecVersion::V03 => take_string(&mut members, "schemaurl")?,
        };
        envelope.time = take_string(&mut members, "time")?
            .map(|t| parse_time(&t))
            .transpose()?;

        let encoding = match spec_version {
            SpecVersion::V03 => take_string(&mut members, "datacontentencoding")?,
            SpecVersion::V10 => None,
        };
        let data = members.remove("data");
        let data_base64 = members.remove("data_base64");

        envelope.data = match (data, data_base64) {
            (Some(_), Some(_)) => {
                return Err(EnvelopeError::InvalidAttribute {
                    name: "data".to_string(),
                    reason: "data and data_base64 are mutually exclusive",
                });
            }
            (None, Some(Value::String(encoded))) => Some(BASE64.decode(encoded)?),
            (None, Some(_)) => {
                return Err(EnvelopeError::InvalidAttribute {
                    name: "data_base64".to_string(),
                    reason: "must be a string",
                });
            }
            (Some(Value::String(encoded)), None)
                if encoding.as_deref().is_some_and(|e| e.eq_ignore_ascii_case("base64")) =>
            {
                Some(BASE64.decode(encoded)?)
            }
            (Some(Value::Null), None) | (None, None) => None,
            (Some(value), None) => Some(encode_data(envelope.data_content_type.as_deref(), value)?),
        };

        for (name, value) in members {
            let value = match value {
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Null => continue,
                _ => {
                    return Err(EnvelopeError::InvalidAttribute {
                        name,
                        reason: "extension values must be scalars",
                    });
                }
            };
            envelope.extensions.insert(name, value);
        }

        Ok(envelope)
    }

    /// Decode the binary representation: attributes in `ce-*` headers, data in the body.
    pub fn from_binary(
        headers: &HeaderMap,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Self, EnvelopeError> {
        let spec_version = header_str(headers, "ce-specversion")?
            .ok_or(EnvelopeError::MissingSpecVersion)
            .and_then(SpecVersion::parse)?;

        let mut envelope = Self::new("", "", "");
        envelope.spec_version = spec_version;
        envelope.data_content_type = content_type.map(str::to_string);

        for (name, value) in headers {
            let Some(attribute) = name.as_str().strip_prefix(HEADER_PREFIX) else {
                continue;
            };
            let value = value
                .to_str()
                .map_err(|_| EnvelopeError::InvalidAttribute {
                    name: attribute.to_string(),
                    reason: "header value is not visible ASCII",
                })?
                .to_string();

            match attribute {
                "specversion" => {}
                "id" => envelope.id = value,
                "source" => envelope.source = value,
                "type" => envelope.ty = value,
                "subject" => envelope.subject = Some(value),
                "dataschema" | "schemaurl" => envelope.data_schema = Some(value),
                "time" => envelope.time = Some(parse_time(&value)?),
                _ => {
                    envelope.extensions.insert(attribute.to_string(), value);
                }
            }
        }

        if !body.is_empty() {
            envelope.data = Some(body.to_vec());
        }

        Ok(envelope)
    }

    /// Event identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Event source URI reference.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Event type.
    pub fn ty(&self) -> &str {
        &self.ty
    }

    /// CloudEvents specification version.
    pub fn spec_version(&self) -> SpecVersion {
        self.spec_version
    }

    /// Content type of the data, if declared.
    pub fn data_content_type(&self) -> Option<&str> {
        self.data_content_type.as_deref()
    }

    /// Schema the data adheres to, if declared.
    pub fn data_schema(&self) -> Option<&str> {
        self.data_schema.as_deref()
    }

    /// Event subject, if declared.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Event timestamp, if declared.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    /// Raw data bytes.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Extension attribute by name.
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions.get(name).map(String::as_str)
    }

    /// All extension attributes.
    pub fn extensions(&self) -> &BTreeMap<String, String> {
        &self.extensions
    }

    /// Set or replace an extension attribute.
    pub fn set_extension(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extensions.insert(name.into(), value.into());
    }

    /// Deserialize the data as JSON.
    ///
    /// Returns `Ok(None)` when the event carries no data. Fails when the declared
    /// content type is not JSON.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, DataError> {
        if let Some(ct) = self.data_content_type()
            && !is_json_content_type(ct)
        {
            return Err(DataError::UnsupportedContentType(ct.to_string()));
        }
        match self.data() {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        }
    }
}

/// Whether a content type is decoded as JSON: `application/json`, `text/json`
/// and any `*/*+json` suffix type.
pub fn is_json_content_type(content_type: &str) -> bool {
    let media = media_type(content_type).to_ascii_lowercase();
    media == "application/json" || media == "text/json" || media.ends_with("+json")
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, EnvelopeError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str().map_err(|_| EnvelopeError::InvalidAttribute {
                name: name.to_string(),
                reason: "header value is not visible ASCII",
            })
        })
        .transpose()
}

fn take_string(members: &mut Map<String, Value>, name: &str) -> Result<Option<String>, EnvelopeError> {
    match members.remove(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(EnvelopeError::InvalidAttribute {
            name: name.to_string(),
            reason: "must be a string",
        }),
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, EnvelopeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| EnvelopeError::InvalidAttribute {
            name: "time".to_string(),
            reason: "must be an RFC 3339 timestamp",
        })
}

// JSON data is kept as its JSON encoding; a string under a non-JSON content type
// is kept as the raw text.
fn encode_data(content_type: Option<&str>, value: Value) -> Result<Vec<u8>, EnvelopeError> {
    match value {
        Value::String(text) if content_type.is_some_and(|ct| !is_json_content_type(ct)) => {
            Ok(text.into_bytes())
        }
        value => Ok(serde_json::to_vec(&value)?),
    }
}
