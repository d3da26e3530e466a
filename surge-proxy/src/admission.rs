//! Reading scheduling fields out of an inbound request body.

use axum::http::{header, HeaderMap};
use serde_json::{Map, Value};
use surge_core::{key_to_string, BundleTag, UnitMeta};

use crate::config::ProxyConfig;
use crate::error::ProxyError;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Decode an inbound body into JSON.
///
/// Form-encoded bodies become an object of string values, with repeated keys
/// collected into an array. Anything else must be JSON. An empty body is `None`.
pub fn decode_body(headers: &HeaderMap, body: &[u8]) -> Result<Option<Value>, ProxyError> {
    if body.is_empty() {
        return Ok(None);
    }
    if is_form(headers) {
        return Ok(Some(decode_form(body)));
    }
    serde_json::from_slice(body).map(Some).map_err(|e| {
        ProxyError::InvalidRequest(format!("request body is not valid JSON: {}", e))
    })
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_URLENCODED))
}

fn decode_form(body: &[u8]) -> Value {
    let mut object = Map::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        let value = Value::String(value.into_owned());
        match object.get_mut(&*key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                object.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(object)
}

/// Scheduling fields carried by one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionFields {
    pub meta: UnitMeta,
    pub bundle: Option<BundleTag>,
}

impl AdmissionFields {
    /// Extract the configured fields from `body`.
    ///
    /// Absent fields stay `None`; whether they were required is decided by the
    /// scheduler. A field that is present with the wrong type is rejected here.
    /// Numeric fields also accept numeric strings, which is all a form can carry.
    pub fn extract(body: Option<&Value>, config: &ProxyConfig) -> Result<Self, ProxyError> {
        let Some(body) = body else {
            return Ok(Self::default());
        };

        let mut meta = UnitMeta::default();
        if config.priority.enabled {
            meta.priority = optional(body, &config.priority.field, as_f64, "a number")?;
            if let Some(lookup) = &config.priority.lookup {
                meta.lookup_key =
                    optional(body, &lookup.request_field, key_to_string, "a string or number")?;
            }
        }

        let bundle_key =
            optional(body, &config.bundle.id_field, key_to_string, "a string or number")?;
        let bundle = match bundle_key {
            Some(key) => {
                let size_field = &config.bundle.size_field;
                let size = optional(body, size_field, as_u64, "a non-negative integer")?
                    .ok_or_else(|| {
                        ProxyError::InvalidRequest(format!(
                            "bundle member is missing '{}'",
                            size_field
                        ))
                    })?;
                let order = optional(body, &config.bundle.order_field, as_i64, "an integer")?;
                Some(BundleTag::new(key, order, size as usize))
            }
            None => None,
        };

        Ok(Self { meta, bundle })
    }
}

/// Read `field` with `convert`; a present value that fails to convert is an error
fn optional<T>(
    body: &Value,
    field: &str,
    convert: impl Fn(&Value) -> Option<T>,
    expected: &str,
) -> Result<Option<T>, ProxyError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => convert(value).map(Some).ok_or_else(|| {
            ProxyError::InvalidRequest(format!("field '{}' must be {}", field, expected))
        }),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        other => other.as_f64(),
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_u64(),
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_i64(),
    }
}
