use std::collections::HashMap;

use serde_json::Value;

/// Cookie name to value.
pub type Cookies = HashMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a list of cookies or a name/value object")]
    Unsupported,
}

/// Parses an uploaded `cookies.json`.
///
/// Accepts either a browser-extension export (a list of objects carrying at
/// least `name` and `value`) or a flat `{"name": "value"}` object. Entries of
/// an export without both keys are skipped.
pub fn parse_cookies_json(bytes: &[u8]) -> Result<Cookies, CookieError> {
    let value: Value = serde_json::from_slice(bytes)?;
    match value {
        Value::Array(entries) => Ok(entries
            .iter()
            .filter_map(|entry| {
                let name = entry.get("name")?;
                let value = entry.get("value")?;
                Some((scalar_text(name), scalar_text(value)))
            })
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(name, value)| (name.clone(), scalar_text(value)))
            .collect()),
        _ => Err(CookieError::Unsupported),
    }
}

/// Converts a JSON object of header overrides into a string map.
pub fn string_map(value: &Value) -> Option<HashMap<String, String>> {
    value.as_object().map(|map| {
        map.iter()
            .map(|(k, v)| (k.clone(), scalar_text(v)))
            .collect()
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
