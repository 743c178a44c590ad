use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExtractRequest {
    pub url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub cookies: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub ok: bool,
    pub count: usize,
    pub thumbnails: Vec<String>,
}

impl ExtractResponse {
    pub fn new(thumbnails: Vec<String>) -> Self {
        Self {
            ok: true,
            count: thumbnails.len(),
            thumbnails,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }
}
