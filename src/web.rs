use std::collections::HashMap;

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use minijinja::Environment;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::FetchSettings;
use crate::cookies::{parse_cookies_json, string_map, Cookies};
use crate::extract::{self, ExtractionError};
use crate::models::{ErrorResponse, ExtractRequest, ExtractResponse};

const FORM_NOT_FOUND: &str =
    "Thumbnail not found. If page is login-protected, try uploading cookies.json.";

static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.add_template("index.html", include_str!("../templates/index.html"))
        .unwrap();
    env
});

#[derive(Clone)]
pub struct AppState {
    pub fetch: FetchSettings,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(show_form).post(submit_form))
        .route("/api/extract", post(api_extract))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── HTML form ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
struct FormPage {
    thumbnails: Vec<String>,
    error: Option<String>,
    url: String,
    adv_headers: String,
    cookies_uploaded: bool,
}

#[derive(Debug, Default)]
struct FormSubmission {
    url: String,
    headers_json: String,
    cookies_file: Option<Vec<u8>>,
}

async fn show_form() -> Response {
    render_page(&FormPage::default())
}

async fn submit_form(State(state): State<AppState>, multipart: Multipart) -> Response {
    let page = match read_form(multipart).await {
        Ok(form) => process_form(form, &state.fetch).await,
        Err(e) => FormPage {
            error: Some(format!("Error: {}", e)),
            ..Default::default()
        },
    };
    render_page(&page)
}

async fn read_form(mut multipart: Multipart) -> Result<FormSubmission, MultipartError> {
    let mut form = FormSubmission::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "ott_link" => form.url = field.text().await?.trim().to_string(),
            "headers_json" => form.headers_json = field.text().await?.trim().to_string(),
            "cookies" => {
                // Browsers send an empty part with no filename when nothing was chosen.
                let has_file = field.file_name().is_some_and(|n| !n.is_empty());
                let bytes = field.bytes().await?;
                if has_file {
                    form.cookies_file = Some(bytes.to_vec());
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn process_form(form: FormSubmission, settings: &FetchSettings) -> FormPage {
    let mut page = FormPage {
        url: form.url,
        adv_headers: form.headers_json,
        ..Default::default()
    };

    let mut headers = HashMap::new();
    if !page.adv_headers.is_empty() {
        match serde_json::from_str::<Value>(&page.adv_headers)
            .ok()
            .and_then(|v| string_map(&v))
        {
            Some(map) => headers = map,
            None => page.error = Some("Headers JSON invalid.".to_string()),
        }
    }

    let mut cookies = Cookies::new();
    if let Some(raw) = form.cookies_file {
        match parse_cookies_json(&raw) {
            Ok(parsed) => {
                cookies = parsed;
                page.cookies_uploaded = true;
            }
            Err(e) => page.error = Some(format!("Cookies JSON invalid: {}", e)),
        }
    }

    if page.url.is_empty() || page.error.is_some() {
        return page;
    }

    match extract::extract_thumbnails(&page.url, &headers, &cookies, settings).await {
        Ok(thumbnails) if thumbnails.is_empty() => page.error = Some(FORM_NOT_FOUND.to_string()),
        Ok(thumbnails) => page.thumbnails = thumbnails,
        Err(e @ ExtractionError::Upstream(_)) => page.error = Some(e.to_string()),
        Err(e) => {
            tracing::warn!(url = %page.url, error = %e, "form extraction failed");
            page.error = Some(format!("Error: {}", e));
        }
    }
    page
}

fn render_page(page: &FormPage) -> Response {
    let rendered = TEMPLATES
        .get_template("index.html")
        .and_then(|tmpl| tmpl.render(page));
    match rendered {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render form");
            (StatusCode::INTERNAL_SERVER_ERROR, "template error").into_response()
        }
    }
}

// ── JSON API ─────────────────────────────────────────────────────────────────

async fn api_extract(
    State(state): State<AppState>,
    payload: Result<Json<ExtractRequest>, JsonRejection>,
) -> Response {
    let ExtractRequest { url, headers, cookies } = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return api_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let url = url.unwrap_or_default();
    let url = url.trim();
    if url.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "Missing 'url'");
    }

    let result = extract::extract_thumbnails(
        url,
        &headers.unwrap_or_default(),
        &cookies.unwrap_or_default(),
        &state.fetch,
    )
    .await;

    match result {
        Ok(thumbnails) if thumbnails.is_empty() => {
            api_error(StatusCode::NOT_FOUND, "No thumbnails found")
        }
        Ok(thumbnails) => (StatusCode::OK, Json(ExtractResponse::new(thumbnails))).into_response(),
        Err(e) => {
            let status = match &e {
                ExtractionError::InvalidUrl(_) | ExtractionError::InvalidHeader(_) => {
                    StatusCode::BAD_REQUEST
                }
                ExtractionError::Upstream(_) | ExtractionError::Request(_) => StatusCode::BAD_GATEWAY,
            };
            tracing::warn!(%url, error = %e, "api extraction failed");
            api_error(status, e.to_string())
        }
    }
}

fn api_error(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(error))).into_response()
}
