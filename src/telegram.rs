//! Telegram front end.
//!
//! Long-polls the Bot API with `getUpdates` and answers each chat directly.
//! Cookies uploaded as a `cookies.json` document are kept in memory per chat
//! and applied to every later extraction from that chat.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::FetchSettings;
use crate::cookies::{parse_cookies_json, CookieError, Cookies};
use crate::extract;

const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

const GREETING: &str = "👋 Namaste! Send an OTT episode URL and I'll return the thumbnail. Send cookies.json first for login pages.";
const COOKIES_CLEARED: &str = "✅ Cookies cleared for this chat.";
const COOKIES_SAVED: &str = "✅ Cookies saved for this chat. Now send an episode URL.";
const COOKIES_INVALID: &str = "❌ Invalid cookies JSON.";
const NOT_JSON_FILE: &str = "Please send a JSON file (cookies.json).";
const NOT_A_URL: &str = "Please send a direct episode/page URL.";
const NOT_FOUND: &str = "❌ Thumbnail not found. If login page, send cookies.json first.";
const PHOTO_CAPTION: &str = "✅ Thumbnail";

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(reqwest::Error),
    #[error("telegram API error: {0}")]
    Api(String),
}

// Every Bot API URL carries the token, so it never reaches a message or log.
impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        TelegramError::Http(e.without_url())
    }
}

// ── Bot API types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct File {
    file_path: Option<String>,
}

// ── Bot ──────────────────────────────────────────────────────────────────────

pub struct TelegramBot {
    client: reqwest::Client,
    api_base: String,
    token: String,
    fetch: FetchSettings,
    chat_cookies: Mutex<HashMap<i64, Cookies>>,
}

impl TelegramBot {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        fetch: FetchSettings,
    ) -> Result<Self, TelegramError> {
        // Must outlive the long-poll window.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            token: token.into(),
            fetch,
            chat_cookies: Mutex::new(HashMap::new()),
        })
    }

    /// Polls forever. Returns only if the bot cannot start.
    pub async fn run(self) {
        let dropped = self
            .call::<Value>("deleteWebhook", &json!({"drop_pending_updates": true}))
            .await;
        if let Err(e) = dropped {
            tracing::error!(error = %e, "bot failed to start");
            return;
        }
        tracing::info!("telegram bot connected, polling started");

        let mut offset = 0;
        loop {
            match self.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = update.update_id + 1;
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "getUpdates failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    pub async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let chat_id = message.chat.id;

        let result = if let Some(document) = message.document {
            self.handle_document(chat_id, document).await
        } else if let Some(text) = message.text {
            self.handle_text(chat_id, text.trim()).await
        } else {
            Ok(())
        };

        if let Err(e) = result {
            tracing::warn!(chat_id, error = %e, "failed to answer chat");
        }
    }

    async fn handle_text(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        if let Some(command) = text.strip_prefix('/') {
            // "/start@SomeBot args" -> "start"
            let name = command
                .split_whitespace()
                .next()
                .and_then(|c| c.split('@').next())
                .unwrap_or_default();
            return match name {
                "start" => self.send_message(chat_id, GREETING).await,
                "clearcookies" => {
                    self.chat_cookies.lock().await.remove(&chat_id);
                    self.send_message(chat_id, COOKIES_CLEARED).await
                }
                _ => Ok(()),
            };
        }

        if !(text.starts_with("http://") || text.starts_with("https://")) {
            return self.send_message(chat_id, NOT_A_URL).await;
        }

        let cookies = self
            .chat_cookies
            .lock()
            .await
            .get(&chat_id)
            .cloned()
            .unwrap_or_default();

        let thumbnails =
            match extract::extract_thumbnails(text, &HashMap::new(), &cookies, &self.fetch).await {
                Ok(thumbnails) => thumbnails,
                Err(e) => return self.send_message(chat_id, &format!("❌ Error: {}", e)).await,
            };

        let Some((first, rest)) = thumbnails.split_first() else {
            return self.send_message(chat_id, NOT_FOUND).await;
        };

        if let Err(e) = self.send_photo(chat_id, first, PHOTO_CAPTION).await {
            tracing::debug!(chat_id, error = %e, "sendPhoto rejected, falling back to text");
            self.send_message(chat_id, &format!("✅ Thumbnail: {}", first))
                .await?;
        }

        if !rest.is_empty() {
            self.send_message(chat_id, &format!("More:\n{}", rest.join("\n")))
                .await?;
        }
        Ok(())
    }

    async fn handle_document(&self, chat_id: i64, document: Document) -> Result<(), TelegramError> {
        let is_json = document
            .file_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().ends_with(".json"));
        if !is_json {
            return self.send_message(chat_id, NOT_JSON_FILE).await;
        }

        let bytes = match self.download_file(&document.file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .send_message(chat_id, &format!("❌ Failed to parse cookies: {}", e))
                    .await
            }
        };
        let content = String::from_utf8_lossy(&bytes);

        match parse_cookies_json(content.as_bytes()) {
            Ok(cookies) if !cookies.is_empty() => {
                tracing::info!(chat_id, count = cookies.len(), "stored chat cookies");
                self.chat_cookies.lock().await.insert(chat_id, cookies);
                self.send_message(chat_id, COOKIES_SAVED).await
            }
            Ok(_) | Err(CookieError::Unsupported) => {
                self.send_message(chat_id, COOKIES_INVALID).await
            }
            Err(e) => {
                self.send_message(chat_id, &format!("❌ Failed to parse cookies: {}", e))
                    .await
            }
        }
    }

    // ── Bot API calls ────────────────────────────────────────────────────────

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        self.call::<Value>("sendMessage", &json!({"chat_id": chat_id, "text": text}))
            .await
            .map(|_| ())
    }

    async fn send_photo(&self, chat_id: i64, photo: &str, caption: &str) -> Result<(), TelegramError> {
        self.call::<Value>(
            "sendPhoto",
            &json!({"chat_id": chat_id, "photo": photo, "caption": caption}),
        )
        .await
        .map(|_| ())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TelegramError> {
        let file: File = self.call("getFile", &json!({"file_id": file_id})).await?;
        let file_path = file
            .file_path
            .ok_or_else(|| TelegramError::Api("file is not available for download".to_string()))?;
        let url = format!("{}/file/bot{}/{}", self.api_base, self.token, file_path);
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, TelegramError> {
        let url = format!("{}/bot{}/{}", self.api_base, self.token, method);
        let response: ApiResponse<T> = self.client.post(url).json(body).send().await?.json().await?;
        if !response.ok {
            return Err(TelegramError::Api(
                response
                    .description
                    .unwrap_or_else(|| format!("{} failed", method)),
            ));
        }
        response
            .result
            .ok_or_else(|| TelegramError::Api(format!("{} returned no result", method)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:abc";
    const CHAT: i64 = 4242;

    fn bot(server: &MockServer) -> TelegramBot {
        TelegramBot::new(server.uri(), TOKEN, FetchSettings::default()).unwrap()
    }

    fn api_path(method: &str) -> String {
        format!("/bot{}/{}", TOKEN, method)
    }

    fn ok_result(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": result}))
    }

    async fn expect_message(server: &MockServer, text: &str) {
        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .and(body_partial_json(json!({"chat_id": CHAT, "text": text})))
            .respond_with(ok_result(json!({"message_id": 1})))
            .expect(1)
            .mount(server)
            .await;
    }

    fn text_update(text: &str) -> Update {
        serde_json::from_value(json!({
            "update_id": 10,
            "message": {"message_id": 1, "chat": {"id": CHAT, "type": "private"}, "text": text}
        }))
        .unwrap()
    }

    fn document_update(file_name: &str) -> Update {
        serde_json::from_value(json!({
            "update_id": 11,
            "message": {
                "message_id": 2,
                "chat": {"id": CHAT, "type": "private"},
                "document": {"file_id": "doc-1", "file_unique_id": "u1", "file_name": file_name}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn start_command_greets() {
        let server = MockServer::start().await;
        expect_message(&server, GREETING).await;
        bot(&server).handle_update(text_update("/start")).await;
    }

    #[tokio::test]
    async fn clearcookies_with_bot_suffix_forgets_chat() {
        let server = MockServer::start().await;
        expect_message(&server, COOKIES_CLEARED).await;

        let bot = bot(&server);
        bot.chat_cookies
            .lock()
            .await
            .insert(CHAT, Cookies::from([("a".to_string(), "b".to_string())]));
        bot.handle_update(text_update("/clearcookies@ThumbBot")).await;
        assert!(bot.chat_cookies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn plain_text_asks_for_url() {
        let server = MockServer::start().await;
        expect_message(&server, NOT_A_URL).await;
        bot(&server).handle_update(text_update("hello there")).await;
    }

    #[tokio::test]
    async fn non_json_document_is_refused() {
        let server = MockServer::start().await;
        expect_message(&server, NOT_JSON_FILE).await;
        bot(&server).handle_update(document_update("cookies.txt")).await;
    }

    #[tokio::test]
    async fn json_document_stores_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(api_path("getFile")))
            .respond_with(ok_result(json!({"file_id": "doc-1", "file_path": "documents/file_1.json"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/file/bot{}/documents/file_1.json", TOKEN)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"name": "sessionUserUP", "value": "tok", "domain": ".hotstar.com"}]"#),
            )
            .mount(&server)
            .await;
        expect_message(&server, COOKIES_SAVED).await;

        let bot = bot(&server);
        bot.handle_update(document_update("Cookies.JSON")).await;
        let stored = bot.chat_cookies.lock().await;
        assert_eq!(stored[&CHAT]["sessionUserUP"], "tok");
    }

    #[tokio::test]
    async fn empty_cookie_list_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(api_path("getFile")))
            .respond_with(ok_result(json!({"file_id": "doc-1", "file_path": "documents/empty.json"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/file/bot{}/documents/empty.json", TOKEN)))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;
        expect_message(&server, COOKIES_INVALID).await;

        let bot = bot(&server);
        bot.handle_update(document_update("cookies.json")).await;
        assert!(bot.chat_cookies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn url_falls_back_to_text_when_photo_is_rejected() {
        let first = "https://v3img.voot.com/v3Storage/assets/ep1.jpg";
        let second = "https://v3img.voot.com/v3Storage/assets/ep1_portrait.jpg";

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/episode"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"<img src="{}"><img src="{}">"#, first, second)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(api_path("sendPhoto")))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"ok": false, "description": "Bad Request: wrong file identifier"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        expect_message(&server, &format!("✅ Thumbnail: {}", first)).await;
        expect_message(&server, &format!("More:\n{}", second)).await;

        bot(&server)
            .handle_update(text_update(&format!("{}/episode", server.uri())))
            .await;
    }

    #[tokio::test]
    async fn url_without_thumbnails_reports_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/episode"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;
        expect_message(&server, NOT_FOUND).await;

        bot(&server)
            .handle_update(text_update(&format!("{}/episode", server.uri())))
            .await;
    }

    #[tokio::test]
    async fn get_updates_parses_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(api_path("getUpdates")))
            .and(body_partial_json(json!({"offset": 5, "timeout": POLL_TIMEOUT_SECS})))
            .respond_with(ok_result(json!([
                {"update_id": 5, "message": {"message_id": 1, "chat": {"id": CHAT}, "text": "/start"}},
                {"update_id": 6, "edited_message": {"message_id": 1, "chat": {"id": CHAT}}}
            ])))
            .mount(&server)
            .await;

        let updates = bot(&server).get_updates(5).await.unwrap();
        assert_eq!(updates.len(), 2);
        assert!(updates[0].message.is_some());
        assert!(updates[1].message.is_none());
    }

    #[tokio::test]
    async fn api_errors_carry_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"ok": false, "description": "Forbidden: bot was blocked by the user"})),
            )
            .mount(&server)
            .await;

        let err = bot(&server).send_message(CHAT, "hi").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "telegram API error: Forbidden: bot was blocked by the user"
        );
    }

    async fn accept_messages(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .respond_with(ok_result(json!({"message_id": 1})))
            .mount(server)
            .await;
    }

    async fn sent_texts(server: &MockServer) -> Vec<String> {
        let send_message = api_path("sendMessage");
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|req| req.url.path() == send_message)
            .filter_map(|req| {
                let body: Value = serde_json::from_slice(&req.body).ok()?;
                body["text"].as_str().map(str::to_string)
            })
            .collect()
    }

    async fn serve_document(server: &MockServer, file_path: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(api_path("getFile")))
            .respond_with(ok_result(json!({"file_id": "doc-1", "file_path": file_path})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/file/bot{}/{}", TOKEN, file_path)))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn failed_download_does_not_reveal_token() {
        let server = MockServer::start().await;
        serve_document(&server, "documents/gone.json", ResponseTemplate::new(404)).await;
        accept_messages(&server).await;

        bot(&server).handle_update(document_update("cookies.json")).await;

        let texts = sent_texts(&server).await;
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("❌ Failed to parse cookies: "));
        assert!(!texts[0].contains(TOKEN), "token leaked: {}", texts[0]);
        assert!(!texts[0].contains("/file/bot"));
    }

    #[tokio::test]
    async fn malformed_cookie_file_reports_parse_error() {
        let server = MockServer::start().await;
        serve_document(
            &server,
            "documents/broken.json",
            ResponseTemplate::new(200).set_body_string("{broken"),
        )
        .await;
        accept_messages(&server).await;

        let bot = bot(&server);
        bot.handle_update(document_update("cookies.json")).await;

        let texts = sent_texts(&server).await;
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("❌ Failed to parse cookies: "));
        assert!(bot.chat_cookies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn run_stops_when_webhook_cannot_be_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(api_path("deleteWebhook")))
            .and(body_partial_json(json!({"drop_pending_updates": true})))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"ok": false, "description": "Unauthorized"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(api_path("getUpdates")))
            .respond_with(ok_result(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        tokio::time::timeout(Duration::from_secs(5), bot(&server).run())
            .await
            .expect("run should return when startup fails");
    }

    #[tokio::test]
    async fn url_sends_photo_with_caption() {
        let thumb = "https://images.dangalplay.com/shows/ep7.jpg";

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/episode"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(r#"<img src="{}">"#, thumb)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(api_path("sendPhoto")))
            .and(body_partial_json(json!({"chat_id": CHAT, "photo": thumb, "caption": PHOTO_CAPTION})))
            .respond_with(ok_result(json!({"message_id": 3})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .respond_with(ok_result(json!({"message_id": 1})))
            .expect(0)
            .mount(&server)
            .await;

        bot(&server)
            .handle_update(text_update(&format!("{}/episode", server.uri())))
            .await;
    }

    #[tokio::test]
    async fn url_reports_extraction_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/episode"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        expect_message(&server, "❌ Error: HTTP error: 403 Forbidden").await;

        bot(&server)
            .handle_update(text_update(&format!("{}/episode", server.uri())))
            .await;
    }
}
