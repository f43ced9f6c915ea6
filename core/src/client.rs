//! The public API facade: one method per remote operation.
//!
//! # Design
//! Each operation is split in two. A `build_*` method produces the
//! `HttpRequest` (URL, verb, headers, JSON body) without any I/O, and the
//! operation method hands that request to the `Transport`, runs the response
//! through `classify::process`, and normalizes the outcome:
//!
//! - mutating calls return `Ok(true)` on 2xx and an error otherwise,
//! - accessors return `Ok(Some(body))` on 2xx and `Ok(None)` on 404,
//! - `modify_tag` returns the classified `ApiResponse` as-is.

use std::borrow::Cow;

use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::classify;
use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpRequest};
use crate::transport::{Transport, TransportConfig, UreqTransport};
use crate::types::{ApiResponse, Credentials};

const USER_AGENT: &str = concat!("push-core/", env!("CARGO_PKG_VERSION"));

/// Synchronous client for the push provider's HTTP API.
pub struct PushClient {
    credentials: Credentials,
    base_url: String,
    transport: Box<dyn Transport>,
}

impl std::fmt::Debug for PushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushClient")
            .field("credentials", &self.credentials)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl PushClient {
    /// Client against the provider's default host.
    pub fn new(key: &str, secret: &str) -> Result<Self> {
        Self::with_config(key, secret, TransportConfig::default())
    }

    /// Client using `config` for the base URL and HTTP agent options.
    pub fn with_config(key: &str, secret: &str, config: TransportConfig) -> Result<Self> {
        let transport = UreqTransport::new(&config)?;
        Ok(Self::with_transport(key, secret, &config.base_url, transport))
    }

    /// Client that executes requests through a caller-supplied transport.
    pub fn with_transport(
        key: &str,
        secret: &str,
        base_url: &str,
        transport: impl Transport + 'static,
    ) -> Self {
        Self {
            credentials: Credentials::new(key, secret),
            base_url: base_url.trim_end_matches('/').to_string(),
            transport: Box::new(transport),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // Device tokens
    // -----------------------------------------------------------------------

    /// Register (or update) a device token. A `None` payload, or one that
    /// serializes to `null` or `{}`, sends no body at all. Without a payload
    /// the type needs naming, e.g. `None::<&serde_json::Value>`.
    pub fn register_device_token<T: Serialize + ?Sized>(
        &self,
        token: &str,
        payload: Option<&T>,
    ) -> Result<bool> {
        self.send_bool(self.build_register_device_token(token, payload)?)
    }

    pub fn get_device_token_info(&self, token: &str) -> Result<Option<Value>> {
        self.send_optional(self.build_get_device_token_info(token))
    }

    pub fn delete_device_token(&self, token: &str) -> Result<bool> {
        self.send_bool(self.build_delete_device_token(token))
    }

    pub fn build_register_device_token<T: Serialize + ?Sized>(
        &self,
        token: &str,
        payload: Option<&T>,
    ) -> Result<HttpRequest> {
        let path = format!("/api/device_tokens/{}", segment(token));
        Ok(self.request(HttpMethod::Put, &path, optional_body(payload)?))
    }

    pub fn build_get_device_token_info(&self, token: &str) -> HttpRequest {
        self.request(HttpMethod::Get, &format!("/api/device_tokens/{}", segment(token)), None)
    }

    pub fn build_delete_device_token(&self, token: &str) -> HttpRequest {
        self.request(HttpMethod::Delete, &format!("/api/device_tokens/{}", segment(token)), None)
    }

    // -----------------------------------------------------------------------
    // APIDs
    // -----------------------------------------------------------------------

    /// Register (or update) an APID. Empty payloads send no body.
    pub fn register_apid<T: Serialize + ?Sized>(
        &self,
        apid: &str,
        payload: Option<&T>,
    ) -> Result<bool> {
        self.send_bool(self.build_register_apid(apid, payload)?)
    }

    pub fn get_apid_info(&self, apid: &str) -> Result<Option<Value>> {
        self.send_optional(self.build_get_apid_info(apid))
    }

    pub fn delete_apid(&self, apid: &str) -> Result<bool> {
        self.send_bool(self.build_delete_apid(apid))
    }

    pub fn build_register_apid<T: Serialize + ?Sized>(
        &self,
        apid: &str,
        payload: Option<&T>,
    ) -> Result<HttpRequest> {
        let path = format!("/api/apids/{}", segment(apid));
        Ok(self.request(HttpMethod::Put, &path, optional_body(payload)?))
    }

    pub fn build_get_apid_info(&self, apid: &str) -> HttpRequest {
        self.request(HttpMethod::Get, &format!("/api/apids/{}", segment(apid)), None)
    }

    pub fn build_delete_apid(&self, apid: &str) -> HttpRequest {
        self.request(HttpMethod::Delete, &format!("/api/apids/{}", segment(apid)), None)
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    pub fn push<T: Serialize + ?Sized>(&self, payload: &T) -> Result<bool> {
        self.send_bool(self.build_push(payload)?)
    }

    /// Send several push payloads in one request. Serialized as a JSON array.
    pub fn batch_push<T: Serialize>(&self, payloads: &[T]) -> Result<bool> {
        self.send_bool(self.build_batch_push(payloads)?)
    }

    /// Push to every registered device.
    pub fn broadcast<T: Serialize + ?Sized>(&self, payload: &T) -> Result<bool> {
        self.send_bool(self.build_broadcast(payload)?)
    }

    pub fn build_push<T: Serialize + ?Sized>(&self, payload: &T) -> Result<HttpRequest> {
        Ok(self.request(HttpMethod::Post, "/api/push/", Some(serde_json::to_string(payload)?)))
    }

    pub fn build_batch_push<T: Serialize>(&self, payloads: &[T]) -> Result<HttpRequest> {
        let body = serde_json::to_string(payloads)?;
        Ok(self.request(HttpMethod::Post, "/api/push/batch/", Some(body)))
    }

    pub fn build_broadcast<T: Serialize + ?Sized>(&self, payload: &T) -> Result<HttpRequest> {
        let body = serde_json::to_string(payload)?;
        Ok(self.request(HttpMethod::Post, "/api/push/broadcast/", Some(body)))
    }

    // -----------------------------------------------------------------------
    // Feedback
    // -----------------------------------------------------------------------

    /// Device tokens marked inactive since `since`.
    pub fn feedback(&self, since: OffsetDateTime) -> Result<Option<Value>> {
        self.send_optional(self.build_feedback(since)?)
    }

    /// `since` is normalized to UTC and rendered as RFC 3339 (`...Z`).
    pub fn build_feedback(&self, since: OffsetDateTime) -> Result<HttpRequest> {
        let since = since.to_offset(UtcOffset::UTC).format(&Rfc3339)?;
        let path = format!("/api/device_tokens/feedback/?since={since}");
        Ok(self.request(HttpMethod::Get, &path, None))
    }

    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    pub fn get_tags(&self) -> Result<Option<Value>> {
        self.send_optional(self.build_get_tags())
    }

    /// Add or remove devices from `tag`. Returns the classified response
    /// without boolean normalization.
    pub fn modify_tag<T: Serialize + ?Sized>(&self, tag: &str, payload: &T) -> Result<ApiResponse> {
        self.send(self.build_modify_tag(tag, payload)?)
    }

    pub fn add_tag(&self, tag: &str) -> Result<bool> {
        self.send_bool(self.build_add_tag(tag))
    }

    pub fn remove_tag(&self, tag: &str) -> Result<bool> {
        self.send_bool(self.build_remove_tag(tag))
    }

    pub fn get_device_tags(&self, token: &str) -> Result<Option<Value>> {
        self.send_optional(self.build_get_device_tags(token))
    }

    pub fn add_tag_to_device(&self, token: &str, tag: &str) -> Result<bool> {
        self.send_bool(self.build_add_tag_to_device(token, tag))
    }

    pub fn remove_tag_from_device(&self, token: &str, tag: &str) -> Result<bool> {
        self.send_bool(self.build_remove_tag_from_device(token, tag))
    }

    pub fn build_get_tags(&self) -> HttpRequest {
        self.request(HttpMethod::Get, "/api/tags/", None)
    }

    pub fn build_modify_tag<T: Serialize + ?Sized>(
        &self,
        tag: &str,
        payload: &T,
    ) -> Result<HttpRequest> {
        let body = serde_json::to_string(payload)?;
        Ok(self.request(HttpMethod::Post, &format!("/api/tags/{}", segment(tag)), Some(body)))
    }

    pub fn build_add_tag(&self, tag: &str) -> HttpRequest {
        self.request(HttpMethod::Put, &format!("/api/tags/{}", segment(tag)), None)
    }

    pub fn build_remove_tag(&self, tag: &str) -> HttpRequest {
        self.request(HttpMethod::Delete, &format!("/api/tags/{}", segment(tag)), None)
    }

    pub fn build_get_device_tags(&self, token: &str) -> HttpRequest {
        self.request(HttpMethod::Get, &format!("/api/device_tokens/{}/tags/", segment(token)), None)
    }

    pub fn build_add_tag_to_device(&self, token: &str, tag: &str) -> HttpRequest {
        let path = format!("/api/device_tokens/{}/tags/{}", segment(token), segment(tag));
        self.request(HttpMethod::Put, &path, None)
    }

    pub fn build_remove_tag_from_device(&self, token: &str, tag: &str) -> HttpRequest {
        let path = format!("/api/device_tokens/{}/tags/{}", segment(token), segment(tag));
        self.request(HttpMethod::Delete, &path, None)
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn request(&self, method: HttpMethod, path: &str, body: Option<String>) -> HttpRequest {
        let mut headers = vec![
            (
                "authorization".to_string(),
                self.credentials.authorization_header(),
            ),
            ("accept".to_string(), "application/json".to_string()),
            ("user-agent".to_string(), USER_AGENT.to_string()),
        ];
        if body.is_some() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        HttpRequest {
            method,
            path: format!("{}{path}", self.base_url),
            headers,
            body,
        }
    }

    fn send(&self, request: HttpRequest) -> Result<ApiResponse> {
        let response = self.transport.execute(&request)?;
        classify::process(response)
    }

    fn send_bool(&self, request: HttpRequest) -> Result<bool> {
        self.send(request).map(|response| response.is_success())
    }

    fn send_optional(&self, request: HttpRequest) -> Result<Option<Value>> {
        let path = request.path.clone();
        match self.send(request) {
            Ok(response) => Ok(Some(response.body.into_value())),
            Err(ApiError::NotFound) => {
                tracing::debug!(%path, "resource not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Serialize a registration payload, treating `null` and `{}` as no body.
fn optional_body<T: Serialize + ?Sized>(payload: Option<&T>) -> Result<Option<String>> {
    let Some(payload) = payload else {
        return Ok(None);
    };
    match serde_json::to_value(payload)? {
        Value::Null => Ok(None),
        Value::Object(map) if map.is_empty() => Ok(None),
        value => Ok(Some(serde_json::to_string(&value)?)),
    }
}

/// Percent-encode an identifier so it stays a single path segment.
fn segment(raw: &str) -> Cow<'_, str> {
    urlencoding::encode(raw)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::http::HttpResponse;
    use crate::types::Body;

    /// Records every request and replays canned responses in order.
    #[derive(Clone, Default)]
    struct FakeTransport {
        requests: Arc<Mutex<Vec<HttpRequest>>>,
        responses: Arc<Mutex<VecDeque<HttpResponse>>>,
    }

    impl FakeTransport {
        fn respond(&self, status: u16, body: &str) {
            self.responses.lock().unwrap().push_back(HttpResponse {
                status,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: body.to_string(),
            });
        }

        fn last_request(&self) -> HttpRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl Transport for FakeTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: String::new(),
            }))
        }
    }

    fn client() -> (PushClient, FakeTransport) {
        let fake = FakeTransport::default();
        let client = PushClient::with_transport("key", "secret", "https://push.test/", fake.clone());
        (client, fake)
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let (client, _) = client();
        assert_eq!(client.base_url(), "https://push.test");
        assert_eq!(client.build_get_tags().path, "https://push.test/api/tags/");
    }

    #[test]
    fn every_method_carries_basic_auth() {
        let (client, _) = client();
        let requests = [
            client.build_get_device_token_info("abc"),
            client.build_register_device_token("abc", None::<&Value>).unwrap(),
            client.build_push(&json!({"aps": {"alert": "hi"}})).unwrap(),
            client.build_delete_apid("apid-1"),
        ];
        for req in requests {
            assert_eq!(req.header("Authorization"), Some("Basic a2V5OnNlY3JldA=="), "{}", req.method);
        }
    }

    #[test]
    fn register_with_empty_payload_sends_no_body() {
        let (client, _) = client();
        for payload in [None, Some(&Value::Null), Some(&json!({}))] {
            let req = client.build_register_device_token("abc", payload).unwrap();
            assert_eq!(req.method, HttpMethod::Put);
            assert!(req.body.is_none());
            assert!(req.header("content-type").is_none());
        }
    }

    #[test]
    fn register_with_payload_sends_json() {
        let (client, _) = client();
        let payload = json!({"alias": "user-1", "tags": ["vip"]});
        let req = client.build_register_apid("apid-1", Some(&payload)).unwrap();
        assert_eq!(req.path, "https://push.test/api/apids/apid-1");
        assert_eq!(req.header("content-type"), Some("application/json"));
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, payload);
    }

    #[test]
    fn tag_paths() {
        let (client, _) = client();
        let req = client.build_add_tag("foo");
        assert_eq!((req.method, req.path.as_str()), (HttpMethod::Put, "https://push.test/api/tags/foo"));

        let req = client.build_remove_tag_from_device("abc", "foo");
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.path, "https://push.test/api/device_tokens/abc/tags/foo");

        let req = client.build_get_device_tags("abc");
        assert_eq!(req.path, "https://push.test/api/device_tokens/abc/tags/");
    }

    #[test]
    fn identifiers_are_encoded_as_single_segments() {
        let (client, _) = client();
        assert_eq!(client.build_add_tag("a/b").path, "https://push.test/api/tags/a%2Fb");
        assert_eq!(client.build_add_tag("x?y=1").path, "https://push.test/api/tags/x%3Fy%3D1");
        assert_eq!(client.build_remove_tag("VIP users").path, "https://push.test/api/tags/VIP%20users");
        assert_eq!(
            client.build_remove_tag_from_device("abc", "c#1").path,
            "https://push.test/api/device_tokens/abc/tags/c%231"
        );
        assert_eq!(
            client.build_get_apid_info("11111111-1111-1111-1111-111111111111").path,
            "https://push.test/api/apids/11111111-1111-1111-1111-111111111111"
        );
    }

    #[derive(Serialize)]
    struct Registration<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        alias: Option<&'a str>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tags: Vec<&'a str>,
    }

    #[test]
    fn register_accepts_typed_payload() {
        let (client, _) = client();
        let payload = Registration {
            alias: Some("user-1"),
            tags: vec!["vip"],
        };
        let req = client.build_register_device_token("abc", Some(&payload)).unwrap();
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"alias": "user-1", "tags": ["vip"]}));

        let empty = Registration {
            alias: None,
            tags: Vec::new(),
        };
        let req = client.build_register_apid("apid-1", Some(&empty)).unwrap();
        assert!(req.body.is_none());
    }

    #[test]
    fn feedback_since_is_normalized_to_utc() {
        let (client, _) = client();
        let req = client.build_feedback(datetime!(2021-01-01 00:00:00 -05:00)).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(
            req.path,
            "https://push.test/api/device_tokens/feedback/?since=2021-01-01T05:00:00Z"
        );
    }

    #[test]
    fn batch_push_serializes_array() {
        let (client, _) = client();
        let req = client
            .build_batch_push(&[json!({"device_tokens": ["a"]}), json!({"device_tokens": ["b"]})])
            .unwrap();
        assert_eq!(req.path, "https://push.test/api/push/batch/");
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn mutating_call_returns_true_on_2xx() {
        let (client, fake) = client();
        fake.respond(201, "");
        assert!(client.add_tag("foo").unwrap());
        assert_eq!(fake.last_request().path, "https://push.test/api/tags/foo");
    }

    #[test]
    fn mutating_call_raises_on_non_2xx() {
        let (client, fake) = client();
        fake.respond(400, r#"{"error":"bad"}"#);
        let err = client.push(&json!({})).unwrap_err();
        assert!(matches!(err, ApiError::Client { status: 400, .. }));

        fake.respond(500, "");
        let err = client.broadcast(&json!({})).unwrap_err();
        assert!(matches!(err, ApiError::Server { status: 500, .. }));

        fake.respond(404, "");
        let err = client.delete_device_token("gone").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn accessor_returns_decoded_body() {
        let (client, fake) = client();
        fake.respond(200, r#"{"device_token":"abc","active":true}"#);
        let info = client.get_device_token_info("abc").unwrap();
        assert_eq!(info, Some(json!({"device_token": "abc", "active": true})));
    }

    #[test]
    fn accessor_returns_none_on_404() {
        let (client, fake) = client();
        for _ in 0..5 {
            fake.respond(404, r#"{"error":"not found"}"#);
        }
        assert_eq!(client.get_apid_info("missing").unwrap(), None);
        assert_eq!(client.get_device_token_info("missing").unwrap(), None);
        assert_eq!(client.get_device_tags("missing").unwrap(), None);
        assert_eq!(client.get_tags().unwrap(), None);
        assert_eq!(client.feedback(datetime!(2021-01-01 00:00:00 UTC)).unwrap(), None);
        assert_eq!(fake.requests.lock().unwrap().len(), 5);
    }

    #[test]
    fn accessor_propagates_other_errors() {
        let (client, fake) = client();
        fake.respond(401, "Unauthorized");
        let err = client.get_tags().unwrap_err();
        assert!(matches!(err, ApiError::Client { status: 401, .. }));
    }

    #[test]
    fn modify_tag_returns_raw_response() {
        let (client, fake) = client();
        fake.respond(200, r#"{"ok":true}"#);
        let payload = json!({"device_tokens": {"add": ["abc"]}});
        let response = client.modify_tag("foo", &payload).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Body::Json(json!({"ok": true})));

        let req = fake.last_request();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "https://push.test/api/tags/foo");
    }

    #[test]
    fn transport_errors_pass_through() {
        struct Failing;
        impl Transport for Failing {
            fn execute(&self, _: &HttpRequest) -> Result<HttpResponse> {
                Err(ApiError::Transport("connection refused".into()))
            }
        }
        let client = PushClient::with_transport("k", "s", "http://127.0.0.1:1", Failing);
        assert!(matches!(client.get_tags(), Err(ApiError::Transport(_))));
    }
}
