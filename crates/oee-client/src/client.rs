//! Authenticated REST client
//!
//! Provides [`ApiClient`], which:
//! - re-reads the bearer token from durable storage before every call
//! - classifies failures into [`ApiError`]
//! - on a 401 from a non-ignored path, clears the token, fires the
//!   [`AuthFailureBroadcaster`] and redirects to the login surface

use crate::error::ApiError;
use crate::storage::{TokenStorage, TOKEN_KEY};
use crate::transport::{HttpRequest, Method, Transport};
use oee_lifecycle::AuthFailureBroadcaster;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Moves the user to the login surface
pub trait Navigator: Send + Sync {
    /// Whether the login surface is already showing
    fn is_on_login(&self) -> bool;

    /// Fire-and-forget redirect
    fn redirect_to_login(&self);
}

/// Navigator for headless use: never on login, redirect is only logged
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn is_on_login(&self) -> bool {
        false
    }

    fn redirect_to_login(&self) {
        tracing::warn!("session invalidated; login required");
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL all paths are joined onto
    pub base_url: String,
    /// Path substrings whose 401 responses must not log the user out
    pub auth_ignore_paths: Vec<String>,
    /// Storage key for the bearer token
    pub token_key: String,
}

impl ClientConfig {
    /// Configuration with default ignore-list and token key
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_ignore_paths: vec!["/auth/login".to_string()],
            token_key: TOKEN_KEY.to_string(),
        }
    }

    /// Replace the 401 ignore-list
    #[inline]
    #[must_use]
    pub fn with_auth_ignore_paths(mut self, paths: Vec<String>) -> Self {
        self.auth_ignore_paths = paths;
        self
    }

    /// Use a different storage key
    #[inline]
    #[must_use]
    pub fn with_token_key(mut self, key: impl Into<String>) -> Self {
        self.token_key = key.into();
        self
    }
}

/// REST client shared by every service of the dashboard
pub struct ApiClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn TokenStorage>,
    navigator: Arc<dyn Navigator>,
    broadcaster: Arc<AuthFailureBroadcaster>,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Create a client; the token is loaded from `storage`
    #[must_use]
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn TokenStorage>,
        navigator: Arc<dyn Navigator>,
        broadcaster: Arc<AuthFailureBroadcaster>,
    ) -> Self {
        let token = storage.get(&config.token_key);
        Self {
            config,
            transport,
            storage,
            navigator,
            broadcaster,
            token: RwLock::new(token),
        }
    }

    /// Client configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Store a new bearer token (memory and durable storage)
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.storage.set(&self.config.token_key, &token);
        *self.token.write() = Some(token);
    }

    /// Forget the bearer token (memory and durable storage)
    pub fn clear_token(&self) {
        self.storage.remove(&self.config.token_key);
        *self.token.write() = None;
    }

    /// Current in-memory token
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Whether a token is held
    #[inline]
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    /// Absolute URL for `path`
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// `GET path`
    ///
    /// # Errors
    /// See [`ApiClient::request`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None).await
    }

    /// `POST path` with a JSON body
    ///
    /// # Errors
    /// See [`ApiClient::request`].
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Encode(Arc::new(e)))?;
        self.request(Method::POST, path, Some(body)).await
    }

    /// `PUT path` with a JSON body
    ///
    /// # Errors
    /// See [`ApiClient::request`].
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Encode(Arc::new(e)))?;
        self.request(Method::PUT, path, Some(body)).await
    }

    /// `PATCH path` with a JSON body
    ///
    /// # Errors
    /// See [`ApiClient::request`].
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Encode(Arc::new(e)))?;
        self.request(Method::PATCH, path, Some(body)).await
    }

    /// `DELETE path`
    ///
    /// # Errors
    /// See [`ApiClient::request`].
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Execute a request and decode the JSON response
    ///
    /// An empty 2xx body decodes as JSON `null`.
    ///
    /// # Errors
    /// - `ApiError::Network` when no response arrived
    /// - `ApiError::Http` for non-2xx statuses (401 handling has already run)
    /// - `ApiError::Decode` when the body is not the expected JSON
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let bearer = self.refresh_token();
        let method_name = method.to_string();

        tracing::debug!(method = %method_name, url = %url, "api request");

        let response = match self
            .transport
            .execute(HttpRequest {
                method,
                url: url.clone(),
                bearer,
                body,
            })
            .await
        {
            Ok(response) => response,
            Err(source) => {
                tracing::warn!(method = %method_name, url = %url, "api request failed: {}", source);
                return Err(ApiError::Network {
                    method: method_name,
                    url,
                    source,
                });
            }
        };

        tracing::debug!(method = %method_name, url = %url, status = response.status, "api response");

        if !response.is_success() {
            tracing::warn!(
                method = %method_name,
                url = %url,
                status = response.status,
                body = %response.body,
                "api error response"
            );
            if response.status == 401 {
                self.handle_unauthorized(path);
            }
            return Err(ApiError::Http {
                method: method_name,
                url,
                status: response.status,
                message: response.body,
            });
        }

        let text = if response.body.trim().is_empty() {
            "null"
        } else {
            response.body.as_str()
        };
        serde_json::from_str(text).map_err(|source| ApiError::Decode {
            url,
            source: Arc::new(source),
        })
    }

    /// Pick up a token written to storage by someone else
    fn refresh_token(&self) -> Option<String> {
        let stored = self.storage.get(&self.config.token_key);
        *self.token.write() = stored.clone();
        stored
    }

    fn is_auth_ignored(&self, path: &str) -> bool {
        self.config
            .auth_ignore_paths
            .iter()
            .any(|ignored| path.contains(ignored.as_str()))
    }

    fn handle_unauthorized(&self, path: &str) {
        if self.is_auth_ignored(path) {
            tracing::debug!(path, "401 on ignore-listed path; session kept");
            return;
        }

        tracing::warn!(path, "401 received; invalidating session");
        self.clear_token();
        self.broadcaster.execute_logout();

        if !self.navigator.is_on_login() {
            self.navigator.redirect_to_login();
        }
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::storage::MemoryTokenStorage;
    use crate::transport::HttpResponse;
    use async_trait::async_trait;
    use mockall::mock;
    use oee_lifecycle::{IntervalRegistry, TimerHandle};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    mock! {
        Nav {}
        impl Navigator for Nav {
            fn is_on_login(&self) -> bool;
            fn redirect_to_login(&self);
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        fn respond(self, response: Result<HttpResponse, TransportError>) -> Self {
            self.responses.lock().push_back(response);
            self
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "")))
        }
    }

    struct Fixture {
        client: ApiClient,
        transport: Arc<FakeTransport>,
        storage: Arc<MemoryTokenStorage>,
        broadcaster: Arc<AuthFailureBroadcaster>,
    }

    fn fixture(transport: FakeTransport, navigator: MockNav) -> Fixture {
        let transport = Arc::new(transport);
        let storage = Arc::new(MemoryTokenStorage::new());
        let broadcaster = Arc::new(AuthFailureBroadcaster::new(Arc::new(
            IntervalRegistry::new(),
        )));
        let client = ApiClient::new(
            ClientConfig::new("http://mes.local/api/")
                .with_auth_ignore_paths(vec!["/external/".to_string()]),
            transport.clone(),
            storage.clone(),
            Arc::new(navigator),
            broadcaster.clone(),
        );
        Fixture {
            client,
            transport,
            storage,
            broadcaster,
        }
    }

    fn quiet_nav() -> MockNav {
        let mut nav = MockNav::new();
        nav.expect_is_on_login().never();
        nav.expect_redirect_to_login().never();
        nav
    }

    #[tokio::test]
    async fn joins_url_and_decodes_json() {
        let f = fixture(
            FakeTransport::default().respond(Ok(HttpResponse::new(200, r#"{"status":"running"}"#))),
            quiet_nav(),
        );

        let value: serde_json::Value = f.client.get("/lines/L1/production").await.unwrap();

        assert_eq!(value["status"], "running");
        let seen = f.transport.seen.lock();
        assert_eq!(seen[0].url, "http://mes.local/api/lines/L1/production");
        assert_eq!(seen[0].method, Method::GET);
    }

    #[tokio::test]
    async fn token_is_reread_from_storage_before_each_call() {
        let f = fixture(FakeTransport::default(), quiet_nav());

        let _: () = f.client.get("/a").await.unwrap();
        f.storage.set(TOKEN_KEY, "refreshed-elsewhere");
        let _: () = f.client.get("/b").await.unwrap();

        let seen = f.transport.seen.lock();
        assert_eq!(seen[0].bearer, None);
        assert_eq!(seen[1].bearer.as_deref(), Some("refreshed-elsewhere"));
        assert_eq!(f.client.token().as_deref(), Some("refreshed-elsewhere"));
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let f = fixture(FakeTransport::default(), quiet_nav());
        f.client.set_token("t0k");

        let _: () = f
            .client
            .post("/lines/L1/status", &serde_json::json!({"status": "down"}))
            .await
            .unwrap();

        let seen = f.transport.seen.lock();
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[0].bearer.as_deref(), Some("t0k"));
        assert_eq!(seen[0].body, Some(serde_json::json!({"status": "down"})));
    }

    #[tokio::test]
    async fn server_error_carries_status_and_body() {
        let f = fixture(
            FakeTransport::default().respond(Ok(HttpResponse::new(500, "db offline"))),
            quiet_nav(),
        );
        f.client.set_token("t0k");

        let err = f.client.get::<()>("/timeline").await.unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("db offline"));
        assert!(f.client.is_authenticated());
    }

    #[tokio::test]
    async fn network_failure_is_classified() {
        let f = fixture(
            FakeTransport::default().respond(Err(TransportError::Connect("refused".into()))),
            quiet_nav(),
        );

        let err = f.client.get::<()>("/timeline").await.unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn unauthorized_tears_down_session_and_redirects() {
        let mut nav = MockNav::new();
        nav.expect_is_on_login().times(1).return_const(false);
        nav.expect_redirect_to_login().times(1).return_const(());
        let f = fixture(
            FakeTransport::default().respond(Ok(HttpResponse::new(401, "expired"))),
            nav,
        );
        f.client.set_token("stale");

        let timer = CancellationToken::new();
        let fired = Arc::new(AtomicUsize::new(0));
        f.broadcaster
            .registry()
            .register_interval(&TimerHandle::from_token(timer.clone()));
        let counter = Arc::clone(&fired);
        f.broadcaster.register_logout_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = f.client.get::<()>("/lines/L1/production").await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(f.broadcaster.registry().active_intervals_count(), 0);
        assert!(timer.is_cancelled());
        assert_eq!(f.storage.get(TOKEN_KEY), None);
        assert!(!f.client.is_authenticated());
    }

    #[tokio::test]
    async fn unauthorized_on_login_screen_does_not_redirect() {
        let mut nav = MockNav::new();
        nav.expect_is_on_login().times(1).return_const(true);
        nav.expect_redirect_to_login().never();
        let f = fixture(
            FakeTransport::default().respond(Ok(HttpResponse::new(401, ""))),
            nav,
        );
        f.client.set_token("stale");

        let _ = f.client.get::<()>("/timeline").await;
        assert!(!f.client.is_authenticated());
    }

    #[tokio::test]
    async fn unauthorized_on_ignored_path_keeps_session() {
        let f = fixture(
            FakeTransport::default().respond(Ok(HttpResponse::new(401, "spurious"))),
            quiet_nav(),
        );
        f.client.set_token("good");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        f.broadcaster.register_logout_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = f
            .client
            .get::<()>("/external/quality/metrics")
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(f.storage.get(TOKEN_KEY).as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let f = fixture(
            FakeTransport::default().respond(Ok(HttpResponse::new(200, "<html>"))),
            quiet_nav(),
        );

        let err = f
            .client
            .get::<serde_json::Value>("/timeline")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }
}
