//! Testing utilities for the OEE dashboard workspace
//!
//! Shared transports, navigators and payload fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use oee_client::{
    HttpRequest, HttpResponse, MemoryTokenStorage, Method, Navigator, TokenStorage, Transport,
    TransportError,
};
use oee_core::{Dashboard, DashboardConfig, DashboardDeps, PollingSection};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BASE_URL: &str = "http://mes.test/api";

type Reply = Result<HttpResponse, TransportError>;

struct Route {
    method: Method,
    path: String,
    once: VecDeque<Reply>,
    always: Option<Reply>,
}

/// Transport answering from a script of routes keyed by method and path substring
///
/// One-shot replies are served before the standing reply. Unmatched requests get 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(&self, method: Method, path: &str, edit: impl FnOnce(&mut Route)) {
        let mut routes = self.routes.lock();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            edit(route);
            return;
        }
        let mut route = Route {
            method,
            path: path.to_string(),
            once: VecDeque::new(),
            always: None,
        };
        edit(&mut route);
        routes.push(route);
    }

    /// Answer every matching request with `status` and `body`
    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        self.route(method, path, |r| {
            r.always = Some(Ok(HttpResponse::json(status, &body)));
        });
    }

    /// Answer the next matching request with `status` and `body`
    pub fn respond_once(&self, method: Method, path: &str, status: u16, body: Value) {
        self.route(method, path, |r| {
            r.once.push_back(Ok(HttpResponse::json(status, &body)));
        });
    }

    /// Fail every matching request without a response
    pub fn fail(&self, method: Method, path: &str, error: TransportError) {
        self.route(method, path, |r| r.always = Some(Err(error)));
    }

    /// Delay every response
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Requests whose method matches and whose URL contains `path`
    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| &r.method == method && r.url.contains(path))
            .count()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    fn reply(&self, request: &HttpRequest) -> Reply {
        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.contains(&r.path))
            .max_by_key(|r| r.path.len());
        match route {
            Some(route) => match route.once.pop_front() {
                Some(reply) => reply,
                None => route
                    .always
                    .clone()
                    .unwrap_or_else(|| Ok(HttpResponse::new(404, "not found"))),
            },
            None => Ok(HttpResponse::new(404, "not found")),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.reply(&request)
    }
}

/// Navigator that records redirects
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    on_login: AtomicBool,
    redirects: AtomicUsize,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_on_login(&self, on_login: bool) {
        self.on_login.store(on_login, Ordering::SeqCst);
    }

    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl Navigator for RecordingNavigator {
    fn is_on_login(&self) -> bool {
        self.on_login.load(Ordering::SeqCst)
    }

    fn redirect_to_login(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn production_json(line: &str, status: &str, good: u64, downtime: Vec<Value>) -> Value {
    json!({
        "line_id": line,
        "status": status,
        "good": good,
        "rejected": 2,
        "target": 500,
        "downtime": downtime,
        "updated_at": "2024-05-01T10:00:00Z"
    })
}

pub fn downtime_json(id: &str, reason: &str, ended: bool) -> Value {
    let mut value = json!({
        "id": id,
        "reason": reason,
        "started_at": "2024-05-01T09:30:00Z"
    });
    if ended {
        value["ended_at"] = json!("2024-05-01T09:45:00Z");
    }
    value
}

pub fn timeline_json(line: &str) -> Value {
    json!([
        { "line_id": line, "status": "running", "started_at": "2024-05-01T06:00:00Z", "ended_at": "2024-05-01T09:30:00Z" },
        { "line_id": line, "status": "down", "started_at": "2024-05-01T09:30:00Z", "reason": "Falta de material" }
    ])
}

pub fn oee_json(line: &str, oee: f64) -> Value {
    json!({
        "line_id": line,
        "availability": 0.9,
        "performance": 0.85,
        "quality": 0.98,
        "oee": oee
    })
}

pub fn status_json(status: &str, downtime: Option<Value>) -> Value {
    match downtime {
        Some(d) => json!({ "status": status, "downtime": d }),
        None => json!({ "status": status }),
    }
}

/// Config pointing at [`BASE_URL`] with one-second pollers
pub fn test_config() -> DashboardConfig {
    DashboardConfig::default()
        .with_base_url(BASE_URL)
        .with_lines(vec!["L1".to_string(), "L2".to_string()])
        .with_polling(PollingSection {
            production_interval_ms: 1_000,
            timeline_interval_ms: 1_000,
            oee_interval_ms: 1_000,
            clock_interval_ms: 1_000,
            max_consecutive_errors: 3,
            pause_when_hidden: true,
        })
}

pub struct TestDashboard {
    pub dashboard: Dashboard,
    pub transport: Arc<ScriptedTransport>,
    pub navigator: Arc<RecordingNavigator>,
    pub storage: Arc<MemoryTokenStorage>,
}

/// Dashboard over a scripted transport, production route answering `running`
pub fn test_dashboard(config: DashboardConfig) -> TestDashboard {
    let transport = ScriptedTransport::new();
    transport.respond(
        Method::GET,
        "/lines/L1/production",
        200,
        production_json("L1", "running", 100, Vec::new()),
    );
    let navigator = RecordingNavigator::new();
    let storage = Arc::new(MemoryTokenStorage::new());
    let deps = DashboardDeps::new(
        transport.clone(),
        storage.clone() as Arc<dyn TokenStorage>,
        navigator.clone(),
    );
    let dashboard = Dashboard::new(config, deps).unwrap();
    TestDashboard {
        dashboard,
        transport,
        navigator,
        storage,
    }
}
