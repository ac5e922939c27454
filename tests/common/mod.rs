//! In-process mock device speaking the Scalar Web API

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const WEBSOCKET: &str = "websocket:jsonizer";
pub const XHRPOST: &str = "xhrpost:jsonizer";

/// One namespace served by the mock
#[derive(Clone, Default)]
pub struct MockService {
    pub name: String,
    pub protocols: Vec<String>,
    pub notifications: Vec<String>,
    /// `getMethodTypes` rows
    pub methods: Vec<Value>,
    /// Response body (without id) per method name
    pub replies: HashMap<String, Value>,
    /// Frames pushed after `switchNotifications`
    pub pushes: Vec<Value>,
    /// Close the socket once every push went out
    pub close_after_pushes: bool,
    /// Answer `getMethodTypes` with this error instead of the table
    pub method_types_error: Option<Value>,
    /// Answer every other POST with this HTTP status and raw body
    pub failure: Option<(u16, String)>,
    /// After `switchNotifications`, hold the socket without ever reading it again
    pub stall_after_switch: bool,
}

impl MockService {
    pub fn new(name: &str, protocols: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            protocols: protocols.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Add a method taking nothing and returning nothing at version 1.0
    pub fn method(self, name: &str) -> Self {
        self.method_row(json!([name, [], [], "1.0"]))
    }

    pub fn method_row(mut self, row: Value) -> Self {
        self.methods.push(row);
        self
    }

    pub fn reply(mut self, method: &str, body: Value) -> Self {
        self.replies.insert(method.to_string(), body);
        self
    }

    pub fn notification(mut self, name: &str) -> Self {
        self.notifications.push(name.to_string());
        self
    }

    pub fn push(mut self, frame: Value) -> Self {
        self.pushes.push(frame);
        self
    }

    pub fn close_after_pushes(mut self) -> Self {
        self.close_after_pushes = true;
        self
    }

    pub fn fail_with(mut self, status: u16, body: &str) -> Self {
        self.failure = Some((status, body.to_string()));
        self
    }

    pub fn stall_after_switch(mut self) -> Self {
        self.stall_after_switch = true;
        self
    }

    fn info(&self) -> Value {
        let notifications: Vec<Value> = self
            .notifications
            .iter()
            .map(|n| json!({"name": n, "versions": [{"version": "1.0"}]}))
            .collect();
        json!({
            "service": self.name,
            "protocols": self.protocols,
            "notifications": notifications,
        })
    }

    fn answer(&self, request: &Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();

        let mut body = if method == "getMethodTypes" {
            match &self.method_types_error {
                Some(error) => json!({"error": error}),
                None => json!({"results": self.methods}),
            }
        } else {
            self.replies
                .get(method)
                .cloned()
                .unwrap_or_else(|| json!({"error": [12, "No Such Method"]}))
        };
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), id);
        }
        body
    }
}

#[derive(Default)]
pub struct Mock {
    pub services: Vec<MockService>,
    /// Answer the guide call with this error
    pub guide_error: Option<Value>,
    /// Every request received, in arrival order
    pub requests: Mutex<Vec<Value>>,
}

impl Mock {
    pub fn new(services: Vec<MockService>) -> Self {
        Self {
            services,
            ..Default::default()
        }
    }

    fn record(&self, request: &Value) {
        self.requests.lock().unwrap().push(request.clone());
    }

    fn service(&self, name: &str) -> Option<&MockService> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Requests whose method is `method`
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.get("method").and_then(Value::as_str) == Some(method))
            .cloned()
            .collect()
    }
}

pub struct MockDevice {
    pub endpoint: String,
    pub mock: Arc<Mock>,
}

/// Serve `mock` on an ephemeral local port
pub async fn spawn(mock: Mock) -> MockDevice {
    let mock = Arc::new(mock);
    let app = Router::new()
        .route("/sony/guide", post(guide))
        .route("/sony/{service}", post(call).get(upgrade))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockDevice {
        endpoint: format!("http://{}/sony", addr),
        mock,
    }
}

async fn guide(State(mock): State<Arc<Mock>>, Json(request): Json<Value>) -> Json<Value> {
    mock.record(&request);
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    if let Some(error) = &mock.guide_error {
        return Json(json!({"error": error, "id": id}));
    }
    let infos: Vec<Value> = mock.services.iter().map(MockService::info).collect();
    Json(json!({"result": [infos], "id": id}))
}

async fn call(
    Path(service): Path<String>,
    State(mock): State<Arc<Mock>>,
    Json(request): Json<Value>,
) -> Response {
    mock.record(&request);
    let Some(service) = mock.service(&service) else {
        return Json(json!({"error": [12, "No Such Service"], "id": request["id"]})).into_response();
    };

    let is_table = request.get("method").and_then(Value::as_str) == Some("getMethodTypes");
    match &service.failure {
        Some((status, body)) if !is_table => {
            let status = StatusCode::from_u16(*status).unwrap();
            (status, body.clone()).into_response()
        }
        _ => Json(service.answer(&request)).into_response(),
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path(service): Path<String>,
    State(mock): State<Arc<Mock>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, mock, service))
}

async fn serve_socket(mut socket: WebSocket, mock: Arc<Mock>, name: String) {
    let Some(service) = mock.service(&name).cloned() else {
        return;
    };

    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        mock.record(&request);

        if request.get("method").and_then(Value::as_str) == Some("switchNotifications") {
            for frame in &service.pushes {
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    return;
                }
            }
            if service.close_after_pushes {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            if service.stall_after_switch {
                // pings go unanswered while nothing polls the socket
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                return;
            }
            continue;
        }

        let answer = service.answer(&request);
        if socket.send(Message::Text(answer.to_string().into())).await.is_err() {
            return;
        }
    }
}

/// Install a test subscriber once; `RUST_LOG` controls the output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
