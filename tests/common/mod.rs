//! Shared utilities for integration tests: a programmable downstream service.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use proxy_client::Cfg;
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum Behaviour {
    Healthy,
    Fail(u16),
    Hang(Duration),
}

#[derive(Clone)]
pub struct MockDownstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    behaviour: Arc<Mutex<Behaviour>>,
    last_auth: Arc<Mutex<Option<String>>>,
    last_path: Arc<Mutex<Option<String>>>,
}

#[allow(dead_code)]
impl MockDownstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn set(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn last_auth(&self) -> Option<String> {
        self.last_auth.lock().unwrap().clone()
    }

    pub fn last_path(&self) -> Option<String> {
        self.last_path.lock().unwrap().clone()
    }

    pub fn url(&self, context: &str) -> String {
        format!("http://{}/{}", self.addr, context)
    }
}

/// Starts a downstream that serves every resource path on one port.
pub async fn start_mock_downstream(behaviour: Behaviour) -> MockDownstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mock = MockDownstream {
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(AtomicUsize::new(0)),
        behaviour: Arc::new(Mutex::new(behaviour)),
        last_auth: Arc::new(Mutex::new(None)),
        last_path: Arc::new(Mutex::new(None)),
    };

    let app = Router::new().fallback(handle).with_state(mock.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    mock
}

async fn handle(
    State(mock): State<MockDownstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    *mock.last_auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    *mock.last_path.lock().unwrap() = Some(uri.path().to_owned());

    let behaviour = *mock.behaviour.lock().unwrap();
    match behaviour {
        Behaviour::Fail(code) => {
            let status = StatusCode::from_u16(code).unwrap();
            return (status, "downstream exploded").into_response();
        }
        Behaviour::Hang(d) => tokio::time::sleep(d).await,
        Behaviour::Healthy => {}
    }

    let path = uri.path();
    let is_collection = path.ends_with("/api/users")
        || path.ends_with("/api/products")
        || path.ends_with("/api/favourites");

    match method {
        Method::GET if is_collection => Json(json!({ "collection": [sample(path)] })).into_response(),
        Method::GET => Json(sample(path)).into_response(),
        Method::POST => {
            let mut v: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            if let Some(obj) = v.as_object_mut() {
                obj.entry("userId").or_insert(json!(1));
            }
            (StatusCode::OK, Json(v)).into_response()
        }
        Method::PUT => Json(serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null)).into_response(),
        Method::DELETE => Json(true).into_response(),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn sample(path: &str) -> Value {
    if path.contains("/api/products") {
        json!({ "productId": 5, "productTitle": "lamp", "sku": "L-1", "priceUnit": 9.5, "quantity": 3 })
    } else if path.contains("/api/favourites") {
        json!({ "userId": 1, "productId": 2, "likeDate": "17-10-2026__10:15:00:000000" })
    } else {
        json!({ "userId": 1, "firstName": "Ada", "lastName": "Lovelace", "email": "ada@example.com", "phone": "1" })
    }
}

/// Gateway config pointing every downstream at `mock`, tuned for fast tests.
#[allow(dead_code)]
pub fn test_cfg(mock: &MockDownstream, overrides: &[(&str, &str)]) -> Cfg {
    let mut vars: HashMap<String, String> = HashMap::new();
    for (prefix, context) in [
        ("USER", "user-service"),
        ("PRODUCT", "product-service"),
        ("FAVOURITE", "favourite-service"),
    ] {
        vars.insert(format!("{prefix}_SERVICE_URL"), mock.url(context));
        vars.insert(format!("{prefix}_CALL_TIMEOUT_MS"), "300".into());
        vars.insert(format!("{prefix}_RETRY_BASE_MS"), "10".into());
        vars.insert(format!("{prefix}_RETRY_MAX_DELAY_MS"), "40".into());
        vars.insert(format!("{prefix}_CB_OPEN_MS"), "60000".into());
    }
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    Cfg::from_lookup(move |k| vars.get(k).cloned()).unwrap()
}
