#![forbid(unsafe_code)]

use std::{
    env,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use turnstile_adapter::{
    ErrorResponse, GateRuntime, GatewayCallback, GatewayCallbackResponse, GatewayCallbackResult,
    VerifyRequest, API_KEY_HEADER, DEVICE_KEY_HEADER,
};
use turnstile_contracts::admission::{DeclaredDirection, ScanRequest};
use turnstile_contracts::presence::InferredDirection;

type SharedRuntime = Arc<Mutex<GateRuntime>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind = env::var("TURNSTILE_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind.parse()?;

    let runtime = Arc::new(Mutex::new(GateRuntime::default_from_env()));
    let timezone = match runtime.lock() {
        Ok(r) => r.timezone().to_string(),
        Err(_) => return Err("gate runtime lock poisoned".into()),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/scan/in", post(scan_in))
        .route("/scan/out", post(scan_out))
        .route("/verify", post(verify))
        .route("/verify/entry", post(verify_entry))
        .route("/verify/exit", post(verify_exit))
        .route("/payments/gateway/notify", post(gateway_notify))
        .route("/payments/gateway/return", get(gateway_return))
        .with_state(runtime);

    println!("turnstile_http listening on http://{addr} (timezone={timezone})");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz(State(runtime): State<SharedRuntime>) -> Response {
    match runtime.lock() {
        Ok(runtime) => (StatusCode::OK, Json(runtime.health())).into_response(),
        Err(_) => lock_poisoned(),
    }
}

async fn scan_in(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Response {
    run_scan(&runtime, &headers, req, Some(DeclaredDirection::In))
}

async fn scan_out(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Response {
    run_scan(&runtime, &headers, req, Some(DeclaredDirection::Out))
}

/// `/verify` is the kiosk scan path: API-key auth, no declared lane
/// direction, otherwise identical admission semantics.
async fn verify(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Response {
    let now = Utc::now();
    let Ok(mut runtime) = runtime.lock() else {
        return lock_poisoned();
    };
    if !runtime.api_key_matches(header_value(&headers, API_KEY_HEADER)) {
        return unauthorized();
    }
    if req.token.trim().is_empty() {
        runtime.warn_malformed(&req.device_id, "empty_token", now);
        return unprocessable("token must not be empty");
    }
    (StatusCode::OK, Json(runtime.scan(&req, None, now))).into_response()
}

async fn verify_entry(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(req): Json<VerifyRequest>,
) -> Response {
    run_membership_verify(&runtime, &headers, req, InferredDirection::Entry)
}

async fn verify_exit(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(req): Json<VerifyRequest>,
) -> Response {
    run_membership_verify(&runtime, &headers, req, InferredDirection::Exit)
}

async fn gateway_notify(
    State(runtime): State<SharedRuntime>,
    Json(callback): Json<GatewayCallback>,
) -> Response {
    apply_gateway(&runtime, callback)
}

/// Browser redirect leg of the gateway flow; same transition as notify, so
/// whichever leg lands first settles the order and the other is a replay.
async fn gateway_return(
    State(runtime): State<SharedRuntime>,
    Query(callback): Query<GatewayCallback>,
) -> Response {
    apply_gateway(&runtime, callback)
}

fn run_scan(
    runtime: &SharedRuntime,
    headers: &HeaderMap,
    req: ScanRequest,
    declared: Option<DeclaredDirection>,
) -> Response {
    let now = Utc::now();
    let Ok(mut runtime) = runtime.lock() else {
        return lock_poisoned();
    };
    if !runtime.device_key_matches(header_value(headers, DEVICE_KEY_HEADER)) {
        return unauthorized();
    }
    if req.token.trim().is_empty() {
        runtime.warn_malformed(&req.device_id, "empty_token", now);
        return unprocessable("token must not be empty");
    }
    if !runtime.admit_device_rate(&req.device_id, now) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "scan rate limit".to_string(),
            }),
        )
            .into_response();
    }
    (StatusCode::OK, Json(runtime.scan(&req, declared, now))).into_response()
}

fn run_membership_verify(
    runtime: &SharedRuntime,
    headers: &HeaderMap,
    req: VerifyRequest,
    direction: InferredDirection,
) -> Response {
    let now = Utc::now();
    let Ok(runtime) = runtime.lock() else {
        return lock_poisoned();
    };
    if !runtime.api_key_matches(header_value(headers, API_KEY_HEADER)) {
        return unauthorized();
    }
    if req.token.trim().is_empty() {
        return unprocessable("token must not be empty");
    }
    (
        StatusCode::OK,
        Json(runtime.verify_membership(&req.token, direction, now)),
    )
        .into_response()
}

fn apply_gateway(runtime: &SharedRuntime, callback: GatewayCallback) -> Response {
    let now = Utc::now();
    let Ok(mut runtime) = runtime.lock() else {
        return lock_poisoned();
    };
    let result = runtime.apply_gateway_callback(&callback, now);
    let status = match result {
        GatewayCallbackResult::OrderNotFound => StatusCode::NOT_FOUND,
        GatewayCallbackResult::UnrecognizedStatus => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::OK,
    };
    (
        status,
        Json(GatewayCallbackResponse {
            order_id: callback.order_id,
            result: result.as_str(),
        }),
    )
        .into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "bad or missing key".to_string(),
        }),
    )
        .into_response()
}

fn unprocessable(detail: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            error: detail.to_string(),
        }),
    )
        .into_response()
}

fn lock_poisoned() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "gate runtime lock poisoned".to_string(),
        }),
    )
        .into_response()
}
