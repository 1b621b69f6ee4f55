#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use turnstile_contracts::admission::{
    AdmissionReason, DeclaredDirection, ScanRequest, ScanResponse,
};
use turnstile_contracts::common::mask_token;
use turnstile_contracts::payment::{OrderId, SettlementOutcome, SettlementRejection};
use turnstile_contracts::presence::InferredDirection;
use turnstile_engines::localday::{GymCalendar, DEFAULT_GYM_TIMEZONE};
use turnstile_os::admission::AdmissionLedger;
use turnstile_os::settlement::{GatewayApplication, PaymentSettlement};
use turnstile_storage::store::TurnstileStore;

pub const DEVICE_KEY_HEADER: &str = "x-turnstile-device-key";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Minimum spacing between accepted scans from one device.
pub const DEVICE_RATE_LIMIT_MS: i64 = 50;

/// Repeated malformed requests from one device warn at most this often.
const WARN_THROTTLE_SECONDS: i64 = 5;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifyRequest {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayCallback {
    pub order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayCallbackResponse {
    pub order_id: String,
    pub result: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timezone: String,
}

/// What the gateway callback did, pre-mapped for HTTP status selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCallbackResult {
    Applied,
    AlreadyApplied,
    OrderNotFound,
    Rejected,
    UnrecognizedStatus,
}

impl GatewayCallbackResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayCallbackResult::Applied => "applied",
            GatewayCallbackResult::AlreadyApplied => "already_applied",
            GatewayCallbackResult::OrderNotFound => "order_not_found",
            GatewayCallbackResult::Rejected => "rejected",
            GatewayCallbackResult::UnrecognizedStatus => "unrecognized_status",
        }
    }
}

/// All server-side gate state behind one lock: the store, the admission
/// ledger, settlement, device rate-limit stamps, and the shared secrets.
#[derive(Debug)]
pub struct GateRuntime {
    store: TurnstileStore,
    ledger: AdmissionLedger,
    settlement: PaymentSettlement,
    device_key: String,
    api_key: String,
    timezone: String,
    last_accepted_scan: BTreeMap<String, DateTime<Utc>>,
    last_warn_at: BTreeMap<String, DateTime<Utc>>,
}

impl GateRuntime {
    pub fn new(
        store: TurnstileStore,
        calendar: GymCalendar,
        device_key: String,
        api_key: String,
    ) -> Self {
        let timezone = calendar.tz_name().to_string();
        Self {
            store,
            ledger: AdmissionLedger::new(calendar),
            settlement: PaymentSettlement,
            device_key,
            api_key,
            timezone,
            last_accepted_scan: BTreeMap::new(),
            last_warn_at: BTreeMap::new(),
        }
    }

    /// Runtime wired from the process environment: `GYM_TIMEZONE`,
    /// `TURNSTILE_DEVICE_KEY`, `TURNSTILE_API_KEY`.
    pub fn default_from_env() -> Self {
        let tz_name =
            env::var("GYM_TIMEZONE").unwrap_or_else(|_| DEFAULT_GYM_TIMEZONE.to_string());
        let device_key =
            env::var("TURNSTILE_DEVICE_KEY").unwrap_or_else(|_| "dev-device-key".to_string());
        let api_key = env::var("TURNSTILE_API_KEY").unwrap_or_else(|_| "dev-api-key".to_string());
        Self::new(
            TurnstileStore::new_in_memory(),
            GymCalendar::from_tz_name(&tz_name),
            device_key,
            api_key,
        )
    }

    pub fn store(&self) -> &TurnstileStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TurnstileStore {
        &mut self.store
    }

    pub fn ledger(&self) -> &AdmissionLedger {
        &self.ledger
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn device_key_matches(&self, presented: Option<&str>) -> bool {
        presented == Some(self.device_key.as_str())
    }

    pub fn api_key_matches(&self, presented: Option<&str>) -> bool {
        presented == Some(self.api_key.as_str())
    }

    /// Per-device scan spacing. The stamp only moves when the scan is
    /// accepted through the limiter, so a rejected burst does not extend
    /// its own penalty.
    pub fn admit_device_rate(&mut self, device_id: &str, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_accepted_scan.get(device_id) {
            if (now - *last) < Duration::milliseconds(DEVICE_RATE_LIMIT_MS) {
                return false;
            }
        }
        self.last_accepted_scan.insert(device_id.to_string(), now);
        true
    }

    /// One malformed-request warning per device per throttle window.
    pub fn warn_malformed(&mut self, device_id: &str, detail: &str, now: DateTime<Utc>) {
        let due = self
            .last_warn_at
            .get(device_id)
            .map(|last| (now - *last) >= Duration::seconds(WARN_THROTTLE_SECONDS))
            .unwrap_or(true);
        if due {
            self.last_warn_at.insert(device_id.to_string(), now);
            eprintln!("turnstile_http malformed_scan device={device_id} detail={detail}");
        }
    }

    /// Run one scan through the admission ledger. A storage-level failure
    /// is reported to the device as an invalid-token denial; the gate
    /// fails closed instead of surfacing internals.
    pub fn scan(
        &mut self,
        req: &ScanRequest,
        declared: Option<DeclaredDirection>,
        now: DateTime<Utc>,
    ) -> ScanResponse {
        match self.ledger.process_scan(&mut self.store, req, declared, now) {
            Ok(result) => {
                println!(
                    "turnstile_http scan device={} token={} allowed={} reason={}",
                    req.device_id,
                    mask_token(&req.token),
                    result.is_allowed(),
                    result.reason().as_str()
                );
                ScanResponse::from(result)
            }
            Err(err) => {
                eprintln!(
                    "turnstile_http scan_failed device={} token={} err={err:?}",
                    req.device_id,
                    mask_token(&req.token)
                );
                denied_invalid_token()
            }
        }
    }

    /// Read-only membership check behind `/verify/entry` and `/verify/exit`.
    pub fn verify_membership(
        &self,
        token: &str,
        direction: InferredDirection,
        now: DateTime<Utc>,
    ) -> ScanResponse {
        let result = self
            .ledger
            .verify_membership(&self.store, token, direction, now);
        println!(
            "turnstile_http verify token={} direction={} allowed={} reason={}",
            mask_token(token),
            direction.as_str(),
            result.is_allowed(),
            result.reason().as_str()
        );
        ScanResponse::from(result)
    }

    /// Apply one gateway callback (notify or return redirect, same path).
    pub fn apply_gateway_callback(
        &mut self,
        callback: &GatewayCallback,
        now: DateTime<Utc>,
    ) -> GatewayCallbackResult {
        let Ok(order_id) = OrderId::new(callback.order_id.as_str()) else {
            return GatewayCallbackResult::OrderNotFound;
        };
        let application = match self.settlement.apply_gateway_status(
            &mut self.store,
            &order_id,
            &callback.status,
            now,
        ) {
            Ok(application) => application,
            Err(err) => {
                eprintln!(
                    "turnstile_http gateway_failed order={} err={err:?}",
                    order_id.as_str()
                );
                return GatewayCallbackResult::Rejected;
            }
        };
        let result = match application {
            GatewayApplication::Paid(outcome) | GatewayApplication::Failed(outcome) => {
                match outcome {
                    SettlementOutcome::AppliedFirstTime => GatewayCallbackResult::Applied,
                    SettlementOutcome::AlreadyApplied => GatewayCallbackResult::AlreadyApplied,
                    SettlementOutcome::Rejected(SettlementRejection::OrderNotFound) => {
                        GatewayCallbackResult::OrderNotFound
                    }
                    SettlementOutcome::Rejected(_) => GatewayCallbackResult::Rejected,
                }
            }
            GatewayApplication::Unrecognized => GatewayCallbackResult::UnrecognizedStatus,
        };
        println!(
            "turnstile_http gateway order={} status={} result={}",
            callback.order_id,
            callback.status,
            result.as_str()
        );
        result
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok",
            timezone: self.timezone.clone(),
        }
    }
}

fn denied_invalid_token() -> ScanResponse {
    ScanResponse {
        allowed: false,
        reason: AdmissionReason::InvalidToken,
        credits_left: 0,
        cooldown_seconds_left: None,
        open_door: false,
        door_open_duration: None,
        user: None,
    }
}
