#![forbid(unsafe_code)]

use turnstile_contracts::payment::GatewayStatus;

/// Normalize a provider-reported payment state. Webhook notifications and
/// browser return-redirects both funnel through this one mapping, so the
/// two delivery paths cannot diverge.
pub fn normalize_gateway_status(raw: &str) -> GatewayStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "PAID" | "OK" | "SUCCESS" | "COMPLETED" => GatewayStatus::Paid,
        "CANCELLED" | "CANCELED" => GatewayStatus::Failed("cancelled"),
        "FAILED" | "ERROR" | "TIMEOUT" | "DECLINED" => GatewayStatus::Failed("failed"),
        _ => GatewayStatus::Unrecognized,
    }
}
