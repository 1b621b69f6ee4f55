#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use turnstile_contracts::admission::DeclaredDirection;

pub const DEFAULT_MIN_CODE_LENGTH: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// How a lane's reader device presents scanned codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneMode {
    /// Newline-terminated text (serial tty, FIFO, stdin).
    Line,
    /// USB HID keyboard emulation: a `/dev/input/event*` stream of key
    /// events, one code per Enter press.
    HidKeycodes,
}

impl LaneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneMode::Line => "line",
            LaneMode::HidKeycodes => "hid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "line" => Some(LaneMode::Line),
            "hid" => Some(LaneMode::HidKeycodes),
            _ => None,
        }
    }
}

/// One physical lane: a reader device feeding one declared direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneConfig {
    pub direction: DeclaredDirection,
    pub device_id: String,
    /// Reader device path. `None` disables the lane.
    pub source_path: Option<String>,
    pub mode: LaneMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    pub server_url: String,
    pub device_key: String,
    pub lanes: Vec<LaneConfig>,
    pub min_code_length: usize,
    pub request_timeout: Duration,
    pub queue_capacity: usize,
    /// GPIO value file of the relay; `None` runs the no-op relay.
    pub relay_gpio_value_path: Option<String>,
}

impl ScannerConfig {
    /// Assemble the daemon config from environment variables, with working
    /// local defaults for everything except the shared device key.
    pub fn from_env() -> Self {
        let server_url = env::var("TURNSTILE_SERVER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        let device_key =
            env::var("TURNSTILE_DEVICE_KEY").unwrap_or_else(|_| "dev-device-key".to_string());
        let lanes = vec![
            LaneConfig {
                direction: DeclaredDirection::In,
                device_id: env::var("SCANNER_IN_DEVICE_ID")
                    .unwrap_or_else(|_| "turnstile-entry-1".to_string()),
                source_path: env::var("SCANNER_IN_SOURCE").ok(),
                mode: parse_lane_mode_from_env("SCANNER_IN_MODE"),
            },
            LaneConfig {
                direction: DeclaredDirection::Out,
                device_id: env::var("SCANNER_OUT_DEVICE_ID")
                    .unwrap_or_else(|_| "turnstile-exit-1".to_string()),
                source_path: env::var("SCANNER_OUT_SOURCE").ok(),
                mode: parse_lane_mode_from_env("SCANNER_OUT_MODE"),
            },
        ];
        Self {
            server_url,
            device_key,
            lanes,
            min_code_length: parse_min_code_length_from_env(),
            request_timeout: Duration::from_millis(parse_request_timeout_ms_from_env()),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            relay_gpio_value_path: env::var("SCANNER_RELAY_GPIO_VALUE_PATH").ok(),
        }
    }
}

fn parse_lane_mode_from_env(var: &str) -> LaneMode {
    env::var(var)
        .ok()
        .and_then(|v| LaneMode::parse(&v))
        .unwrap_or(LaneMode::Line)
}

fn parse_min_code_length_from_env() -> usize {
    env::var("SCANNER_MIN_CODE_LENGTH")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| (1..=64).contains(v))
        .unwrap_or(DEFAULT_MIN_CODE_LENGTH)
}

fn parse_request_timeout_ms_from_env() -> u64 {
    env::var("SCANNER_REQUEST_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| (100..=60_000).contains(v))
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS)
}
