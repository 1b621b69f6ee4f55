#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use turnstile_contracts::common::mask_token;
use turnstile_contracts::scanner::ScannedCode;

use crate::dispatch::{dispatch_scan, DispatchError, RetryPolicy, ScanTransport, ThreadSleeper};
use crate::relay::DoorDriver;

/// Fallback hold time if the server omits a duration on an open decision.
const FALLBACK_DOOR_OPEN_S: u64 = 5;

/// Single consumer behind the lane readers: pull one scan at a time, post
/// it with bounded retry, and fire the relay when the server says open.
/// Actuation runs as its own task so a held door never blocks the queue.
pub async fn run_consumer<T>(
    mut queue: mpsc::Receiver<ScannedCode>,
    transport: Arc<T>,
    policy: RetryPolicy,
    door: DoorDriver,
) where
    T: ScanTransport + Send + Sync + 'static,
{
    while let Some(scan) = queue.recv().await {
        let transport = transport.clone();
        let scan_for_dispatch = scan.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            dispatch_scan(&*transport, &policy, &ThreadSleeper, &scan_for_dispatch)
        })
        .await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(DispatchError::Fatal { status, detail })) => {
                eprintln!(
                    "scanner_daemon dispatch_fatal lane={} token={} status={status} detail={detail}",
                    scan.device_id,
                    mask_token(&scan.code)
                );
                continue;
            }
            Ok(Err(DispatchError::Exhausted { attempts, detail })) => {
                eprintln!(
                    "scanner_daemon dispatch_exhausted lane={} token={} attempts={attempts} detail={detail}",
                    scan.device_id,
                    mask_token(&scan.code)
                );
                continue;
            }
            Err(err) => {
                eprintln!("scanner_daemon dispatch_panicked lane={} err={err}", scan.device_id);
                continue;
            }
        };

        println!(
            "scanner_daemon decision lane={} token={} allowed={} reason={}",
            scan.device_id,
            mask_token(&scan.code),
            response.allowed,
            response.reason.as_str()
        );
        if response.allowed && response.open_door {
            let hold = Duration::from_secs(u64::from(
                response
                    .door_open_duration
                    .unwrap_or(FALLBACK_DOOR_OPEN_S as u32),
            ));
            let door = door.clone();
            tokio::spawn(async move {
                door.open_for(hold).await;
            });
        }
    }
}
