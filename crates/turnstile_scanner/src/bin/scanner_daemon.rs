#![forbid(unsafe_code)]

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio::sync::mpsc;

use turnstile_scanner::config::{LaneMode, ScannerConfig};
use turnstile_scanner::daemon::run_consumer;
use turnstile_scanner::dispatch::{RetryPolicy, UreqTransport};
use turnstile_scanner::reader::{run_reader, HidKeycodeReader, LineReader};
use turnstile_scanner::relay::{DoorDriver, DoorRelay, NoopRelay, SysfsGpioRelay};

#[tokio::main]
async fn main() {
    let config = ScannerConfig::from_env();
    println!(
        "scanner_daemon starting server_url={} lanes={} queue_capacity={}",
        config.server_url,
        config.lanes.len(),
        config.queue_capacity
    );

    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let mut readers = Vec::new();
    for lane in &config.lanes {
        let Some(path) = lane.source_path.clone() else {
            println!(
                "scanner_daemon lane_disabled lane={} direction={} reason=no_source",
                lane.device_id,
                lane.direction.as_str()
            );
            continue;
        };
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                eprintln!(
                    "scanner_daemon lane_open_failed lane={} source={path} err={err}",
                    lane.device_id
                );
                continue;
            }
        };
        let lane = lane.clone();
        let queue = tx.clone();
        let min_code_length = config.min_code_length;
        readers.push(tokio::task::spawn_blocking(move || {
            match lane.mode {
                LaneMode::Line => run_reader(
                    LineReader::new(BufReader::new(file)),
                    &lane,
                    min_code_length,
                    &queue,
                ),
                LaneMode::HidKeycodes => {
                    run_reader(HidKeycodeReader::new(file), &lane, min_code_length, &queue)
                }
            }
            println!("scanner_daemon lane_stopped lane={}", lane.device_id);
        }));
    }
    // Consumer exits once every lane sender is gone.
    drop(tx);

    let relay: Box<dyn DoorRelay> = match &config.relay_gpio_value_path {
        Some(path) => Box::new(SysfsGpioRelay::new(path.clone())),
        None => {
            println!("scanner_daemon relay=noop");
            Box::new(NoopRelay)
        }
    };
    let door = DoorDriver::new(relay);
    let transport = Arc::new(UreqTransport::new(&config));
    let mut consumer = tokio::spawn(run_consumer(rx, transport, RetryPolicy::default(), door));

    tokio::select! {
        _ = shutdown_signal() => {
            println!("scanner_daemon shutdown signal received");
            // Give an in-flight dispatch its retry budget, then exit anyway.
            let grace = std::time::Duration::from_secs(5);
            if tokio::time::timeout(grace, &mut consumer).await.is_err() {
                consumer.abort();
                eprintln!("scanner_daemon shutdown grace elapsed, aborting consumer");
            }
        }
        _ = &mut consumer => {
            println!("scanner_daemon all lanes drained, exiting");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(err) => {
                eprintln!("scanner_daemon sigterm_hook_failed err={err}");
                if let Err(err) = ctrl_c.await {
                    eprintln!("scanner_daemon ctrl_c_hook_failed err={err}");
                }
                return;
            }
        };
        tokio::select! {
            result = ctrl_c => {
                if let Err(err) = result {
                    eprintln!("scanner_daemon ctrl_c_hook_failed err={err}");
                }
            }
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            eprintln!("scanner_daemon ctrl_c_hook_failed err={err}");
        }
    }
}
