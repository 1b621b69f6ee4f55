#![forbid(unsafe_code)]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

/// Relay capability behind the turnstile coil. Implementations only switch
/// the line; hold timing belongs to the driver.
pub trait DoorRelay: Send {
    fn set_open(&mut self, open: bool) -> Result<(), String>;
}

/// Sysfs GPIO relay: writes "1"/"0" into an exported pin's value file.
pub struct SysfsGpioRelay {
    value_path: String,
}

impl SysfsGpioRelay {
    pub fn new(value_path: impl Into<String>) -> Self {
        Self {
            value_path: value_path.into(),
        }
    }
}

impl DoorRelay for SysfsGpioRelay {
    fn set_open(&mut self, open: bool) -> Result<(), String> {
        let level = if open { "1" } else { "0" };
        fs::write(&self.value_path, level)
            .map_err(|err| format!("gpio write {} failed: {err}", self.value_path))
    }
}

/// Relay that switches nothing; used when no GPIO is configured.
#[derive(Debug, Default)]
pub struct NoopRelay;

impl DoorRelay for NoopRelay {
    fn set_open(&mut self, _open: bool) -> Result<(), String> {
        Ok(())
    }
}

/// Mutex-guarded door driver. While one open cycle holds the relay, any
/// overlapping request is skipped instead of queued, so a scan burst cannot
/// stack hold time or re-trigger the coil mid-cycle.
#[derive(Clone)]
pub struct DoorDriver {
    relay: Arc<Mutex<Box<dyn DoorRelay>>>,
}

impl DoorDriver {
    pub fn new(relay: Box<dyn DoorRelay>) -> Self {
        Self {
            relay: Arc::new(Mutex::new(relay)),
        }
    }

    /// Hold the door open for exactly the server-dictated duration. Returns
    /// whether this call performed the actuation.
    pub async fn open_for(&self, duration: Duration) -> bool {
        let Ok(mut relay) = self.relay.try_lock() else {
            println!("scanner_daemon door_busy skipping overlapping open");
            return false;
        };
        if let Err(err) = relay.set_open(true) {
            eprintln!("scanner_daemon door_error {err}");
            return false;
        }
        tokio::time::sleep(duration).await;
        if let Err(err) = relay.set_open(false) {
            eprintln!("scanner_daemon door_error {err}");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingRelay {
        transitions: Arc<std::sync::Mutex<Vec<bool>>>,
    }

    impl DoorRelay for RecordingRelay {
        fn set_open(&mut self, open: bool) -> Result<(), String> {
            self.transitions
                .lock()
                .map_err(|_| "poisoned".to_string())?
                .push(open);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_cycle_raises_then_lowers() {
        let transitions = Arc::new(std::sync::Mutex::new(Vec::new()));
        let relay = RecordingRelay {
            transitions: transitions.clone(),
        };
        let driver = DoorDriver::new(Box::new(relay));

        assert!(driver.open_for(Duration::from_secs(5)).await);
        assert_eq!(*transitions.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_open_is_skipped_not_stacked() {
        let transitions = Arc::new(std::sync::Mutex::new(Vec::new()));
        let relay = RecordingRelay {
            transitions: transitions.clone(),
        };
        let driver = DoorDriver::new(Box::new(relay));

        let first = tokio::spawn({
            let driver = driver.clone();
            async move { driver.open_for(Duration::from_secs(5)).await }
        });
        // Let the first cycle grab the relay before the burst arrives.
        tokio::task::yield_now().await;
        let second = driver.open_for(Duration::from_secs(5)).await;
        assert!(!second);
        assert!(first.await.unwrap());
        // One raise, one lower; the skipped call never touched the relay.
        assert_eq!(*transitions.lock().unwrap(), vec![true, false]);
    }
}
