#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::io::{self, BufRead, Read};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use turnstile_contracts::common::mask_token;
use turnstile_contracts::scanner::ScannedCode;

use crate::config::LaneConfig;

/// Pause between retries after a lane read error.
const READER_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Line-oriented code source for one lane. `Ok(None)` is end of input and
/// ends the reader task.
pub trait LaneReader {
    fn next_code(&mut self) -> io::Result<Option<String>>;
}

/// Reader over any buffered byte stream (serial tty, FIFO, stdin).
pub struct LineReader<R: BufRead> {
    inner: R,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: BufRead> LaneReader for LineReader<R> {
    fn next_code(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let read = self.inner.read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

const EV_KEY: u16 = 1;
const KEY_VALUE_DOWN: i32 = 1;
const KEY_ENTER: u16 = 28;

/// Size of one Linux `input_event` on 64-bit targets: 16-byte timeval,
/// u16 type, u16 code, i32 value.
const INPUT_EVENT_SIZE: usize = 24;

/// Reader for USB badge scanners in HID keyboard-emulation mode. Decodes
/// the raw `/dev/input/event*` stream: key-down events accumulate into a
/// buffer, Enter completes the code. Events for keys outside the code
/// alphabet are ignored, as are repeats and releases.
pub struct HidKeycodeReader<R: Read> {
    inner: R,
}

impl<R: Read> HidKeycodeReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> LaneReader for HidKeycodeReader<R> {
    fn next_code(&mut self) -> io::Result<Option<String>> {
        let mut buffer = String::new();
        let mut event = [0u8; INPUT_EVENT_SIZE];
        loop {
            if let Err(err) = self.inner.read_exact(&mut event) {
                return if err.kind() == io::ErrorKind::UnexpectedEof {
                    Ok(None)
                } else {
                    Err(err)
                };
            }
            let kind = u16::from_ne_bytes([event[16], event[17]]);
            let code = u16::from_ne_bytes([event[18], event[19]]);
            let value = i32::from_ne_bytes([event[20], event[21], event[22], event[23]]);
            if kind != EV_KEY || value != KEY_VALUE_DOWN {
                continue;
            }
            if code == KEY_ENTER {
                let complete = buffer.trim().to_string();
                if complete.is_empty() {
                    continue;
                }
                return Ok(Some(complete));
            }
            if let Some(ch) = hid_key_to_char(code) {
                buffer.push(ch);
            }
        }
    }
}

/// Linux keycode to character, for the subset a badge scanner emits.
fn hid_key_to_char(code: u16) -> Option<char> {
    match code {
        2..=10 => char::from_digit(u32::from(code) - 1, 10),
        11 => Some('0'),
        12 => Some('-'),
        13 => Some('='),
        16 => Some('q'),
        17 => Some('w'),
        18 => Some('e'),
        19 => Some('r'),
        20 => Some('t'),
        21 => Some('y'),
        22 => Some('u'),
        23 => Some('i'),
        24 => Some('o'),
        25 => Some('p'),
        30 => Some('a'),
        31 => Some('s'),
        32 => Some('d'),
        33 => Some('f'),
        34 => Some('g'),
        35 => Some('h'),
        36 => Some('j'),
        37 => Some('k'),
        38 => Some('l'),
        43 => Some('\\'),
        44 => Some('z'),
        45 => Some('x'),
        46 => Some('c'),
        47 => Some('v'),
        48 => Some('b'),
        49 => Some('n'),
        50 => Some('m'),
        53 => Some('/'),
        _ => None,
    }
}

/// Scripted reader for tests and dry runs.
#[derive(Debug, Default)]
pub struct SimulatedReader {
    codes: VecDeque<String>,
}

impl SimulatedReader {
    pub fn new(codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

impl LaneReader for SimulatedReader {
    fn next_code(&mut self) -> io::Result<Option<String>> {
        Ok(self.codes.pop_front())
    }
}

/// Drain one lane reader into the shared queue until EOF or queue close.
/// Codes shorter than the minimum are reader noise (partial reads, line
/// fragments) and are dropped here, before they cost a dispatch.
pub fn run_reader<R: LaneReader>(
    mut reader: R,
    lane: &LaneConfig,
    min_code_length: usize,
    queue: &mpsc::Sender<ScannedCode>,
) {
    loop {
        match reader.next_code() {
            Ok(Some(code)) => {
                if code.len() < min_code_length {
                    continue;
                }
                let scan = ScannedCode {
                    direction: lane.direction,
                    device_id: lane.device_id.clone(),
                    code,
                    scanned_at: Utc::now(),
                };
                println!(
                    "scanner_daemon scanned lane={} direction={} token={}",
                    lane.device_id,
                    lane.direction.as_str(),
                    mask_token(&scan.code)
                );
                if queue.blocking_send(scan).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                // Hardware hiccups on the lane are transient; back off and
                // keep the lane alive rather than killing the task.
                eprintln!("scanner_daemon reader_error lane={} err={err}", lane.device_id);
                thread::sleep(READER_ERROR_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use turnstile_contracts::admission::DeclaredDirection;

    use crate::config::LaneMode;

    fn lane(direction: DeclaredDirection) -> LaneConfig {
        LaneConfig {
            direction,
            device_id: "turnstile-entry-1".to_string(),
            source_path: None,
            mode: LaneMode::Line,
        }
    }

    fn key_event(code: u16, value: i32) -> [u8; INPUT_EVENT_SIZE] {
        let mut event = [0u8; INPUT_EVENT_SIZE];
        event[16..18].copy_from_slice(&EV_KEY.to_ne_bytes());
        event[18..20].copy_from_slice(&code.to_ne_bytes());
        event[20..24].copy_from_slice(&value.to_ne_bytes());
        event
    }

    fn key_press(code: u16) -> Vec<[u8; INPUT_EVENT_SIZE]> {
        vec![key_event(code, 1), key_event(code, 0)]
    }

    #[test]
    fn short_fragments_never_reach_the_queue() {
        let (tx, mut rx) = mpsc::channel(8);
        let reader = SimulatedReader::new(["AB", "AB12CD", "X", "ZZ99YY"]);
        run_reader(reader, &lane(DeclaredDirection::In), 4, &tx);
        drop(tx);

        let mut codes = Vec::new();
        while let Ok(scan) = rx.try_recv() {
            codes.push(scan.code);
        }
        assert_eq!(codes, vec!["AB12CD".to_string(), "ZZ99YY".to_string()]);
    }

    #[test]
    fn hid_reader_decodes_key_downs_until_enter() {
        // "ab12" typed by a keyboard-emulation scanner, then Enter.
        let mut stream = Vec::new();
        for code in [30u16, 48, 2, 3] {
            for event in key_press(code) {
                stream.extend_from_slice(&event);
            }
        }
        stream.extend_from_slice(&key_event(KEY_ENTER, 1));

        let mut reader = HidKeycodeReader::new(Cursor::new(stream));
        assert_eq!(reader.next_code().unwrap(), Some("ab12".to_string()));
        assert_eq!(reader.next_code().unwrap(), None);
    }

    #[test]
    fn hid_reader_skips_releases_unknown_keys_and_empty_codes() {
        let mut stream = Vec::new();
        // Enter with nothing buffered is noise, not an empty code.
        stream.extend_from_slice(&key_event(KEY_ENTER, 1));
        // Shift (42) has no mapping; releases (value 0) never buffer.
        stream.extend_from_slice(&key_event(42, 1));
        for event in key_press(16) {
            stream.extend_from_slice(&event);
        }
        for event in key_press(11) {
            stream.extend_from_slice(&event);
        }
        stream.extend_from_slice(&key_event(KEY_ENTER, 1));

        let mut reader = HidKeycodeReader::new(Cursor::new(stream));
        assert_eq!(reader.next_code().unwrap(), Some("q0".to_string()));
    }

    #[test]
    fn line_reader_trims_terminators_and_tags_the_lane() {
        let (tx, mut rx) = mpsc::channel(8);
        let reader = LineReader::new(Cursor::new(b"AB12CD\r\nZZ99YY\n".to_vec()));
        run_reader(reader, &lane(DeclaredDirection::Out), 4, &tx);
        drop(tx);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.code, "AB12CD");
        assert_eq!(first.direction, DeclaredDirection::Out);
        assert_eq!(rx.try_recv().unwrap().code, "ZZ99YY");
    }
}
