//! Interactive console bridging the operator's terminal and the board UART
//!
//! Two reader threads frame lines from the operator and from the serial
//! port and feed them into one shared channel; the loop drains that channel
//! and keeps the prompt intact while device output interleaves with typing.
//! Ctrl+C arrives through the same channel, so the channel receive is the
//! loop's only suspension point.

use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, warn};
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::serial::SerialConnection;

/// Operator prompt, redrawn after every line of device output
pub const PROMPT: &str = "> ";

/// Notice printed when the session ends on Ctrl+C
const EXIT_NOTICE: &str = "\nExiting...\n";

/// Capacity of the shared event channel
const EVENT_BUFFER: usize = 64;

/// One event from either input source.
///
/// Both sources feed the same channel, so the loop observes events in
/// arrival order with no priority between them.
#[derive(Debug)]
pub enum ConsoleEvent {
    /// A line typed by the operator, line delimiter already stripped
    Operator(String),
    /// A raw line received from the serial port, `\n` already stripped
    Serial(Vec<u8>),
    /// The serial reader hit a transport error; the session cannot continue
    Disconnected(anyhow::Error),
    /// Ctrl+C
    Interrupted,
}

/// Create the shared event channel both readers feed into
pub fn event_channel() -> (Sender<ConsoleEvent>, Receiver<ConsoleEvent>) {
    mpsc::channel(EVENT_BUFFER)
}

/// Spawn the operator input reader.
///
/// Reads lines from `input` on a dedicated thread and forwards them as
/// [`ConsoleEvent::Operator`]. The thread ends on EOF, on a read error, or
/// once the receiving loop is gone.
pub fn spawn_operator_reader<R>(input: R, events: Sender<ConsoleEvent>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            match line {
                Ok(line) => {
                    if events.blocking_send(ConsoleEvent::Operator(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("operator input error: {}", e);
                    break;
                }
            }
        }
        debug!("operator input closed");
    })
}

/// Spawn the serial reader.
///
/// Polls `conn` on a dedicated thread, forwarding each framed line as
/// [`ConsoleEvent::Serial`]. Read timeouts are idle polls; they also let
/// the thread observe `running` and exit shortly after the loop ends. A
/// transport error is forwarded as [`ConsoleEvent::Disconnected`] and ends
/// the thread.
pub fn spawn_serial_reader(
    mut conn: SerialConnection,
    events: Sender<ConsoleEvent>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            match conn.read_line() {
                Ok(Some(line)) => {
                    if events.blocking_send(ConsoleEvent::Serial(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    let _ = events.blocking_send(ConsoleEvent::Disconnected(e));
                    break;
                }
            }
        }
        debug!("serial reader stopped");
    })
}

/// Forward Ctrl+C into the event channel.
///
/// Keeps the loop single-threaded with respect to its own state: the
/// interrupt is observed between events, never in the middle of a dispatch.
pub fn spawn_interrupt_watcher(events: Sender<ConsoleEvent>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = events.send(ConsoleEvent::Interrupted).await;
        }
    });
}

/// Interactive console over an open serial channel.
///
/// Owns the serial write half and the operator output; the read halves of
/// both sources arrive through the event channel.
pub struct Console<S, W> {
    serial: S,
    output: W,
    capture: Option<BufWriter<File>>,
}

impl<S: Write, W: Write> Console<S, W> {
    pub fn new(serial: S, output: W) -> Self {
        Self {
            serial,
            output,
            capture: None,
        }
    }

    /// Record the session to `path`, one timestamped line per console line
    pub fn with_capture(mut self, path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create capture file: {}", path.display()))?;
        self.capture = Some(BufWriter::new(file));
        Ok(self)
    }

    /// Run the console until the operator interrupts or the channel closes.
    ///
    /// Serial write failures and transport errors reported by the reader
    /// propagate to the caller; an interrupt prints an exit notice and is a
    /// normal return. The dispatch of each event completes before the next
    /// event (or the interrupt) is observed.
    pub async fn run(&mut self, events: &mut Receiver<ConsoleEvent>) -> Result<()> {
        self.draw_prompt()?;

        while let Some(event) = events.recv().await {
            match event {
                ConsoleEvent::Operator(line) => self.forward_line(&line)?,
                ConsoleEvent::Serial(raw) => self.display_line(&raw)?,
                ConsoleEvent::Disconnected(err) => {
                    return Err(err).context("Serial connection lost")
                }
                ConsoleEvent::Interrupted => {
                    self.output.write_all(EXIT_NOTICE.as_bytes())?;
                    self.output.flush()?;
                    return Ok(());
                }
            }
        }

        // Every sender is gone; nothing left to bridge.
        Ok(())
    }

    /// Forward one operator line to the device as `line + "\n"`.
    ///
    /// An empty line still goes out as a bare newline.
    fn forward_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim_end();
        self.serial
            .write_all(line.as_bytes())
            .context("Failed to write to serial port")?;
        self.serial
            .write_all(b"\n")
            .context("Failed to write to serial port")?;
        self.serial
            .flush()
            .context("Failed to flush serial port")?;
        self.capture_line(PROMPT, line);
        Ok(())
    }

    /// Display one line of device output and redraw the prompt.
    ///
    /// The leading carriage return overwrites any partial operator input on
    /// the current display line.
    fn display_line(&mut self, raw: &[u8]) -> Result<()> {
        let text = decode_dropping_invalid(raw);
        let line = text.trim_end();
        self.output.write_all(b"\r")?;
        self.output.write_all(line.as_bytes())?;
        self.output.write_all(b"\n\n")?;
        self.output.flush()?;
        self.capture_line("", line);
        self.draw_prompt()
    }

    fn draw_prompt(&mut self) -> Result<()> {
        self.output.write_all(PROMPT.as_bytes())?;
        self.output
            .flush()
            .context("Failed to flush operator output")?;
        Ok(())
    }

    /// Append one line to the session capture, if enabled.
    ///
    /// A capture failure never takes the session down; it is logged and the
    /// writer is dropped.
    fn capture_line(&mut self, prefix: &str, line: &str) {
        if let Some(ref mut writer) = self.capture {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let result =
                writeln!(writer, "[{}] {}{}", timestamp, prefix, line).and_then(|_| writer.flush());
            if let Err(e) = result {
                warn!("session capture failed, disabling: {}", e);
                self.capture = None;
            }
        }
    }
}

/// Decode device output permissively.
///
/// Byte sequences that are not valid UTF-8 are dropped, not replaced; line
/// noise shortens the text instead of stopping the session.
pub fn decode_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => bytes = &rest[len..],
                    None => break,
                }
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn console() -> Console<Vec<u8>, Vec<u8>> {
        Console::new(Vec::new(), Vec::new())
    }

    #[test]
    fn test_forwards_operator_line_with_newline() {
        let mut c = console();
        c.forward_line("help").unwrap();
        assert_eq!(c.serial, b"help\n");
    }

    #[test]
    fn test_empty_operator_line_forwards_bare_newline() {
        let mut c = console();
        c.forward_line("").unwrap();
        assert_eq!(c.serial, b"\n");
    }

    #[test]
    fn test_strips_trailing_whitespace_before_forwarding() {
        let mut c = console();
        c.forward_line("status  \t").unwrap();
        assert_eq!(c.serial, b"status\n");
    }

    #[test]
    fn test_plain_line_round_trips_modulo_delimiter() {
        let mut c = console();
        c.forward_line("peek 0x2000_0000").unwrap();
        assert_eq!(c.serial, b"peek 0x2000_0000\n");
    }

    #[test]
    fn test_displayed_line_sits_between_redraw_and_prompt() {
        let mut c = console();
        c.display_line(b"OK\r").unwrap();
        let out = String::from_utf8(c.output.clone()).unwrap();
        assert_eq!(out, "\rOK\n\n> ");
    }

    #[test]
    fn test_drops_undecodable_bytes() {
        assert_eq!(decode_dropping_invalid(b"ab\xffcd"), "abcd");
        assert_eq!(decode_dropping_invalid(b"\xf0\x9f"), "");
        assert_eq!(decode_dropping_invalid("h\u{e9}llo".as_bytes()), "h\u{e9}llo");
    }

    #[test]
    fn test_undecodable_line_does_not_halt_display() {
        let mut c = console();
        c.display_line(b"\xff\xfeOK").unwrap();
        let out = String::from_utf8(c.output.clone()).unwrap();
        assert_eq!(out, "\rOK\n\n> ");
    }

    #[tokio::test]
    async fn test_run_processes_events_in_arrival_order() {
        let (tx, mut rx) = event_channel();
        tx.send(ConsoleEvent::Operator("help".to_string()))
            .await
            .unwrap();
        tx.send(ConsoleEvent::Serial(b"OK".to_vec())).await.unwrap();
        tx.send(ConsoleEvent::Interrupted).await.unwrap();

        let mut c = console();
        c.run(&mut rx).await.unwrap();

        assert_eq!(c.serial, b"help\n");
        let out = String::from_utf8(c.output).unwrap();
        assert_eq!(out, "> \rOK\n\n> \nExiting...\n");
    }

    #[tokio::test]
    async fn test_interrupt_stops_the_loop_before_later_events() {
        let (tx, mut rx) = event_channel();
        tx.send(ConsoleEvent::Interrupted).await.unwrap();
        tx.send(ConsoleEvent::Operator("late".to_string()))
            .await
            .unwrap();

        let mut c = console();
        c.run(&mut rx).await.unwrap();

        assert!(c.serial.is_empty());
        let out = String::from_utf8(c.output).unwrap();
        assert_eq!(out, "> \nExiting...\n");
    }

    #[tokio::test]
    async fn test_disconnect_propagates_as_error() {
        let (tx, mut rx) = event_channel();
        tx.send(ConsoleEvent::Disconnected(anyhow!("device unplugged")))
            .await
            .unwrap();

        let mut c = console();
        let err = c.run(&mut rx).await.unwrap_err();
        assert!(err.to_string().contains("Serial connection lost"));
    }

    #[tokio::test]
    async fn test_closed_channel_ends_the_loop() {
        let (tx, mut rx) = event_channel();
        drop(tx);

        let mut c = console();
        c.run(&mut rx).await.unwrap();
        assert_eq!(c.output, b"> ");
    }

    #[test]
    fn test_capture_records_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.log");

        let mut c = console().with_capture(&path).unwrap();
        c.forward_line("ping").unwrap();
        c.display_line(b"pong").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("> ping"));
        assert!(lines[1].starts_with('['));
        assert!(lines[1].ends_with("pong"));
    }

    #[test]
    fn test_operator_reader_forwards_lines_until_eof() {
        let (tx, mut rx) = event_channel();
        let input = std::io::Cursor::new(b"help\nstatus\n".to_vec());
        let handle = spawn_operator_reader(input, tx);
        handle.join().unwrap();

        match rx.blocking_recv() {
            Some(ConsoleEvent::Operator(line)) => assert_eq!(line, "help"),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.blocking_recv() {
            Some(ConsoleEvent::Operator(line)) => assert_eq!(line, "status"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.blocking_recv().is_none());
    }
}
