//! Serial port configuration and connection management
//!
//! Opens the UART console of an RP2350 board (USB CDC-ACM, or a
//! USB-to-serial adapter on the debug header) and frames its output into
//! lines for the console loop.

use anyhow::{Context, Result};
use colored::Colorize;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Default baud rate for the RP2350 UART console
pub const RP2350_DEFAULT_BAUD: u32 = 115200;

/// Configuration for serial port connection
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Serial port path (e.g. /dev/ttyACM0, /dev/ttyUSB0)
    pub port_path: String,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Data bits (default: 8)
    pub data_bits: DataBits,
    /// Parity (default: None)
    pub parity: Parity,
    /// Stop bits (default: 1)
    pub stop_bits: StopBits,
    /// Flow control (default: None)
    pub flow_control: FlowControl,
    /// Read timeout; bounds how long a blocked reader waits between polls
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from("/dev/ttyACM0"),
            baud_rate: RP2350_DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: Duration::from_secs(1),
        }
    }
}

impl PortConfig {
    /// Create a new configuration with default RP2350 console settings
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An open serial connection to the board console.
///
/// Reads are line-framed; writes go through the [`Write`] impl so the
/// console loop can treat the connection like any other byte sink.
pub struct SerialConnection {
    port: Box<dyn SerialPort>,
    config: PortConfig,
}

impl SerialConnection {
    /// Open a serial connection with the given configuration
    pub fn open(config: PortConfig) -> Result<Self> {
        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.timeout)
            .open()
            .with_context(|| format!("Failed to open serial port: {}", config.port_path))?;

        Ok(Self { port, config })
    }

    /// Get an independent handle to the same port.
    ///
    /// The reader thread takes one handle while the console loop keeps the
    /// other for writes.
    pub fn try_clone(&self) -> Result<Self> {
        let port = self
            .port
            .try_clone()
            .with_context(|| format!("Failed to clone handle for {}", self.config.port_path))?;

        Ok(Self {
            port,
            config: self.config.clone(),
        })
    }

    /// Read one line from the serial port as raw bytes.
    ///
    /// Returns the bytes up to (and excluding) the next `\n`. A read
    /// timeout yields `None` when nothing was buffered, or the partial
    /// line accumulated so far. Decoding is left to the caller.
    pub fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buffer = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    buffer.push(byte[0]);
                }
                Ok(0) => {
                    if buffer.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
                Ok(_) => unreachable!(),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                    if buffer.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Read error on {}", self.config.port_path))
                }
            }
        }

        Ok(Some(buffer))
    }
}

impl Write for SerialConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

/// Information about a detected serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// List all available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().with_context(|| "Failed to enumerate serial ports")?;

    let port_infos: Vec<PortInfo> = ports
        .into_iter()
        .map(|p| {
            let port_type = match p.port_type {
                serialport::SerialPortType::UsbPort(_) => PortType::UsbSerial,
                serialport::SerialPortType::PciPort => PortType::PciSerial,
                serialport::SerialPortType::BluetoothPort => PortType::Bluetooth,
                serialport::SerialPortType::Unknown => PortType::Unknown,
            };

            PortInfo {
                path: p.port_name,
                port_type,
            }
        })
        .collect();

    Ok(port_infos)
}

/// List serial ports with likely board consoles first.
///
/// The RP2350 console enumerates as CDC-ACM, so `ttyACM` nodes sort ahead
/// of everything else.
pub fn detect_console_ports() -> Result<Vec<PortInfo>> {
    let mut ports = list_ports()?;
    ports.sort_by_key(|p| !p.path.contains("ttyACM"));
    Ok(ports)
}

/// Print formatted list of available serial ports
pub fn print_ports() -> Result<()> {
    let ports = detect_console_ports()?;

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Connect the board's USB console or a USB-to-serial adapter");
        println!("  2. Check if the device is recognized: ls -la /dev/ttyACM* /dev/ttyUSB*");
        println!("  3. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        println!("  4. Check dmesg for connection events: dmesg | tail -20");
        return Ok(());
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in &ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "{}",
        format!(
            "Use: probe-console connect -d {} -b {} -l openocd.log",
            ports[0].path, RP2350_DEFAULT_BAUD
        )
        .yellow()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PortConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.port_path, "/dev/ttyACM0");
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_config_builder() {
        let config = PortConfig::new("/dev/ttyUSB0")
            .with_baud_rate(9600)
            .with_timeout(Duration::from_secs(2));

        assert_eq!(config.port_path, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_port_type_display() {
        assert_eq!(PortType::UsbSerial.to_string(), "USB Serial");
        assert_eq!(PortType::Unknown.to_string(), "Unknown");
    }
}
