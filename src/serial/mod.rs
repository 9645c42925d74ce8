//! Serial console module
//!
//! This module provides:
//! - Serial port configuration, connection, and line framing
//! - The interactive console loop bridging the port to the operator's
//!   terminal

pub mod console;
pub mod port;

pub use console::{Console, ConsoleEvent};
pub use port::{PortConfig, SerialConnection};
