use anyhow::{Context, Result};
use std::time::Duration;

use super::{AlertCommand, AlertSink, LineLink};

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Buzzer controller on a serial port.
///
/// Opening the port resets most USB microcontroller boards, so `open` waits
/// `settle` before sending the initial `STATUS` ping.
pub struct SerialAlertSink {
    port_name: String,
    link: LineLink<Box<dyn serialport::SerialPort>>,
}

impl SerialAlertSink {
    pub fn open(port_name: &str, baud_rate: u32, settle: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(WRITE_TIMEOUT)
            .open()
            .with_context(|| format!("open serial port {} at {} baud", port_name, baud_rate))?;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }

        let mut sink = Self {
            port_name: port_name.to_string(),
            link: LineLink::new(port),
        };
        sink.status()
            .with_context(|| format!("status ping on {}", port_name))?;
        log::info!("alert controller connected on {}", port_name);
        Ok(sink)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl AlertSink for SerialAlertSink {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn send(&mut self, command: AlertCommand) -> Result<()> {
        self.link
            .send(command)
            .with_context(|| format!("serial port {}", self.port_name))
    }
}
