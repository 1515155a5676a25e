//! Alert sinks.
//!
//! The buzzer controller speaks a line protocol: one ASCII command per line,
//! `\n` terminated.
//!
//! | command           | meaning                     |
//! |-------------------|-----------------------------|
//! | `MONKEY_DETECTED` | start the buzzer            |
//! | `STOP_ALERT`      | silence the buzzer          |
//! | `TEST`            | short test beep             |
//! | `STATUS`          | ping after the port opens   |
//!
//! Delivery is best-effort. Sinks return errors, and the session logs them and
//! keeps going.

mod mqtt;
#[cfg(feature = "alert-serial")]
mod serial;

use anyhow::{anyhow, Context, Result};
use std::io::Write;

use crate::config::{AlertKind, AlertSettings};

pub use mqtt::MqttAlertSink;
#[cfg(feature = "alert-serial")]
pub use serial::SerialAlertSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertCommand {
    Activate,
    Deactivate,
    Test,
    Status,
}

impl AlertCommand {
    pub fn wire_name(self) -> &'static str {
        match self {
            AlertCommand::Activate => "MONKEY_DETECTED",
            AlertCommand::Deactivate => "STOP_ALERT",
            AlertCommand::Test => "TEST",
            AlertCommand::Status => "STATUS",
        }
    }
}

impl std::fmt::Display for AlertCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Hardware (or stand-in) alert output.
pub trait AlertSink: Send {
    fn name(&self) -> &'static str;

    fn send(&mut self, command: AlertCommand) -> Result<()>;

    fn activate(&mut self) -> Result<()> {
        self.send(AlertCommand::Activate)
    }

    fn deactivate(&mut self) -> Result<()> {
        self.send(AlertCommand::Deactivate)
    }

    fn test(&mut self) -> Result<()> {
        self.send(AlertCommand::Test)
    }

    fn status(&mut self) -> Result<()> {
        self.send(AlertCommand::Status)
    }
}

impl<S: AlertSink + ?Sized> AlertSink for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn send(&mut self, command: AlertCommand) -> Result<()> {
        (**self).send(command)
    }
}

/// Writes the line protocol to any byte sink (serial port, pipe, buffer).
pub struct LineLink<W: Write + Send> {
    writer: W,
    sent: u64,
}

impl<W: Write + Send> LineLink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, sent: 0 }
    }

    pub fn commands_sent(&self) -> u64 {
        self.sent
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> AlertSink for LineLink<W> {
    fn name(&self) -> &'static str {
        "line"
    }

    fn send(&mut self, command: AlertCommand) -> Result<()> {
        self.writer
            .write_all(format!("{}\n", command.wire_name()).as_bytes())
            .with_context(|| format!("write {} to alert link", command))?;
        self.writer.flush().context("flush alert link")?;
        self.sent += 1;
        Ok(())
    }
}

/// No hardware attached: commands are logged only.
#[derive(Default)]
pub struct LogAlertSink {
    pub active: bool,
}

impl AlertSink for LogAlertSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&mut self, command: AlertCommand) -> Result<()> {
        match command {
            AlertCommand::Activate => self.active = true,
            AlertCommand::Deactivate => self.active = false,
            AlertCommand::Test | AlertCommand::Status => {}
        }
        log::info!("alert: {} (no hardware attached)", command);
        Ok(())
    }
}

/// Open the sink described by `settings`.
pub fn open_alert_sink(settings: &AlertSettings) -> Result<Box<dyn AlertSink>> {
    match settings.kind {
        AlertKind::Log => Ok(Box::new(LogAlertSink::default())),
        AlertKind::Serial => {
            let port = settings
                .serial_port
                .as_deref()
                .ok_or_else(|| anyhow!("serial alerts require a serial port"))?;
            #[cfg(feature = "alert-serial")]
            {
                let sink = SerialAlertSink::open(port, settings.baud_rate, settings.settle)?;
                Ok(Box::new(sink))
            }
            #[cfg(not(feature = "alert-serial"))]
            {
                Err(anyhow!(
                    "serial alerts on {} require the alert-serial feature",
                    port
                ))
            }
        }
        AlertKind::Mqtt => {
            let sink = MqttAlertSink::connect(
                &settings.mqtt_broker_addr,
                &settings.mqtt_client_id,
                &settings.mqtt_topic_prefix,
            )?;
            Ok(Box::new(sink))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "unplugged",
            ))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn line_link_writes_newline_terminated_commands() {
        let mut link = LineLink::new(Vec::new());
        link.status().unwrap();
        link.activate().unwrap();
        link.deactivate().unwrap();
        link.test().unwrap();

        assert_eq!(link.commands_sent(), 4);
        assert_eq!(
            String::from_utf8(link.into_inner()).unwrap(),
            "STATUS\nMONKEY_DETECTED\nSTOP_ALERT\nTEST\n"
        );
    }

    #[test]
    fn line_link_reports_write_failures() {
        let mut link = LineLink::new(BrokenPipe);
        let err = link.activate().unwrap_err();
        assert!(err.to_string().contains("MONKEY_DETECTED"));
        assert_eq!(link.commands_sent(), 0);
    }

    #[test]
    fn log_sink_tracks_buzzer_state() {
        let mut sink = LogAlertSink::default();
        sink.activate().unwrap();
        assert!(sink.active);
        sink.test().unwrap();
        assert!(sink.active);
        sink.deactivate().unwrap();
        assert!(!sink.active);
    }
}
