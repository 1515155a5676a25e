use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::time::Duration;

use super::{AlertCommand, AlertSink};

const AVAILABILITY_TOPIC_SUFFIX: &str = "status";
const ALERT_TOPIC_SUFFIX: &str = "alert";
const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";

/// Publishes alert commands to an MQTT broker, for buzzers (or phones) that
/// listen on a topic instead of a serial line.
///
/// - `<prefix>/alert`: command payload (`MONKEY_DETECTED`, `STOP_ALERT`, ...).
///   Activate / deactivate are retained so late subscribers see the state.
/// - `<prefix>/status`: `online` / `offline`, with a last will.
pub struct MqttAlertSink {
    client: Client,
    alert_topic: String,
    availability_topic: String,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttAlertSink {
    pub fn connect(broker_addr: &str, client_id: &str, topic_prefix: &str) -> Result<Self> {
        let (host, port) = parse_broker_addr(broker_addr)?;
        let availability_topic = format!("{}/{}", topic_prefix, AVAILABILITY_TOPIC_SUFFIX);

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        let will = rumqttc::v5::mqttbytes::v5::LastWill::new(
            &availability_topic,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        );
        options.set_last_will(will);

        let (client, connection) = Client::new(options, 10);
        let connection_handle = spawn_event_loop(connection);

        client
            .publish(
                availability_topic.as_str(),
                QoS::AtLeastOnce,
                true,
                PAYLOAD_ONLINE.as_bytes().to_vec(),
            )
            .context("publish mqtt availability")?;
        log::info!("alert broker {} (topic prefix {})", broker_addr, topic_prefix);

        Ok(Self {
            client,
            alert_topic: format!("{}/{}", topic_prefix, ALERT_TOPIC_SUFFIX),
            availability_topic,
            connection_handle: Some(connection_handle),
        })
    }

    pub fn alert_topic(&self) -> &str {
        &self.alert_topic
    }
}

fn spawn_event_loop(mut connection: Connection) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

impl AlertSink for MqttAlertSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn send(&mut self, command: AlertCommand) -> Result<()> {
        let retain = matches!(command, AlertCommand::Activate | AlertCommand::Deactivate);
        self.client
            .publish(
                self.alert_topic.as_str(),
                QoS::AtLeastOnce,
                retain,
                command.wire_name().as_bytes().to_vec(),
            )
            .with_context(|| format!("publish {} to {}", command, self.alert_topic))?;
        Ok(())
    }
}

impl Drop for MqttAlertSink {
    fn drop(&mut self) {
        let _ = self.client.publish(
            self.availability_topic.as_str(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
        );
        let _ = self.client.disconnect();
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let addr = addr.trim().trim_start_matches("mqtt://");
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("mqtt broker address must be host:port, got '{}'", addr))?;
    if host.is_empty() {
        return Err(anyhow!("mqtt broker host is empty"));
    }
    let port = port
        .parse()
        .map_err(|_| anyhow!("invalid mqtt broker port '{}'", port))?;
    Ok((host.to_string(), port))
}
