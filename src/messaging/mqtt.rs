use anyhow::Result;
use log::{info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::db::models::{CreateAccident, Location, Severity};
use crate::error::Error;
use crate::services::AccidentService;

/// Inbound device report. Firmware revisions publish the image under either
/// `image` or `imageBase64`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceReport {
    image: Option<String>,
    image_base64: Option<String>,
    location: Option<Location>,
    severity: Option<Severity>,
    device_id: Option<String>,
}

/// Bridges the device MQTT topic into the shared creation path.
///
/// Runs as a long-lived background task with its own reconnect loop;
/// per-message failures are logged and never take the subscription down.
pub struct MqttIngest {
    config: BrokerConfig,
    service: Arc<AccidentService>,
}

impl MqttIngest {
    pub fn new(config: BrokerConfig, service: Arc<AccidentService>) -> Self {
        Self { config, service }
    }

    /// Start the bridge as a detached task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let delay = Duration::from_secs(self.config.reconnect_delay_secs);

        loop {
            if let Err(e) = self.connect_and_listen().await {
                warn!("MQTT connection lost: {}", e);
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_listen(&self) -> Result<()> {
        let (host, port) = parse_broker_url(&self.config.url)?;
        let client_id = format!("trafficwatch-{}", Uuid::new_v4());

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        info!("Connecting to MQTT broker: {}", self.config.url);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    client
                        .subscribe(&self.config.topic, QoS::AtLeastOnce)
                        .await
                        .map_err(|e| {
                            Error::Broker(format!(
                                "Failed to subscribe to {}: {}",
                                self.config.topic, e
                            ))
                        })?;
                    info!("Subscribed to topic: {}", self.config.topic);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Err(e) = self.handle_message(&publish.topic, &publish.payload).await {
                        warn!("Dropping message on [{}]: {}", publish.topic, e);
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(Error::Broker(e.to_string()).into()),
            }
        }
    }

    /// Handle one device report; failures are isolated per message
    pub(crate) async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<()> {
        info!("MQTT message on [{}] ({} bytes)", topic, payload.len());

        let report: DeviceReport =
            serde_json::from_slice(payload).map_err(|e| Error::Malformed(e.to_string()))?;

        let image_base64 = match report.image.or(report.image_base64) {
            Some(image) => image,
            None => {
                warn!("MQTT message missing image data, skipping");
                return Ok(());
            }
        };

        let device_id = report
            .device_id
            .unwrap_or_else(|| "unknown".to_string());
        info!("Accident report from device: {}", device_id);

        self.service
            .create(CreateAccident {
                image_base64,
                location: Some(report.location.unwrap_or_default()),
                severity: report.severity,
                device_id: Some(device_id),
            })
            .await?;

        Ok(())
    }
}

fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = match stripped.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid broker port: {}", port)))?;
            (host.to_string(), port)
        }
        None => (stripped.to_string(), 1883),
    };

    if host.is_empty() {
        return Err(Error::Config(format!("Invalid broker URL: {}", url)).into());
    }

    Ok((host, port))
}

#[cfg(test)]
mod url_tests {
    use super::parse_broker_url;

    #[test]
    fn parses_scheme_host_and_port() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local:1884").unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(
            parse_broker_url("tcp://10.0.0.1:1883").unwrap(),
            ("10.0.0.1".to_string(), 1883)
        );
    }

    #[test]
    fn defaults_to_standard_port() {
        assert_eq!(
            parse_broker_url("mqtt://localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(parse_broker_url("mqtt://").is_err());
        assert!(parse_broker_url("mqtt://host:notaport").is_err());
    }
}
