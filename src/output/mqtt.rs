//! MQTT publisher backed by `rumqttc`.
//!
//! The client's event loop runs in its own task and reconnects on its own;
//! publishing only enqueues a request, so a down broker never stalls a scan
//! cycle.

use super::{PublishError, Publisher};
use rumqttc::{AsyncClient, ClientError, Event, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Outstanding requests before `publish` starts failing.
const REQUEST_CAPACITY: usize = 32;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// How long `close` waits for queued messages to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub retain: bool,
}

impl From<ClientError> for PublishError {
    fn from(err: ClientError) -> Self {
        PublishError::Bus(err.to_string())
    }
}

pub struct MqttPublisher {
    client: AsyncClient,
    retain: bool,
    eventloop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create the client and spawn its event loop on the current runtime.
    pub fn connect(settings: &MqttSettings) -> Self {
        let mut options =
            MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((username, password)) = &settings.credentials {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let broker = format!("{}:{}", settings.host, settings.port);

        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!(%broker, "connected to MQTT broker");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        tracing::debug!(%broker, "disconnected from MQTT broker");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(%err, %broker, "MQTT connection error, retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Self {
            client,
            retain: settings.retain,
            eventloop: task,
        }
    }

    /// Disconnect after the queued messages have been sent.
    ///
    /// Gives up after a few seconds if the broker is unreachable.
    pub async fn close(self) {
        if let Err(err) = self.client.disconnect().await {
            tracing::warn!(%err, "failed to queue MQTT disconnect");
            self.eventloop.abort();
            return;
        }
        if tokio::time::timeout(CLOSE_TIMEOUT, self.eventloop).await.is_err() {
            tracing::warn!("MQTT broker did not acknowledge queued messages before shutdown");
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, self.retain, payload.as_bytes().to_vec())?;
        Ok(())
    }
}
