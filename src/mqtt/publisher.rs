//! MQTT publisher with an explicit network task
//!
//! The rumqttc event loop runs as its own tokio task for the lifetime of the
//! bridge. It owns all socket I/O, the client library's reconnects, and the
//! delivery of queued publishes. The first connection outcome is handed back
//! to [`MqttPublisher::connect`] through a oneshot channel, and shutdown is
//! an explicit handshake: queue DISCONNECT, wait for the task to drain, force
//! the stop signal if it does not, then join.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::mqtt::RecordSink;
use colored::Colorize;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Capacity of the client's request queue
const REQUEST_CAPACITY: usize = 100;

/// How long a graceful DISCONNECT may take before the task is stopped
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Pause between polls after a connection error, while rumqttc reconnects
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

type ConnectOutcome = Result<()>;

struct NetworkTask {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Publishing half of an MQTT connection
pub struct MqttPublisher {
    client: AsyncClient,
    broker: String,
    runtime: Handle,
    network: Option<NetworkTask>,
}

impl MqttPublisher {
    /// Connect to the configured broker and wait for the handshake.
    ///
    /// Must be called from within a tokio runtime; the network task is
    /// spawned onto it.
    pub async fn connect(config: &BridgeConfig) -> Result<Self> {
        let client_id = config.client_id.clone().unwrap_or_else(generate_client_id);
        let broker = format!("{}:{}", config.broker_host, config.broker_port);

        let mut options = MqttOptions::new(&client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keepalive);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (connected_tx, connected_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        log::debug!("Connecting to MQTT broker {} as '{}'", broker, client_id);

        let handle = tokio::spawn(run_network_loop(
            eventloop,
            connected_tx,
            stop_rx,
            config.broker_host.clone(),
            config.broker_port,
        ));

        let outcome = match tokio::time::timeout(config.connect_timeout, connected_rx).await {
            Ok(Ok(outcome)) => outcome,
            // the task dropped the sender without reporting, or never answered
            Ok(Err(_)) | Err(_) => Err(BridgeError::MqttTimeout {
                host: config.broker_host.clone(),
                port: config.broker_port,
            }),
        };

        if let Err(e) = outcome {
            match &e {
                BridgeError::MqttRefused(code) => println!(
                    "{} MQTT connection failed with code {}",
                    "[ERROR]".red().bold(),
                    code
                ),
                other => println!("{} {}", "[ERROR]".red().bold(), other),
            }
            let _ = stop_tx.send(());
            let _ = handle.await;
            return Err(e);
        }

        println!(
            "{} Connected to MQTT broker at {}",
            "[OK]".green().bold(),
            config.broker_host.white().bold()
        );

        Ok(Self {
            client,
            broker,
            runtime: Handle::current(),
            network: Some(NetworkTask { stop_tx, handle }),
        })
    }

    /// Broker address as `host:port`
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Whether the network task is still attached
    pub fn is_connected(&self) -> bool {
        self.network.is_some()
    }
}

impl RecordSink for MqttPublisher {
    fn publish(&mut self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<()> {
        match self.client.try_publish(topic, qos, false, payload) {
            Ok(()) => Ok(()),
            // rumqttc stops draining requests while it reconnects
            Err(ClientError::TryRequest(_)) => Err(BridgeError::QueueFull {
                topic: topic.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocks until the network task has exited; call from a blocking
    /// context, never from inside an async task.
    fn disconnect(&mut self) {
        let Some(NetworkTask { stop_tx, mut handle }) = self.network.take() else {
            return;
        };

        if let Err(e) = self.client.try_disconnect() {
            log::debug!("Could not queue MQTT DISCONNECT: {}", e);
        }

        let broker = self.broker.clone();
        self.runtime.block_on(async move {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
                log::warn!("MQTT network task for {} did not drain, stopping it", broker);
                let _ = stop_tx.send(());
                let _ = handle.await;
            }
        });

        log::debug!("Disconnected from MQTT broker {}", self.broker());
    }
}

/// Drive the rumqttc event loop until DISCONNECT is sent, the client is
/// dropped, or the stop signal fires.
async fn run_network_loop(
    mut eventloop: EventLoop,
    connected_tx: oneshot::Sender<ConnectOutcome>,
    mut stop_rx: oneshot::Receiver<()>,
    host: String,
    port: u16,
) {
    let mut connected_tx = Some(connected_tx);

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop_rx => {
                log::debug!("MQTT network task for {}:{} stopped", host, port);
                break;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let code = ack.code as u8;
                match connected_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(if code == 0 {
                            Ok(())
                        } else {
                            Err(BridgeError::MqttRefused(code))
                        });
                    }
                    None => log::info!("Reconnected to MQTT broker {}:{}", host, port),
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log::debug!("MQTT DISCONNECT sent to {}:{}", host, port);
                break;
            }
            Ok(event) => log::trace!("MQTT event: {:?}", event),
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                if let Some(tx) = connected_tx.take() {
                    let outcome = match e {
                        ConnectionError::ConnectionRefused(code) => {
                            Err(BridgeError::MqttRefused(code as u8))
                        }
                        source => Err(BridgeError::MqttConnect {
                            host: host.clone(),
                            port,
                            source,
                        }),
                    };
                    let _ = tx.send(outcome);
                    break;
                }

                log::warn!("MQTT connection error on {}:{}: {}", host, port, e);
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(RECONNECT_PAUSE) => {}
                }
            }
        }
    }
}

/// Generate a client id unique enough for a single bridge instance
fn generate_client_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("uart-bridge-{:x}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_generated_client_id() {
        let id = generate_client_id();
        assert!(id.starts_with("uart-bridge-"));
        assert!(id.len() > "uart-bridge-".len());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // grab a free port, then release it so nothing is listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = BridgeConfig::default().with_broker("127.0.0.1", port);

        let err = MqttPublisher::connect(&config).await.err().unwrap();
        assert!(matches!(err, BridgeError::MqttConnect { .. }));
    }

    #[tokio::test]
    async fn test_connect_times_out_without_connack() {
        // accepts TCP but never answers the MQTT handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut config = BridgeConfig::default().with_broker("127.0.0.1", port);
        config.connect_timeout = Duration::from_millis(300);

        let err = MqttPublisher::connect(&config).await.err().unwrap();
        assert!(matches!(err, BridgeError::MqttTimeout { .. }));
        server.abort();
    }
}
