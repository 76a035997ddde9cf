//! MQTT side of the bridge

pub mod publisher;

pub use publisher::MqttPublisher;

use crate::error::Result;
use rumqttc::QoS;

/// Destination for serialized records.
///
/// [`MqttPublisher`] is the production implementation; the bridge loop only
/// talks to this trait.
pub trait RecordSink {
    /// Queue `payload` for delivery on `topic`. Does not wait for the broker.
    fn publish(&mut self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<()>;

    /// Tear down the session. Safe to call more than once.
    fn disconnect(&mut self);
}
