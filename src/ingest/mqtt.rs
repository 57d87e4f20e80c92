//! MQTT subscriber feeding the [`IngestDispatcher`].

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};

use super::IngestDispatcher;
use crate::config::MqttConfig;

/// Builds the client and its event loop from configuration.
pub fn connect(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }
    AsyncClient::new(options, 64)
}

/// Polls the broker forever, handing each publish to the dispatcher in
/// arrival order.
///
/// Subscriptions are re-issued on every connection acknowledgement, since a
/// reconnect starts a clean session.
pub async fn run(config: MqttConfig, dispatcher: IngestDispatcher) {
    let (client, mut eventloop) = connect(&config);
    let filters = dispatcher.subscriptions();
    let backoff = Duration::from_secs(config.reconnect_delay_secs.max(1));

    tracing::info!(
        "Connecting to MQTT broker {}:{} as {}",
        config.host,
        config.port,
        config.client_id
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("MQTT connected, subscribing to {:?}", filters);
                for filter in &filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                        tracing::warn!(topic = %filter, error = %e, "Subscribe failed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatcher.dispatch(&publish.topic, &publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection error, retrying in {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_applies_config() {
        let config = MqttConfig {
            client_id: "test-client".to_string(),
            keep_alive_secs: 1,
            ..MqttConfig::default()
        };
        let (_client, eventloop) = connect(&config);
        assert_eq!(eventloop.mqtt_options.client_id(), "test-client");
        assert_eq!(eventloop.mqtt_options.keep_alive(), Duration::from_secs(5));
        assert_eq!(
            eventloop.mqtt_options.broker_address(),
            ("localhost".to_string(), 1883)
        );
    }
}
