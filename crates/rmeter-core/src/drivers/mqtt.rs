//! MQTT driver built on `rumqttc`. `AsyncClient` only queues control packets;
//! somebody has to keep polling the paired `EventLoop` or nothing actually
//! goes over the wire. Each connect spawns that polling loop as a background
//! task tied to the [`crate::registry::MqttHandle`] stored in the registry,
//! aborted automatically when the handle is dropped.

use std::time::{Duration, Instant};

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

use crate::operation::{MqttQos, Operation, Outcome};
use crate::registry::{ConnectionHandle, ConnectionRegistry, MqttHandle, RegistryKey};

fn key(broker: &str, port: u16, client_id: &str) -> RegistryKey {
    RegistryKey::new("mqtt", format!("{broker}:{port}/{client_id}"))
}

fn to_rumqttc_qos(qos: MqttQos) -> QoS {
    match qos {
        MqttQos::AtMostOnce => QoS::AtMostOnce,
        MqttQos::AtLeastOnce => QoS::AtLeastOnce,
        MqttQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub async fn execute(op: &Operation, registry: &mut ConnectionRegistry) -> Outcome {
    match op {
        Operation::MqttConnect { broker, port, client_id, username, password, keep_alive_secs, .. } => {
            connect(broker, *port, client_id, username.as_deref(), password.as_deref(), *keep_alive_secs, registry)
                .await
        }
        Operation::MqttPublish { broker, port, client_id, topic, payload, qos, retain, .. } => {
            publish(broker, *port, client_id, topic, payload, *qos, *retain, registry).await
        }
        Operation::MqttSubscribe { broker, port, client_id, topic, qos, .. } => {
            subscribe(broker, *port, client_id, topic, *qos, registry).await
        }
        Operation::MqttUnsubscribe { broker, port, client_id, topic, .. } => {
            unsubscribe(broker, *port, client_id, topic, registry).await
        }
        Operation::MqttDisconnect { broker, port, client_id } => disconnect(broker, *port, client_id, registry).await,
        _ => Outcome::failure(0, "internal", "mqtt driver received a non-mqtt operation"),
    }
}

async fn connect(
    broker: &str,
    port: u16,
    client_id: &str,
    username: Option<&str>,
    password: Option<&str>,
    keep_alive_secs: u16,
    registry: &mut ConnectionRegistry,
) -> Outcome {
    let mut options = MqttOptions::new(client_id, broker, port);
    options.set_keep_alive(Duration::from_secs(keep_alive_secs as u64));
    if let (Some(user), Some(pass)) = (username, password) {
        options.set_credentials(user, pass);
    }

    let (client, mut event_loop) = AsyncClient::new(options, 64);

    let start = Instant::now();
    let connected = loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => break Ok(ack),
            Ok(_) => continue,
            Err(e) => break Err(e),
        }
    };

    let ack = match connected {
        Ok(ack) => ack,
        Err(e) => return Outcome::failure(0, "connection_refused", e.to_string()),
    };
    let response_time_us = start.elapsed().as_micros() as u64;

    let event_loop_task = tokio::spawn(async move {
        loop {
            if event_loop.poll().await.is_err() {
                break;
            }
        }
    });

    registry.insert(key(broker, port, client_id), ConnectionHandle::Mqtt(MqttHandle { client, event_loop_task }));

    Outcome {
        success: true,
        status_code: ack.code as i32,
        response_time_us,
        body: String::new(),
        headers: Default::default(),
        error: None,
        protocol_data: None,
    }
}

async fn publish(
    broker: &str,
    port: u16,
    client_id: &str,
    topic: &str,
    payload: &str,
    qos: MqttQos,
    retain: bool,
    registry: &mut ConnectionRegistry,
) -> Outcome {
    let handle = match take_mqtt(registry, &key(broker, port, client_id)) {
        Ok(h) => h,
        Err(outcome) => return outcome,
    };

    let start = Instant::now();
    let result = handle.client.publish(topic, to_rumqttc_qos(qos), retain, payload.as_bytes()).await;
    let response_time_us = start.elapsed().as_micros() as u64;
    let outcome = match result {
        Ok(()) => success_outcome(response_time_us),
        Err(e) => Outcome::failure(0, "connection_lost", e.to_string()),
    };
    registry.insert(key(broker, port, client_id), ConnectionHandle::Mqtt(handle));
    outcome
}

async fn subscribe(
    broker: &str,
    port: u16,
    client_id: &str,
    topic: &str,
    qos: MqttQos,
    registry: &mut ConnectionRegistry,
) -> Outcome {
    let handle = match take_mqtt(registry, &key(broker, port, client_id)) {
        Ok(h) => h,
        Err(outcome) => return outcome,
    };

    let start = Instant::now();
    let result = handle.client.subscribe(topic, to_rumqttc_qos(qos)).await;
    let response_time_us = start.elapsed().as_micros() as u64;
    let outcome = match result {
        Ok(()) => success_outcome(response_time_us),
        Err(e) => Outcome::failure(0, "connection_lost", e.to_string()),
    };
    registry.insert(key(broker, port, client_id), ConnectionHandle::Mqtt(handle));
    outcome
}

async fn unsubscribe(
    broker: &str,
    port: u16,
    client_id: &str,
    topic: &str,
    registry: &mut ConnectionRegistry,
) -> Outcome {
    let handle = match take_mqtt(registry, &key(broker, port, client_id)) {
        Ok(h) => h,
        Err(outcome) => return outcome,
    };

    let start = Instant::now();
    let result = handle.client.unsubscribe(topic).await;
    let response_time_us = start.elapsed().as_micros() as u64;
    let outcome = match result {
        Ok(()) => success_outcome(response_time_us),
        Err(e) => Outcome::failure(0, "connection_lost", e.to_string()),
    };
    registry.insert(key(broker, port, client_id), ConnectionHandle::Mqtt(handle));
    outcome
}

async fn disconnect(broker: &str, port: u16, client_id: &str, registry: &mut ConnectionRegistry) -> Outcome {
    let handle = match take_mqtt(registry, &key(broker, port, client_id)) {
        Ok(h) => h,
        Err(outcome) => return outcome,
    };

    let start = Instant::now();
    let result = handle.client.disconnect().await;
    let response_time_us = start.elapsed().as_micros() as u64;

    match result {
        Ok(()) => success_outcome(response_time_us),
        Err(e) => Outcome::failure(0, "connection_lost", e.to_string()),
    }
}

fn take_mqtt(registry: &mut ConnectionRegistry, key: &RegistryKey) -> Result<MqttHandle, Outcome> {
    match registry.take(key) {
        Some(ConnectionHandle::Mqtt(handle)) => Ok(handle),
        Some(other) => {
            registry.insert(key.clone(), other);
            Err(Outcome::failure(0, "protocol_error", "handle type mismatch for mqtt key"))
        }
        None => Err(Outcome::failure(0, "no_connection", key.endpoint.clone())),
    }
}

fn success_outcome(response_time_us: u64) -> Outcome {
    Outcome {
        success: true,
        status_code: 0,
        response_time_us,
        body: String::new(),
        headers: Default::default(),
        error: None,
        protocol_data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_connect_yields_no_connection() {
        let mut registry = ConnectionRegistry::new();
        let outcome = publish("localhost", 1883, "vu-1", "topic/a", "hi", MqttQos::AtMostOnce, false, &mut registry)
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("no_connection"));
    }

    #[tokio::test]
    async fn subscribe_without_connect_yields_no_connection() {
        let mut registry = ConnectionRegistry::new();
        let outcome = subscribe("localhost", 1883, "vu-1", "topic/a", MqttQos::AtLeastOnce, &mut registry).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("no_connection"));
    }

    #[test]
    fn qos_maps_to_rumqttc_variants() {
        assert_eq!(to_rumqttc_qos(MqttQos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_rumqttc_qos(MqttQos::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(to_rumqttc_qos(MqttQos::ExactlyOnce), QoS::ExactlyOnce);
    }
}
