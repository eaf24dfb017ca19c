//! `rumqttc` implementation of the protocol engine

use super::engine::{ConnectSettings, MessageChunk, ProtocolEngine, Publisher, WaitOutcome};
use super::error::CommsError;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter,
    SubscribeReasonCode, Transport,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Upper bound for flushing the DISCONNECT packet on teardown
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
    handshake_timeout: Duration,
}

/// Drives one `rumqttc` session at a time
#[derive(Default)]
pub struct MqttEngine {
    session: Option<Session>,
    /// Publishes that arrived while waiting for a SUBACK
    pending: VecDeque<MessageChunk>,
}

impl MqttEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn options(settings: &ConnectSettings) -> MqttOptions {
        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.host.clone(),
            settings.port,
        );
        options
            .set_keep_alive(settings.keep_alive)
            .set_clean_session(true);

        if let Some((user, password)) = &settings.credentials {
            options.set_credentials(user.clone(), password.clone());
        }
        if settings.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Clone of the session's client, usable from any thread
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), CommsError> {
        self.client
            .try_publish(topic, qos, false, payload)
            .map_err(|e| CommsError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

impl ProtocolEngine for MqttEngine {
    type Publisher = MqttPublisher;

    async fn connect(&mut self, settings: &ConnectSettings) -> Result<MqttPublisher, CommsError> {
        // a stale session must not leak into the new one
        self.disconnect().await;

        info!(
            "MQTT connect: {}:{} as {} (tls: {})",
            settings.host, settings.port, settings.client_id, settings.use_tls
        );

        let (client, mut eventloop) =
            AsyncClient::new(Self::options(settings), settings.request_capacity);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(format!("broker refused connection: {:?}", ack.code))
                        };
                    }
                    Ok(event) => debug!("Handshake event: {:?}", event),
                    Err(e) => return Err(e.to_string()),
                }
            }
        };

        let outcome = timeout(settings.handshake_timeout, handshake).await;
        match outcome {
            Ok(Ok(())) => {
                info!("MQTT session established");
                self.session = Some(Session {
                    client: client.clone(),
                    eventloop,
                    handshake_timeout: settings.handshake_timeout,
                });
                Ok(MqttPublisher { client })
            }
            Ok(Err(reason)) => Err(CommsError::Connect {
                host: settings.host.clone(),
                port: settings.port,
                reason,
            }),
            Err(_) => Err(CommsError::HandshakeTimeout(
                settings.handshake_timeout.as_millis() as u64,
            )),
        }
    }

    async fn subscribe(&mut self, topics: Vec<String>, qos: QoS) -> Result<(), CommsError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CommsError::Subscribe("no session".to_string()))?;

        let filters: Vec<SubscribeFilter> = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), qos))
            .collect();

        session
            .client
            .subscribe_many(filters)
            .await
            .map_err(|e| CommsError::Subscribe(e.to_string()))?;

        let deadline = Instant::now() + session.handshake_timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, session.eventloop.poll()).await {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => return Err(CommsError::Subscribe(e.to_string())),
                Err(_) => return Err(CommsError::Subscribe("SUBACK timed out".to_string())),
            };

            match event {
                Event::Incoming(Packet::SubAck(ack)) => {
                    for (topic, code) in topics.iter().zip(ack.return_codes.iter()) {
                        match code {
                            SubscribeReasonCode::Success(granted) => {
                                debug!("Subscribed {} at {:?}", topic, granted)
                            }
                            SubscribeReasonCode::Failure => {
                                return Err(CommsError::SubscribeRefused(topic.clone()))
                            }
                        }
                    }
                    if ack.return_codes.len() != topics.len() {
                        return Err(CommsError::Subscribe(format!(
                            "SUBACK carried {} codes for {} topics",
                            ack.return_codes.len(),
                            topics.len()
                        )));
                    }
                    info!("Subscribed to {} topics", topics.len());
                    return Ok(());
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    self.pending
                        .push_back(MessageChunk::whole(publish.topic, publish.payload.to_vec()));
                }
                other => debug!("Subscribe event: {:?}", other),
            }
        }
    }

    async fn wait_for_message(&mut self, wait: Duration) -> WaitOutcome {
        if let Some(chunk) = self.pending.pop_front() {
            return WaitOutcome::Message(chunk);
        }

        let Some(session) = self.session.as_mut() else {
            return WaitOutcome::Disconnected("no session".to_string());
        };

        let deadline = Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, session.eventloop.poll()).await {
                Err(_) => return WaitOutcome::Idle,
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    return WaitOutcome::Message(MessageChunk::whole(
                        publish.topic,
                        publish.payload.to_vec(),
                    ));
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    return WaitOutcome::Disconnected("broker sent DISCONNECT".to_string());
                }
                Ok(Ok(event)) => debug!("MQTT event: {:?}", event),
                Ok(Err(e)) => return WaitOutcome::Disconnected(e.to_string()),
            }
        }
    }

    async fn disconnect(&mut self) {
        self.pending.clear();

        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Err(e) = session.client.disconnect().await {
            debug!("MQTT disconnect request failed: {}", e);
        }

        // poll until the DISCONNECT is on the wire or the loop gives up
        let drain = async {
            loop {
                match session.eventloop.poll().await {
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        };
        if timeout(DISCONNECT_GRACE, drain).await.is_err() {
            warn!("MQTT disconnect did not complete in time");
        }
        info!("MQTT session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn settings(port: u16) -> ConnectSettings {
        ConnectSettings {
            host: "127.0.0.1".to_string(),
            port,
            use_tls: false,
            client_id: "altair-7".to_string(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            handshake_timeout: Duration::from_millis(300),
            request_capacity: 10,
        }
    }

    #[test]
    fn options_carry_identity_credentials_and_tls() {
        let mut connect = settings(8883);
        connect.use_tls = true;
        connect.credentials = Some(("altair".to_string(), "8800".to_string()));

        let options = MqttEngine::options(&connect);

        assert_eq!(options.client_id(), "altair-7");
        assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 8883));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.clean_session());
        assert_eq!(
            options.credentials(),
            Some(("altair".to_string(), "8800".to_string()))
        );
        assert!(matches!(options.transport(), Transport::Tls(_)));
    }

    #[test]
    fn plain_options_have_no_credentials() {
        let options = MqttEngine::options(&settings(1883));
        assert_eq!(options.credentials(), None);
        assert!(matches!(options.transport(), Transport::Tcp));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut engine = MqttEngine::new();
        let result = tokio::time::timeout(Duration::from_secs(5), engine.connect(&settings(port)))
            .await
            .expect("connect gives up");

        assert!(matches!(result, Err(CommsError::Connect { port: p, .. }) if p == port));
        assert!(matches!(
            engine.wait_for_message(Duration::from_millis(10)).await,
            WaitOutcome::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn silent_broker_times_out_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // accept and never answer the CONNECT
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut engine = MqttEngine::new();
        let result = engine.connect(&settings(port)).await;

        assert!(matches!(result, Err(CommsError::HandshakeTimeout(300))));
        server.abort();
    }

    #[tokio::test]
    async fn no_session_reports_disconnected() {
        let mut engine = MqttEngine::new();

        assert!(matches!(
            engine.wait_for_message(Duration::from_millis(10)).await,
            WaitOutcome::Disconnected(_)
        ));
        assert!(matches!(
            engine
                .subscribe(vec!["altair/7/dev/ctrl".to_string()], QoS::AtLeastOnce)
                .await,
            Err(CommsError::Subscribe(_))
        ));
    }

    #[tokio::test]
    async fn queued_messages_come_before_polling() {
        let mut engine = MqttEngine::new();
        engine
            .pending
            .push_back(MessageChunk::whole("altair/7/dev/console", b"A".to_vec()));
        engine
            .pending
            .push_back(MessageChunk::whole("altair/7/dev/paste", b"B".to_vec()));

        match engine.wait_for_message(Duration::from_millis(10)).await {
            WaitOutcome::Message(chunk) => {
                assert_eq!(chunk.topic, "altair/7/dev/console");
                assert!(chunk.first && chunk.last);
            }
            other => panic!("expected queued message, got {:?}", other),
        }

        engine.disconnect().await;
        assert!(matches!(
            engine.wait_for_message(Duration::from_millis(10)).await,
            WaitOutcome::Disconnected(_)
        ));
    }
}
