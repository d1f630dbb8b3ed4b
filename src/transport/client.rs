//! rumqttc 기반 MQTT 구독 클라이언트
//!
//! 연결 수립, 구독, 이벤트 루프 구동을 담당합니다.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, MqttConfig};
use crate::transformer::TransformEngine;

/// 이벤트 루프 오류 후 재시도까지 대기 시간
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// 요청 채널 기본 용량
const MIN_CHANNEL_CAPACITY: usize = 16;

/// Transport 모듈 에러 타입
#[derive(Error, Debug)]
pub enum TransportError {
    /// 잘못된 브로커 설정
    #[error("Invalid MQTT settings: {0}")]
    Config(#[from] ConfigError),

    /// 브로커 연결 실패
    #[error("Failed to connect to MQTT broker {broker}: {source}")]
    Connect {
        broker: String,
        #[source]
        source: rumqttc::ConnectionError,
    },

    /// 브로커가 연결을 거부함
    #[error("MQTT broker {broker} refused the connection: {code:?}")]
    Refused {
        broker: String,
        code: ConnectReturnCode,
    },

    /// 구독 요청 실패
    #[error("Failed to subscribe to '{filter}': {source}")]
    Subscribe {
        filter: String,
        #[source]
        source: rumqttc::ClientError,
    },
}

/// Transport 결과 타입
pub type TransportResult<T> = Result<T, TransportError>;

/// MQTT 구독 클라이언트
///
/// 토픽 필터마다 QoS 0 구독을 하나씩 등록합니다.
pub struct MqttSubscriber {
    broker: String,
    client: AsyncClient,
    eventloop: EventLoop,
    filters: Vec<String>,
}

impl MqttSubscriber {
    /// 새 구독 클라이언트 생성
    ///
    /// 네트워크 연결은 `connect()` 호출 시 이루어집니다.
    pub fn new(config: &MqttConfig, filters: Vec<String>) -> TransportResult<Self> {
        let (host, port) = config.broker_address()?;

        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);

        // 구독 요청이 이벤트 루프 구동 전에 모두 채널에 들어갈 수 있어야 함
        let capacity = MIN_CHANNEL_CAPACITY.max(filters.len() * 2);
        let (client, eventloop) = AsyncClient::new(options, capacity);

        Ok(Self {
            broker: config.broker.clone(),
            client,
            eventloop,
            filters,
        })
    }

    /// 구독 대상 토픽 필터
    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// 브로커 연결 후 모든 필터 구독
    ///
    /// CONNACK을 받을 때까지 이벤트 루프를 구동합니다. 이 단계의 실패는
    /// 재시도하지 않고 호출자에게 반환됩니다.
    #[instrument(skip(self), fields(broker = %self.broker))]
    pub async fn connect(&mut self) -> TransportResult<()> {
        loop {
            let event = self
                .eventloop
                .poll()
                .await
                .map_err(|source| TransportError::Connect {
                    broker: self.broker.clone(),
                    source,
                })?;

            if let Event::Incoming(Packet::ConnAck(ack)) = event {
                if ack.code != ConnectReturnCode::Success {
                    return Err(TransportError::Refused {
                        broker: self.broker.clone(),
                        code: ack.code,
                    });
                }
                break;
            }
        }

        info!("Connected to MQTT broker");

        for filter in &self.filters {
            self.client
                .subscribe(filter.as_str(), QoS::AtMostOnce)
                .await
                .map_err(|source| TransportError::Subscribe {
                    filter: filter.clone(),
                    source,
                })?;
            info!(topic = %filter, "Subscribed");
        }

        Ok(())
    }

    /// 이벤트 루프 구동
    ///
    /// 수신한 PUBLISH를 엔진으로 전달합니다. 오류는 로그로 남기고 1초 후
    /// 다시 폴링합니다. 재연결 시 구독을 다시 등록합니다.
    pub async fn run(mut self, engine: TransformEngine) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        topic = %publish.topic,
                        bytes = publish.payload.len(),
                        "Message received"
                    );
                    engine.process(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(code = ?ack.code, "Reconnected to MQTT broker");
                    self.resubscribe();
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(broker = %self.broker, error = %e, "MQTT event loop error");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }

    fn resubscribe(&self) {
        for filter in &self.filters {
            if let Err(e) = self.client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                warn!(topic = %filter, error = %e, "Failed to resubscribe");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_broker() {
        let config = MqttConfig {
            broker: "http://localhost:1883".to_string(),
            ..MqttConfig::default()
        };

        let result = MqttSubscriber::new(&config, vec!["a/b".to_string()]);
        assert!(matches!(result, Err(TransportError::Config(_))));
    }

    #[tokio::test]
    async fn test_new_keeps_filters() {
        let subscriber = MqttSubscriber::new(
            &MqttConfig::default(),
            vec!["sensors/+/temp".to_string(), "power/#".to_string()],
        )
        .unwrap();

        assert_eq!(subscriber.filters(), ["sensors/+/temp", "power/#"]);
    }

    #[tokio::test]
    async fn test_connect_fails_without_broker() {
        let config = MqttConfig {
            // Port 1 on loopback is closed in any sane test environment
            broker: "tcp://127.0.0.1:1".to_string(),
            ..MqttConfig::default()
        };

        let mut subscriber = MqttSubscriber::new(&config, vec![]).unwrap();
        let result = subscriber.connect().await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
