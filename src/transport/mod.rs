//! MQTT 메시지 수신 모듈
//!
//! 브로커에 연결하여 설정된 토픽 필터를 구독하고, 수신한 메시지를
//! 변환 파이프라인으로 전달합니다. 토픽 필터 검증과 매칭은 `rumqttc`가
//! 제공하는 함수를 사용합니다.
//!
//! # Example
//!
//! ```ignore
//! use mqtt_exporter::transport::MqttSubscriber;
//!
//! let mut subscriber = MqttSubscriber::new(&config.mqtt, filters)?;
//! subscriber.connect().await?;
//! subscriber.run(engine).await;
//! ```

mod client;

pub use client::{MqttSubscriber, TransportError, TransportResult};
