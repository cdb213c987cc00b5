use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, pull},
    stream::{RetentionPolicy, StorageType},
};
use error_stack::{Report, ResultExt};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::bus::{Bus, Delivery};
use crate::error::BusError;

/// The three streams spec.md §4.5 names: file-backed, work-queue retention
/// (acked messages removed), 1-hour max age.
const STREAMS: [(&str, &str); 3] = [
    ("CANDLES", "candles.1m.>"),
    ("METRICS", "metrics.>"),
    ("ALERTS", "alerts.>"),
];

fn stream_for_subject(subject: &str) -> &'static str {
    if subject.starts_with("candles.") {
        "CANDLES"
    } else if subject.starts_with("metrics.") {
        "METRICS"
    } else {
        "ALERTS"
    }
}

pub struct NatsBus {
    jetstream: jetstream::Context,
}

impl NatsBus {
    pub async fn connect(url: &str) -> Result<Self, Report<BusError>> {
        let client = async_nats::connect(url)
            .await
            .change_context(BusError::Connection)?;
        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }

    /// Creates `CANDLES`/`METRICS`/`ALERTS` if they do not already exist.
    /// Idempotent — safe to call from every binary at startup.
    pub async fn ensure_streams(&self) -> Result<(), Report<BusError>> {
        for (name, subject) in STREAMS {
            self.jetstream
                .get_or_create_stream(jetstream::stream::Config {
                    name: name.to_string(),
                    subjects: vec![subject.to_string()],
                    retention: RetentionPolicy::WorkQueue,
                    max_age: Duration::from_secs(3600),
                    storage: StorageType::File,
                    ..Default::default()
                })
                .await
                .change_context(BusError::StreamSetup {
                    stream: name.to_string(),
                })?;
        }
        Ok(())
    }
}

impl Bus for NatsBus {
    fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), Report<BusError>>> {
        let subject = subject.to_owned();
        Box::pin(async move {
            let ack = self
                .jetstream
                .publish(subject.clone(), payload.into())
                .await
                .change_context(BusError::Publish {
                    subject: subject.clone(),
                })?;
            ack.await.change_context(BusError::Publish { subject })?;
            Ok(())
        })
    }

    fn subscribe(
        &self,
        subject: &str,
        durable_name: &str,
    ) -> BoxFuture<'_, Result<BoxStream<'static, Delivery>, Report<BusError>>> {
        let subject = subject.to_owned();
        let durable_name = durable_name.to_owned();
        Box::pin(async move {
            let stream = self
                .jetstream
                .get_stream(stream_for_subject(&subject))
                .await
                .change_context(BusError::ConsumerSetup {
                    consumer: durable_name.clone(),
                })?;

            let consumer: jetstream::consumer::PullConsumer = stream
                .get_or_create_consumer(
                    &durable_name,
                    pull::Config {
                        durable_name: Some(durable_name.clone()),
                        filter_subject: subject.clone(),
                        ack_policy: AckPolicy::Explicit,
                        ..Default::default()
                    },
                )
                .await
                .change_context(BusError::ConsumerSetup {
                    consumer: durable_name.clone(),
                })?;

            let messages =
                consumer
                    .messages()
                    .await
                    .change_context(BusError::ConsumerSetup {
                        consumer: durable_name,
                    })?;

            let delivered = messages.filter_map(|result| async move {
                let message = result.ok()?;
                let payload = message.payload.to_vec();
                Some(Delivery::new(payload, move || {
                    Box::pin(async move {
                        message
                            .ack()
                            .await
                            .map_err(|_| Report::new(BusError::Ack))
                    }) as BoxFuture<'static, Result<(), Report<BusError>>>
                }))
            });

            Ok(Box::pin(delivered) as BoxStream<'static, Delivery>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_maps_to_declared_stream() {
        assert_eq!(stream_for_subject("candles.1m.BTCUSDT"), "CANDLES");
        assert_eq!(stream_for_subject("metrics.calculated"), "METRICS");
        assert_eq!(stream_for_subject("alerts.triggered"), "ALERTS");
    }
}
