//! DepositEventPublisher processor.
//!
//! Receives [`DepositEvent`]s from the scanners and the confirmation engine,
//! reloads the deposit and hands a [`DepositNotification`] downstream: it is
//! always logged, and POSTed as JSON when a sink URL is configured. Delivery
//! is best effort; a failed POST is logged and not retried.

use std::sync::Arc;
use std::time::Duration;

use coinvault_sdk::objects::DepositNotification;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::entities::Deposit;
use crate::events::{DepositEvent, DepositEventReceiver};
use crate::ledger::{Ledger, LedgerError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("deposit not found: {0}")]
    DepositNotFound(i64),

    #[error("delivery failed with status {status}: {body}")]
    DeliveryFailed { status: u16, body: String },
}

pub fn notification(event: &DepositEvent, deposit: &Deposit) -> DepositNotification {
    DepositNotification {
        event_type: event.event_type().to_string(),
        deposit_id: deposit.id,
        client_id: deposit.client_id,
        coin_symbol: deposit.coin_symbol.clone(),
        tx_hash: deposit.tx_hash.clone(),
        amount: format!("{:.8}", deposit.amount),
        status: deposit.status.into(),
        block_height: deposit.detail.block_height,
        timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
    }
}

pub struct DepositEventPublisher {
    ledger: Arc<dyn Ledger>,
    events_rx: DepositEventReceiver,
    shutdown_rx: watch::Receiver<bool>,
    sink: Option<Url>,
    http_client: reqwest::Client,
}

impl DepositEventPublisher {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        events_rx: DepositEventReceiver,
        shutdown_rx: watch::Receiver<bool>,
        sink: Option<Url>,
    ) -> Result<Self, PublishError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            ledger,
            events_rx,
            shutdown_rx,
            sink,
            http_client,
        })
    }

    pub async fn run(mut self) {
        info!(sink = ?self.sink.as_ref().map(Url::as_str), "DepositEventPublisher started");

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("DepositEventPublisher received shutdown signal");
                        self.drain().await;
                        break;
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    debug!(event = %event, "Received DepositEvent");
                    if let Err(e) = self.process_event(&event).await {
                        error!(event = %event, error = %e, "Failed to publish DepositEvent");
                    }
                }

                else => {
                    info!("DepositEvent channel closed");
                    break;
                }
            }
        }

        info!("DepositEventPublisher shutdown complete");
    }

    /// Publish whatever is already buffered without waiting for more.
    async fn drain(&mut self) {
        let mut drained = 0usize;
        while let Ok(event) = self.events_rx.try_recv() {
            if let Err(e) = self.process_event(&event).await {
                error!(event = %event, error = %e, "Failed to publish DepositEvent");
            }
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "Published buffered DepositEvents before shutdown");
        }
    }

    async fn process_event(&self, event: &DepositEvent) -> Result<DepositNotification, PublishError> {
        let deposit = self
            .ledger
            .get_deposit(event.deposit_id())
            .await?
            .ok_or(PublishError::DepositNotFound(event.deposit_id()))?;
        let payload = notification(event, &deposit);

        info!(
            event_type = %payload.event_type,
            deposit_id = payload.deposit_id,
            client_id = payload.client_id,
            coin = %payload.coin_symbol,
            amount = %payload.amount,
            status = %payload.status,
            "Deposit event"
        );

        if let Some(sink) = &self.sink {
            self.deliver(sink, &payload).await?;
        }
        Ok(payload)
    }

    async fn deliver(&self, sink: &Url, payload: &DepositNotification) -> Result<(), PublishError> {
        let response = self
            .http_client
            .post(sink.clone())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(deposit_id = payload.deposit_id, status = %status, "Deposit event delivery rejected");
            Err(PublishError::DeliveryFailed {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DepositInsert, DepositStatus};
    use crate::events::{DEFAULT_CHANNEL_BUFFER, deposit_event_channel};
    use crate::testing::{self, MemoryLedger};
    use coinvault_sdk::objects::DepositStatus as SdkDepositStatus;
    use ethers::types::Address;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    async fn seeded() -> (Arc<MemoryLedger>, i64) {
        let ledger = MemoryLedger::new();
        let id = ledger
            .insert_deposit(
                DepositInsert {
                    client_id: 7,
                    addr_path: "3".to_string(),
                    coin_symbol: "USDT".to_string(),
                    tx_hash: "0xabc".to_string(),
                    amount: Decimal::from_str("12.5").unwrap(),
                    fee_amount: Decimal::ZERO,
                    fee_symbol: "ETH".to_string(),
                    detail: testing::detail(41, Address::repeat_byte(9), Address::repeat_byte(1)),
                },
                DepositStatus::Confirmed,
            )
            .await;
        (ledger, id)
    }

    #[tokio::test]
    async fn builds_notification_from_current_row() {
        let (ledger, id) = seeded().await;
        let (_tx, rx) = deposit_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let publisher = DepositEventPublisher::new(ledger, rx, shutdown_rx, None).unwrap();

        let payload = publisher
            .process_event(&DepositEvent::Confirmed {
                deposit_id: id,
                coin_symbol: "USDT".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(payload.event_type, "deposit.confirmed");
        assert_eq!(payload.client_id, 7);
        assert_eq!(payload.amount, "12.50000000");
        assert_eq!(payload.status, SdkDepositStatus::Confirmed);
        assert_eq!(payload.block_height, 41);
    }

    #[tokio::test]
    async fn unknown_deposit_is_an_error() {
        let (ledger, _) = seeded().await;
        let (_tx, rx) = deposit_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let publisher = DepositEventPublisher::new(ledger, rx, shutdown_rx, None).unwrap();

        let result = publisher
            .process_event(&DepositEvent::Created {
                deposit_id: 999,
                coin_symbol: "USDT".to_string(),
            })
            .await;

        assert!(matches!(result, Err(PublishError::DepositNotFound(999))));
    }

    #[tokio::test]
    async fn stops_when_channel_closes() {
        let (ledger, id) = seeded().await;
        let (tx, rx) = deposit_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let publisher = DepositEventPublisher::new(ledger, rx, shutdown_rx, None).unwrap();

        tx.send(DepositEvent::Created {
            deposit_id: id,
            coin_symbol: "USDT".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), publisher.run())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (ledger, _) = seeded().await;
        let (_tx, rx) = deposit_event_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let publisher = DepositEventPublisher::new(ledger, rx, shutdown_rx, None).unwrap();

        let handle = tokio::spawn(publisher.run());
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_buffered_events() {
        let (ledger, id) = seeded().await;
        let (tx, rx) = deposit_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut publisher = DepositEventPublisher::new(ledger, rx, shutdown_rx, None).unwrap();

        for _ in 0..5 {
            tx.send(DepositEvent::Created {
                deposit_id: id,
                coin_symbol: "USDT".to_string(),
            })
            .await
            .unwrap();
        }
        assert_eq!(tx.capacity(), DEFAULT_CHANNEL_BUFFER - 5);

        publisher.drain().await;

        assert_eq!(tx.capacity(), DEFAULT_CHANNEL_BUFFER);
        assert!(publisher.events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreachable_sink_is_a_request_error() {
        let (ledger, id) = seeded().await;
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let sink = Url::parse(&format!("http://{}/hook", listener.local_addr().unwrap())).unwrap();
        drop(listener);
        let (_tx, rx) = deposit_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let publisher = DepositEventPublisher::new(ledger, rx, shutdown_rx, Some(sink)).unwrap();

        let result = publisher
            .process_event(&DepositEvent::Created {
                deposit_id: id,
                coin_symbol: "USDT".to_string(),
            })
            .await;

        assert!(matches!(result, Err(PublishError::Request(_))));
    }
}
