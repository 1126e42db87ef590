//! Fire-and-forget forwarding of rated costs to the credit ledger.

use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::CdrSave;
use crate::services::metrics::record_ledger_message;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerMessage {
    /// A period was rated for the first time.
    Consumption {
        cdr_id: Uuid,
        organization_id: String,
        period_from: NaiveDate,
        period_to: NaiveDate,
        amount: f64,
    },
    /// A period was re-rated; `delta` is what the ledger has to move.
    Adjustment {
        cdr_id: Uuid,
        organization_id: String,
        period_from: NaiveDate,
        period_to: NaiveDate,
        previous_amount: f64,
        amount: f64,
        delta: f64,
    },
}

impl LedgerMessage {
    pub fn from_save(saved: &CdrSave) -> Self {
        match saved {
            CdrSave::Created(record) => LedgerMessage::Consumption {
                cdr_id: record.cdr_id,
                organization_id: record.organization_id.clone(),
                period_from: record.period_from,
                period_to: record.period_to,
                amount: record.net_cost,
            },
            CdrSave::Replaced {
                record,
                previous_net_cost,
            } => LedgerMessage::Adjustment {
                cdr_id: record.cdr_id,
                organization_id: record.organization_id.clone(),
                period_from: record.period_from,
                period_to: record.period_to,
                previous_amount: *previous_net_cost,
                amount: record.net_cost,
                delta: record.net_cost - previous_net_cost,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LedgerMessage::Consumption { .. } => "consumption",
            LedgerMessage::Adjustment { .. } => "adjustment",
        }
    }

    pub fn organization_id(&self) -> &str {
        match self {
            LedgerMessage::Consumption {
                organization_id, ..
            }
            | LedgerMessage::Adjustment {
                organization_id, ..
            } => organization_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Credit ledger endpoint; messages are only logged when unset.
    pub url: Option<String>,
    pub capacity: usize,
    pub timeout: Duration,
}

/// Handle for queueing ledger messages. Cloning shares the queue.
#[derive(Clone)]
pub struct LedgerForwarder {
    tx: mpsc::Sender<LedgerMessage>,
}

impl LedgerForwarder {
    /// Start the delivery task. It stops once every handle is dropped.
    pub fn spawn(config: LedgerConfig) -> Result<(Self, JoinHandle<()>), reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let handle = tokio::spawn(deliver(rx, client, config.url));
        Ok((Self { tx }, handle))
    }

    /// Queue a message without waiting. A full queue drops the message.
    pub fn forward(&self, message: LedgerMessage) {
        let kind = message.kind();
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                record_ledger_message(kind, "dropped");
                warn!(
                    organization_id = %dropped.organization_id(),
                    kind = kind,
                    "Ledger queue full, message dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                record_ledger_message(kind, "dropped");
                warn!(
                    organization_id = %dropped.organization_id(),
                    kind = kind,
                    "Ledger forwarder stopped, message dropped"
                );
            }
        }
    }
}

async fn deliver(mut rx: mpsc::Receiver<LedgerMessage>, client: Client, url: Option<String>) {
    match &url {
        Some(url) => info!(url = %url, "Ledger forwarder started"),
        None => info!("Ledger forwarder started without endpoint, messages are logged only"),
    }

    while let Some(message) = rx.recv().await {
        let kind = message.kind();
        let Some(url) = url.as_deref() else {
            debug!(
                organization_id = %message.organization_id(),
                kind = kind,
                "Ledger message (no endpoint configured)"
            );
            record_ledger_message(kind, "logged");
            continue;
        };

        match client.post(url).json(&message).send().await {
            Ok(response) if response.status().is_success() => {
                record_ledger_message(kind, "sent");
                debug!(organization_id = %message.organization_id(), kind = kind, "Ledger message sent");
            }
            Ok(response) => {
                record_ledger_message(kind, "failed");
                warn!(
                    organization_id = %message.organization_id(),
                    kind = kind,
                    status = %response.status(),
                    "Credit ledger rejected message"
                );
            }
            Err(e) => {
                record_ledger_message(kind, "failed");
                warn!(
                    organization_id = %message.organization_id(),
                    kind = kind,
                    error = %e,
                    "Failed to reach credit ledger"
                );
            }
        }
    }

    info!("Ledger forwarder stopped");
}
