use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Domain events published after state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: i32,
        order_number: Uuid,
        total_payment: i64,
    },
    OrderCancelled {
        order_id: i32,
    },
    OrderCompleted {
        order_id: i32,
        user_id: i32,
    },
    PaymentReady {
        payment_id: i32,
        toss_order_id: String,
    },
    PaymentSucceeded {
        payment_id: i32,
        order_id: i32,
        amount: i64,
    },
    PaymentFailed {
        payment_id: i32,
        order_id: i32,
        code: String,
    },
    PointsApplied {
        user_id: i32,
        delta: i64,
        event_key: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Drains the event channel. Events are currently consumed for logging only.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentFailed {
                payment_id,
                order_id,
                code,
            } => {
                error!(payment_id, order_id, code = %code, "payment failed");
            }
            Event::OrderCompleted { order_id, user_id } => {
                info!(order_id, user_id, "order completed");
            }
            other => info!(event = ?other, "event received"),
        }
    }

    info!("Event channel closed; event processing loop stopped");
}
