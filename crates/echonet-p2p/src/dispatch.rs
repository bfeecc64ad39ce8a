//! Hand-off of decrypted messages to application handlers.

use crate::router::{InboundMessage, MessageRouter};
use serde::{Deserialize, Serialize};
use std::sync::Weak;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// What happens when the dispatch queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The inbox pump waits for room.
    #[default]
    Block,
    /// The oldest queued message is discarded.
    DropOldest,
}

/// How decrypted messages reach handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchMode {
    /// Handlers run on the inbox pump task.
    Inline,
    /// Messages pass through a bounded queue to a dedicated worker task.
    Queued {
        /// Queue capacity.
        capacity: usize,
        /// Behavior when the queue is full.
        overflow: OverflowPolicy,
    },
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self::Queued {
            capacity: 256,
            overflow: OverflowPolicy::Block,
        }
    }
}

#[derive(Debug)]
pub(crate) enum DispatchSink {
    Inline,
    Block(mpsc::Sender<InboundMessage>),
    DropOldest(broadcast::Sender<InboundMessage>),
}

impl DispatchSink {
    /// Starts the worker for `mode`, if it needs one.
    pub(crate) fn start(
        mode: DispatchMode,
        router: Weak<MessageRouter>,
    ) -> (Self, Option<JoinHandle<()>>) {
        match mode {
            DispatchMode::Inline => (Self::Inline, None),
            DispatchMode::Queued {
                capacity,
                overflow: OverflowPolicy::Block,
            } => {
                let (tx, mut rx) = mpsc::channel::<InboundMessage>(capacity.max(1));
                let worker = tokio::spawn(async move {
                    while let Some(message) = rx.recv().await {
                        let Some(router) = router.upgrade() else { break };
                        router.deliver(&message);
                    }
                });
                (Self::Block(tx), Some(worker))
            }
            DispatchMode::Queued {
                capacity,
                overflow: OverflowPolicy::DropOldest,
            } => {
                let (tx, mut rx) = broadcast::channel::<InboundMessage>(capacity.max(1));
                let worker = tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(message) => {
                                let Some(router) = router.upgrade() else { break };
                                router.deliver(&message);
                            }
                            Err(broadcast::error::RecvError::Lagged(dropped)) => {
                                let Some(router) = router.upgrade() else { break };
                                router.record_overflow(dropped);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
                (Self::DropOldest(tx), Some(worker))
            }
        }
    }

    /// Hands one message to the handlers.
    ///
    /// Returns false once the worker is gone.
    pub(crate) async fn dispatch(&self, router: &MessageRouter, message: InboundMessage) -> bool {
        match self {
            Self::Inline => {
                router.deliver(&message);
                true
            }
            Self::Block(tx) => tx.send(message).await.is_ok(),
            Self::DropOldest(tx) => tx.send(message).is_ok(),
        }
    }
}
