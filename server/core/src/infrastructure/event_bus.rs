// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Filesystem Events
//
// In-memory fan-out of committed mutations using a tokio broadcast channel.
// Registered as a NodeHook, it turns post-events into FilesystemEvents for
// observers such as notification or preview workers.
//
// Events are not persisted; a subscriber that falls behind the channel
// capacity loses the oldest events and sees EventBusError::Lagged.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::error::FilesystemError;
use crate::domain::events::FilesystemEvent;
use crate::domain::hooks::{HookEvent, NodeHook};
use crate::domain::node::NodeId;

/// Event bus for publishing and subscribing to filesystem events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<FilesystemEvent>>,
}

impl EventBus {
    /// Capacity is the number of events buffered per subscriber before the
    /// oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: FilesystemEvent) {
        debug!(node_id = %event.node_id(), "Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single node
    pub fn subscribe_node(&self, node_id: NodeId) -> NodeEventReceiver {
        NodeEventReceiver {
            inner: self.subscribe(),
            node_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[async_trait]
impl NodeHook for EventBus {
    fn name(&self) -> &str {
        "event_bus"
    }

    async fn on_event(&self, event: &HookEvent<'_>) -> Result<(), FilesystemError> {
        if let Some(event) = FilesystemEvent::from_hook(event) {
            self.publish(event);
        }
        Ok(())
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all filesystem events
pub struct EventReceiver {
    receiver: broadcast::Receiver<FilesystemEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<FilesystemEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<FilesystemEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to one node
pub struct NodeEventReceiver {
    inner: EventReceiver,
    node_id: NodeId,
}

impl NodeEventReceiver {
    /// Receive the next event concerning the node, skipping all others.
    /// For copies, the node is matched against both source and copy.
    pub async fn recv(&mut self) -> Result<FilesystemEvent, EventBusError> {
        loop {
            let event = self.inner.recv().await?;
            let matches = match &event {
                FilesystemEvent::NodeCopied { source, copy, .. } => {
                    *source == self.node_id || *copy == self.node_id
                }
                other => other.node_id() == self.node_id,
            };
            if matches {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
