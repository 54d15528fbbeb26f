// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

use super::tracker::{AckOutcome, DeliveryToken};
use crate::envelope::Envelope;
use crate::store::StoredMessage;
use std::sync::Arc;

pub(crate) trait DeliveryAckHandler: Send + Sync {
    /// Resolves the attempt as acknowledged.
    fn ack(&self, token: DeliveryToken) -> AckOutcome;

    /// Resolves the attempt as rejected.
    fn nack(&self, token: DeliveryToken, reason: &str) -> AckOutcome;

    /// Returns `true` while the attempt has not been superseded.
    fn is_current(&self, token: DeliveryToken) -> bool;
}

enum DeliveryAckHandlerSlot {
    // `ack_policy: none`: the group already disposed of the message.
    None,
    Handler(Arc<dyn DeliveryAckHandler>),
}

/// One delivery attempt handed to a worker.
///
/// Dropping a delivery without resolving it leaves the message pending until
/// its ack deadline passes.
pub struct Delivery {
    message: StoredMessage,
    token: DeliveryToken,
    ack_handler: DeliveryAckHandlerSlot,
}

impl Delivery {
    pub(crate) fn new(
        message: StoredMessage,
        token: DeliveryToken,
        ack_handler: Arc<dyn DeliveryAckHandler>,
    ) -> Self {
        Self {
            message,
            token,
            ack_handler: DeliveryAckHandlerSlot::Handler(ack_handler),
        }
    }

    pub(crate) fn new_without_ack(message: StoredMessage, token: DeliveryToken) -> Self {
        Self {
            message,
            token,
            ack_handler: DeliveryAckHandlerSlot::None,
        }
    }

    /// Delivered envelope.
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.message.envelope
    }

    /// Delivered message with its store metadata.
    #[must_use]
    pub fn message(&self) -> &StoredMessage {
        &self.message
    }

    /// Token naming this attempt.
    #[must_use]
    pub fn token(&self) -> DeliveryToken {
        self.token
    }

    /// Attempt number, starting at 1.
    #[must_use]
    pub fn delivery_count(&self) -> u32 {
        self.token.delivery_count
    }

    /// Returns `false` once a redelivery superseded this attempt.
    #[must_use]
    pub fn is_current(&self) -> bool {
        match &self.ack_handler {
            DeliveryAckHandlerSlot::None => true,
            DeliveryAckHandlerSlot::Handler(handler) => handler.is_current(self.token),
        }
    }

    /// Acknowledges this attempt.
    pub fn ack(self) -> AckOutcome {
        match self.ack_handler {
            DeliveryAckHandlerSlot::None => AckOutcome::AlreadyTerminal,
            DeliveryAckHandlerSlot::Handler(handler) => handler.ack(self.token),
        }
    }

    /// Rejects this attempt with an explicit reason.
    pub fn nack_with_reason(self, reason: &str) -> AckOutcome {
        match self.ack_handler {
            DeliveryAckHandlerSlot::None => AckOutcome::AlreadyTerminal,
            DeliveryAckHandlerSlot::Handler(handler) => handler.nack(self.token, reason),
        }
    }

    /// Rejects this attempt.
    pub fn nack(self) -> AckOutcome {
        self.nack_with_reason("delivery rejected")
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("sequence", &self.token.sequence)
            .field("delivery_count", &self.token.delivery_count)
            .field("subject", &self.message.subject)
            .field("id", &self.message.envelope.id())
            .finish()
    }
}
