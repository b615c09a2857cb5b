use thiserror::Error;

use crate::domain::order::{OrderStatus, PaymentMode};
use crate::flows::states::{FlowAction, OrderEvent, OrderFlowContext, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing order details before transition from {state:?}: {missing:?}")]
    MissingOrderDetails { state: OrderStatus, missing: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: OrderStatus, event: OrderEvent },
}

/// The order assembly & confirmation state machine.
///
/// Pure transition table: callers apply the returned actions (snapshotting,
/// timer scheduling) against persistence. Replaying the same event sequence
/// with the same context is deterministic.
#[derive(Clone, Debug, Default)]
pub struct OrderFlow;

impl OrderFlow {
    pub fn initial_state(&self) -> OrderStatus {
        OrderStatus::Collecting
    }

    pub fn apply(
        &self,
        current: &OrderStatus,
        event: &OrderEvent,
        context: &OrderFlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use FlowAction::{
            CancelAutoConfirm, InvalidateSnapshots, RecordConfirmation, ScheduleAutoConfirm,
            SnapshotPrices,
        };
        use OrderEvent::{
            AutoConfirmElapsed, CancelRequested, ConfirmationReceived, DetailsProvided,
            ItemsPriced, LinesChanged,
        };
        use OrderStatus::{AwaitingConfirmation, Cancelled, Collecting, Confirmed, Priced};

        let (to, actions) = match (current, event) {
            (Collecting, ItemsPriced) => {
                if !context.missing_line_details.is_empty() {
                    return Err(FlowTransitionError::MissingOrderDetails {
                        state: *current,
                        missing: context.missing_line_details.clone(),
                    });
                }
                (Priced, vec![SnapshotPrices])
            }
            (Priced, DetailsProvided) => {
                if !context.missing_confirmation_details.is_empty() {
                    return Err(FlowTransitionError::MissingOrderDetails {
                        state: *current,
                        missing: context.missing_confirmation_details.clone(),
                    });
                }
                let actions = if context.payment_mode == Some(PaymentMode::CashOnDelivery) {
                    vec![ScheduleAutoConfirm]
                } else {
                    Vec::new()
                };
                (AwaitingConfirmation, actions)
            }
            (Priced, LinesChanged) => (Collecting, vec![InvalidateSnapshots]),
            (AwaitingConfirmation, ConfirmationReceived) => {
                (Confirmed, vec![CancelAutoConfirm, RecordConfirmation])
            }
            (AwaitingConfirmation, AutoConfirmElapsed)
                if context.payment_mode == Some(PaymentMode::CashOnDelivery) =>
            {
                (Confirmed, vec![RecordConfirmation])
            }
            (state, CancelRequested) if !state.is_terminal() => {
                let actions = if *state == AwaitingConfirmation {
                    vec![CancelAutoConfirm]
                } else {
                    Vec::new()
                };
                (Cancelled, actions)
            }
            _ => {
                return Err(FlowTransitionError::InvalidTransition {
                    state: *current,
                    event: event.clone(),
                });
            }
        };

        Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
    }
}
