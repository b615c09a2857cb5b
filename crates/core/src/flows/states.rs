use serde::{Deserialize, Serialize};

use crate::domain::order::{OrderStatus, PaymentMode};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    /// Every line has a resolved product, positive quantity, and a live
    /// price snapshot.
    ItemsPriced,
    /// Delivery date and payment mode were explicitly provided.
    DetailsProvided,
    ConfirmationReceived,
    /// The COD carrier-confirmation delay elapsed.
    AutoConfirmElapsed,
    /// The buyer changed line items after pricing.
    LinesChanged,
    CancelRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    SnapshotPrices,
    /// Invalidate snapshots on changed lines only.
    InvalidateSnapshots,
    ScheduleAutoConfirm,
    CancelAutoConfirm,
    RecordConfirmation,
}

/// Validation inputs carried alongside an event. The state machine itself
/// stays pure; callers populate the missing-detail lists from the draft.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderFlowContext {
    /// Line-level problems blocking pricing (unresolved product, zero
    /// quantity, missing snapshot).
    pub missing_line_details: Vec<String>,
    /// Confirmation prerequisites still unset (delivery date, payment mode).
    pub missing_confirmation_details: Vec<String>,
    pub payment_mode: Option<PaymentMode>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub event: OrderEvent,
    pub actions: Vec<FlowAction>,
}
