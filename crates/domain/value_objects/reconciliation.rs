use std::fmt::Display;

use crate::domain::value_objects::{
    checkout_metadata::EntityRef,
    notifications::{CustomerWelcomeNotification, InternalOrderNotification},
};

/// What a reconciliation handler did with one provider event.
///
/// Never persisted. The webhook layer uses it to decide which side effects to
/// dispatch and what to write to the event ledger and failure log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationOutcome {
    pub applied: bool,
    pub reason: OutcomeReason,
    pub side_effects: Vec<SideEffect>,
    pub isolated_failures: Vec<StepFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeReason {
    Applied,
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The event carried neither an order id nor a package id.
    NoCorrelation,
    MissingOrder(EntityRef),
    MissingPackage(EntityRef),
    /// The provider subscription is not tracked here.
    UntrackedSubscription(String),
    /// Every step had already been applied by an earlier delivery.
    AlreadyApplied,
    /// Reserved hook with nothing to change.
    NoOp,
}

impl SkipReason {
    /// Skips that point at data the engine expected to exist.
    pub fn is_missing_entity(&self) -> bool {
        self.missing_entity().is_some()
    }

    pub fn missing_entity(&self) -> Option<&EntityRef> {
        match self {
            SkipReason::MissingOrder(id) | SkipReason::MissingPackage(id) => Some(id),
            _ => None,
        }
    }
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoCorrelation => f.write_str("no order or package correlation"),
            SkipReason::MissingOrder(id) => write!(f, "order {id} not found"),
            SkipReason::MissingPackage(id) => write!(f, "package {id} not found"),
            SkipReason::UntrackedSubscription(id) => write!(f, "subscription {id} not tracked"),
            SkipReason::AlreadyApplied => f.write_str("already applied"),
            SkipReason::NoOp => f.write_str("no-op"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    InternalOrderAlert(InternalOrderNotification),
    CustomerWelcome(CustomerWelcomeNotification),
}

impl SideEffect {
    pub fn label(&self) -> &'static str {
        match self {
            SideEffect::InternalOrderAlert(_) => "internal_order_alert",
            SideEffect::CustomerWelcome(_) => "customer_welcome",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationStep {
    AttachCustomer,
    AttachCheckoutRefs,
    LinkUser,
    ActivatePackage,
    RetrieveSubscription,
    CreateSubscription,
    LinkSubscription,
    SetupFeeInvoice,
}

impl ReconciliationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStep::AttachCustomer => "attach_customer",
            ReconciliationStep::AttachCheckoutRefs => "attach_checkout_refs",
            ReconciliationStep::LinkUser => "link_user",
            ReconciliationStep::ActivatePackage => "activate_package",
            ReconciliationStep::RetrieveSubscription => "retrieve_subscription",
            ReconciliationStep::CreateSubscription => "create_subscription",
            ReconciliationStep::LinkSubscription => "link_subscription",
            ReconciliationStep::SetupFeeInvoice => "setup_fee_invoice",
        }
    }
}

impl Display for ReconciliationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sub-step that failed without aborting the rest of the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: ReconciliationStep,
    pub entity_ref: Option<String>,
    pub error: String,
}

impl StepFailure {
    pub fn new(step: ReconciliationStep, entity_ref: Option<String>, error: impl Display) -> Self {
        Self {
            step,
            entity_ref,
            error: error.to_string(),
        }
    }
}

impl ReconciliationOutcome {
    pub fn applied(side_effects: Vec<SideEffect>, isolated_failures: Vec<StepFailure>) -> Self {
        Self {
            applied: true,
            reason: OutcomeReason::Applied,
            side_effects,
            isolated_failures,
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self::skipped_with_failures(reason, Vec::new())
    }

    pub fn skipped_with_failures(reason: SkipReason, isolated_failures: Vec<StepFailure>) -> Self {
        Self {
            applied: false,
            reason: OutcomeReason::Skipped(reason),
            side_effects: Vec::new(),
            isolated_failures,
        }
    }

    pub fn failed(error: impl Display) -> Self {
        Self {
            applied: false,
            reason: OutcomeReason::Failed(error.to_string()),
            side_effects: Vec::new(),
            isolated_failures: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.reason, OutcomeReason::Failed(_))
    }

    /// Short label stored in the event ledger.
    pub fn summary(&self) -> String {
        match &self.reason {
            OutcomeReason::Applied if self.isolated_failures.is_empty() => "applied".to_string(),
            OutcomeReason::Applied => format!(
                "applied with {} isolated failure(s)",
                self.isolated_failures.len()
            ),
            OutcomeReason::Skipped(reason) => format!("skipped: {reason}"),
            OutcomeReason::Failed(error) => format!("failed: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn summary_mentions_isolated_failures() {
        let outcome = ReconciliationOutcome::applied(
            Vec::new(),
            vec![StepFailure::new(
                ReconciliationStep::SetupFeeInvoice,
                None,
                "card declined",
            )],
        );

        assert!(outcome.applied);
        assert_eq!(outcome.summary(), "applied with 1 isolated failure(s)");
    }

    #[test]
    fn missing_entities_are_flagged() {
        let order_id = Uuid::new_v4();
        let outcome = ReconciliationOutcome::skipped(SkipReason::MissingOrder(order_id.into()));

        assert!(!outcome.applied);
        assert_eq!(outcome.summary(), format!("skipped: order {order_id} not found"));
        assert_eq!(
            SkipReason::MissingPackage(EntityRef::new("pkg_1"))
                .missing_entity()
                .map(EntityRef::as_str),
            Some("pkg_1")
        );
        assert!(!SkipReason::AlreadyApplied.is_missing_entity());
    }
}
