use std::{sync::Arc, time::Duration};

use storefront_core::domain::{
    entities::orders::OrderEntity,
    repositories::notifications::NotificationClient,
    value_objects::{
        notifications::{CustomerWelcomeNotification, InternalOrderNotification},
        reconciliation::SideEffect,
    },
};
use tracing::{info, warn};

use super::payment_gateway::with_timeout;

/// Facts about an order that has just transitioned to paid.
pub struct PaidOrder<'a> {
    pub order: &'a OrderEntity,
    pub customer_email: Option<&'a str>,
    pub customer_name: Option<&'a str>,
    pub amount_paid_minor: i64,
    pub setup_fee_minor: Option<i64>,
    pub maintenance_required: bool,
}

/// The notifications owed for a paid order. The customer welcome needs an
/// address; the internal alert is always sent.
pub fn paid_order_side_effects(paid: PaidOrder<'_>) -> Vec<SideEffect> {
    let order = paid.order;
    let email = paid
        .customer_email
        .map(str::to_string)
        .filter(|email| !email.trim().is_empty())
        .or_else(|| Some(order.contact_email.clone()).filter(|email| !email.trim().is_empty()));
    let customer_name = paid
        .customer_name
        .map(str::to_string)
        .or_else(|| order.business_name());

    let mut effects = vec![SideEffect::InternalOrderAlert(InternalOrderNotification {
        order_id: order.id,
        order_number: order.order_number.clone(),
        customer_email: email.clone().unwrap_or_default(),
        customer_name: customer_name.clone(),
        package_id: order.package_id,
        package_name: order.package_name.clone(),
        addons: order.addons.clone(),
        total_price_minor: order.total_price_minor,
        amount_paid_minor: paid.amount_paid_minor,
        setup_fee_minor: paid.setup_fee_minor,
        currency: order.currency.clone(),
        maintenance_required: paid.maintenance_required,
        stripe_subscription_id: order.stripe_subscription_id.clone(),
        business_metadata: order.business_metadata.clone(),
    })];

    if let Some(email) = email {
        effects.push(SideEffect::CustomerWelcome(CustomerWelcomeNotification {
            email,
            customer_name,
            order_number: order.order_number.clone(),
            package_name: order.package_name.clone(),
            amount_paid_minor: paid.amount_paid_minor,
            currency: order.currency.clone(),
            maintenance_required: paid.maintenance_required,
        }));
    }

    effects
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: Vec<(&'static str, String)>,
}

/// Fires notifications after the core state change has been written.
/// Failures are logged and counted, never propagated.
pub struct SideEffectDispatcher {
    notifications: Arc<dyn NotificationClient + Send + Sync>,
    timeout: Duration,
}

impl SideEffectDispatcher {
    pub fn new(notifications: Arc<dyn NotificationClient + Send + Sync>, timeout: Duration) -> Self {
        Self {
            notifications,
            timeout,
        }
    }

    pub async fn dispatch(&self, effects: Vec<SideEffect>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for effect in effects {
            let label = effect.label();
            let result = match effect {
                SideEffect::InternalOrderAlert(notification) => {
                    with_timeout(
                        self.timeout,
                        "internal order notification",
                        self.notifications.notify_internal(notification),
                    )
                    .await
                }
                SideEffect::CustomerWelcome(notification) => {
                    with_timeout(
                        self.timeout,
                        "customer welcome notification",
                        self.notifications.notify_customer(notification),
                    )
                    .await
                }
            };

            match result {
                Ok(()) => {
                    report.delivered += 1;
                    info!(side_effect = label, "side_effects: delivered");
                }
                Err(err) => {
                    warn!(side_effect = label, error = ?err, "side_effects: delivery failed");
                    report.failed.push((label, format!("{err:#}")));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::test_support::order_fixture;
    use anyhow::anyhow;
    use storefront_core::domain::repositories::notifications::MockNotificationClient;

    #[test]
    fn welcome_falls_back_to_order_contact_email() {
        let mut order = order_fixture();
        order.contact_email = "contact@example.com".to_string();

        let effects = paid_order_side_effects(PaidOrder {
            order: &order,
            customer_email: None,
            customer_name: Some("Ada"),
            amount_paid_minor: 100,
            setup_fee_minor: None,
            maintenance_required: false,
        });

        assert_eq!(effects.len(), 2);
        let SideEffect::CustomerWelcome(welcome) = &effects[1] else {
            panic!("expected a customer welcome");
        };
        assert_eq!(welcome.email, "contact@example.com");
        assert_eq!(welcome.customer_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn no_address_means_internal_alert_only() {
        let mut order = order_fixture();
        order.contact_email = String::new();

        let effects = paid_order_side_effects(PaidOrder {
            order: &order,
            customer_email: None,
            customer_name: None,
            amount_paid_minor: 100,
            setup_fee_minor: Some(5000),
            maintenance_required: true,
        });

        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].label(), "internal_order_alert");
    }

    #[tokio::test]
    async fn failing_notification_does_not_stop_the_next_one() {
        let mut notifications = MockNotificationClient::new();
        notifications
            .expect_notify_internal()
            .times(1)
            .returning(|_| Err(anyhow!("messaging unavailable")));
        notifications
            .expect_notify_customer()
            .times(1)
            .returning(|_| Ok(()));

        let order = order_fixture();
        let effects = paid_order_side_effects(PaidOrder {
            order: &order,
            customer_email: Some("ada@example.com"),
            customer_name: None,
            amount_paid_minor: 100,
            setup_fee_minor: None,
            maintenance_required: false,
        });

        let report = SideEffectDispatcher::new(Arc::new(notifications), Duration::from_secs(1))
            .dispatch(effects)
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "internal_order_alert");
    }
}
