//! In-memory repository fakes mirroring the conditional-write semantics of the
//! Postgres repositories, for replay and idempotency scenarios.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::{Result as AnyResult, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use storefront_core::{
    domain::{
        entities::{
            orders::{
                CheckoutRefs, InsertOrderEntity, ORDER_NUMBER_ATTEMPTS, OrderEntity,
                order_number_variant,
            },
            packages::PackageEntity,
            processed_webhook_events::ProcessedWebhookEventEntity,
            reconciliation_failures::{
                InsertReconciliationFailureEntity, ReconciliationFailureEntity,
            },
            subscriptions::{
                InsertSubscriptionEntity, SubscriptionEntity, SubscriptionSnapshotChangeset,
            },
            users::UserEntity,
        },
        repositories::{
            notifications::NotificationClient, orders::OrderRepository,
            packages::PackageRepository,
            processed_webhook_events::ProcessedWebhookEventRepository,
            reconciliation_failures::ReconciliationFailureRepository,
            subscriptions::SubscriptionRepository, users::UserRepository,
        },
        value_objects::{
            checkout_metadata::CheckoutMetadata,
            enums::{
                event_processing_statuses::EventProcessingStatus, order_statuses::OrderStatus,
                package_statuses::PackageStatus, subscription_statuses::SubscriptionStatus,
            },
            notifications::{CustomerWelcomeNotification, InternalOrderNotification},
            write_effects::{InsertOutcome, WriteEffect},
        },
    },
    payments::stripe_events::CheckoutCompleted,
};
use uuid::Uuid;

use super::entity_resolver::ReconciliationRepositories;

#[derive(Default)]
pub struct InMemoryStore {
    pub orders: Mutex<HashMap<Uuid, OrderEntity>>,
    pub packages: Mutex<HashMap<Uuid, PackageEntity>>,
    pub subscriptions: Mutex<HashMap<Uuid, SubscriptionEntity>>,
    pub users: Mutex<HashMap<Uuid, UserEntity>>,
    pub ledger: Mutex<HashMap<String, ProcessedWebhookEventEntity>>,
    pub failures: Mutex<Vec<ReconciliationFailureEntity>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn repositories(self: &Arc<Self>) -> ReconciliationRepositories {
        ReconciliationRepositories {
            orders: self.clone(),
            packages: self.clone(),
            subscriptions: self.clone(),
            users: self.clone(),
        }
    }

    pub fn with_order(&self, order: OrderEntity) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    pub fn with_package(&self, package: PackageEntity) {
        self.packages.lock().unwrap().insert(package.id, package);
    }

    pub fn with_user(&self, user: UserEntity) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn order(&self, order_id: Uuid) -> OrderEntity {
        self.orders.lock().unwrap()[&order_id].clone()
    }

    pub fn all_orders(&self) -> Vec<OrderEntity> {
        self.orders.lock().unwrap().values().cloned().collect()
    }

    pub fn package(&self, package_id: Uuid) -> PackageEntity {
        self.packages.lock().unwrap()[&package_id].clone()
    }

    pub fn all_subscriptions(&self) -> Vec<SubscriptionEntity> {
        self.subscriptions.lock().unwrap().values().cloned().collect()
    }

    pub fn user(&self, user_id: Uuid) -> UserEntity {
        self.users.lock().unwrap()[&user_id].clone()
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn find_by_id(&self, order_id: Uuid) -> AnyResult<Option<OrderEntity>> {
        Ok(self.orders.lock().unwrap().get(&order_id).cloned())
    }

    async fn find_by_stripe_session_id(&self, session_id: &str) -> AnyResult<Option<OrderEntity>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|order| order.stripe_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn insert_paid_order_if_absent(&self, order: InsertOrderEntity) -> AnyResult<InsertOutcome> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(existing) = orders
            .values()
            .find(|row| row.stripe_session_id.is_some() && row.stripe_session_id == order.stripe_session_id)
        {
            return Ok(InsertOutcome::Existing(existing.id));
        }
        let order_number = (0..ORDER_NUMBER_ATTEMPTS)
            .map(|attempt| order_number_variant(&order.order_number, attempt))
            .find(|candidate| orders.values().all(|row| &row.order_number != candidate))
            .ok_or_else(|| anyhow!("no free order number for {}", order.order_number))?;

        let now = Utc::now();
        let id = Uuid::new_v4();
        orders.insert(
            id,
            OrderEntity {
                id,
                order_number,
                package_id: order.package_id,
                package_name: order.package_name,
                package_price_minor: order.package_price_minor,
                addons: order.addons,
                total_price_minor: order.total_price_minor,
                amount_paid_minor: order.amount_paid_minor,
                currency: order.currency,
                status: order.status,
                user_id: order.user_id,
                contact_email: order.contact_email,
                business_metadata: order.business_metadata,
                stripe_session_id: order.stripe_session_id,
                stripe_payment_intent_id: order.stripe_payment_intent_id,
                stripe_subscription_id: order.stripe_subscription_id,
                subscription_id: None,
                paid_at: order.paid_at,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(InsertOutcome::Inserted(id))
    }

    async fn attach_checkout_refs(&self, order_id: Uuid, refs: CheckoutRefs) -> AnyResult<WriteEffect> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&order_id) {
            Some(order) if order.stripe_session_id.is_none() => {
                order.stripe_session_id = Some(refs.stripe_session_id);
                order.stripe_payment_intent_id = refs.stripe_payment_intent_id;
                order.stripe_subscription_id = refs.stripe_subscription_id;
                Ok(WriteEffect::Applied)
            }
            _ => Ok(WriteEffect::AlreadyApplied),
        }
    }

    async fn link_user_if_absent(&self, order_id: Uuid, user_id: Uuid) -> AnyResult<WriteEffect> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&order_id) {
            Some(order) if order.user_id.is_none() => {
                order.user_id = Some(user_id);
                Ok(WriteEffect::Applied)
            }
            _ => Ok(WriteEffect::AlreadyApplied),
        }
    }

    async fn link_subscription_if_absent(
        &self,
        order_id: Uuid,
        subscription_id: Uuid,
    ) -> AnyResult<WriteEffect> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&order_id) {
            Some(order) if order.subscription_id.is_none() => {
                order.subscription_id = Some(subscription_id);
                Ok(WriteEffect::Applied)
            }
            _ => Ok(WriteEffect::AlreadyApplied),
        }
    }

    async fn mark_paid(
        &self,
        order_id: Uuid,
        amount_paid_minor: i64,
        paid_at: DateTime<Utc>,
    ) -> AnyResult<WriteEffect> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&order_id) {
            Some(order) if !order.is_paid() => {
                order.status = OrderStatus::Paid.to_string();
                order.amount_paid_minor = Some(amount_paid_minor);
                order.paid_at = Some(paid_at);
                Ok(WriteEffect::Applied)
            }
            _ => Ok(WriteEffect::AlreadyApplied),
        }
    }

    async fn record_setup_fee(&self, order_id: Uuid, amount_paid_minor: i64) -> AnyResult<WriteEffect> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&order_id) {
            Some(order) if order.amount_paid_minor.is_none_or(|paid| paid < amount_paid_minor) => {
                order.amount_paid_minor = Some(amount_paid_minor);
                Ok(WriteEffect::Applied)
            }
            _ => Ok(WriteEffect::AlreadyApplied),
        }
    }
}

#[async_trait]
impl PackageRepository for InMemoryStore {
    async fn find_by_id(&self, package_id: Uuid) -> AnyResult<Option<PackageEntity>> {
        Ok(self.packages.lock().unwrap().get(&package_id).cloned())
    }

    async fn activate_if_pending(
        &self,
        package_id: Uuid,
        activated_at: DateTime<Utc>,
    ) -> AnyResult<WriteEffect> {
        let mut packages = self.packages.lock().unwrap();
        match packages.get_mut(&package_id) {
            Some(package) if package.package_status() == PackageStatus::Pending => {
                package.status = PackageStatus::Active.to_string();
                package.activated_at = Some(activated_at);
                Ok(WriteEffect::Applied)
            }
            _ => Ok(WriteEffect::AlreadyApplied),
        }
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> AnyResult<Option<SubscriptionEntity>> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .find(|row| row.stripe_subscription_id == stripe_subscription_id)
            .cloned())
    }

    async fn insert_if_absent(&self, subscription: InsertSubscriptionEntity) -> AnyResult<InsertOutcome> {
        let mut rows = self.subscriptions.lock().unwrap();
        if let Some(existing) = rows
            .values()
            .find(|row| row.stripe_subscription_id == subscription.stripe_subscription_id)
        {
            return Ok(InsertOutcome::Existing(existing.id));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        rows.insert(
            id,
            SubscriptionEntity {
                id,
                user_id: subscription.user_id,
                package_id: subscription.package_id,
                order_id: subscription.order_id,
                stripe_subscription_id: subscription.stripe_subscription_id,
                stripe_customer_id: subscription.stripe_customer_id,
                stripe_price_id: subscription.stripe_price_id,
                stripe_product_id: subscription.stripe_product_id,
                status: subscription.status,
                current_period_start: subscription.current_period_start,
                current_period_end: subscription.current_period_end,
                cancel_at_period_end: subscription.cancel_at_period_end,
                canceled_at: subscription.canceled_at,
                package_name: subscription.package_name,
                business_name: subscription.business_name,
                business_metadata: subscription.business_metadata,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(InsertOutcome::Inserted(id))
    }

    async fn apply_provider_snapshot(
        &self,
        stripe_subscription_id: &str,
        changeset: SubscriptionSnapshotChangeset,
    ) -> AnyResult<WriteEffect> {
        let mut rows = self.subscriptions.lock().unwrap();
        let Some(row) = rows
            .values_mut()
            .find(|row| row.stripe_subscription_id == stripe_subscription_id)
        else {
            return Ok(WriteEffect::AlreadyApplied);
        };

        if let Some(status) = changeset.status {
            row.status = status;
        }
        if let Some(start) = changeset.current_period_start {
            row.current_period_start = start;
        }
        if let Some(end) = changeset.current_period_end {
            row.current_period_end = end;
        }
        if let Some(flag) = changeset.cancel_at_period_end {
            row.cancel_at_period_end = flag;
        }
        if let Some(canceled_at) = changeset.canceled_at {
            row.canceled_at = canceled_at;
        }
        if let Some(updated_at) = changeset.updated_at {
            row.updated_at = updated_at;
        }
        Ok(WriteEffect::Applied)
    }

    async fn mark_canceled(
        &self,
        stripe_subscription_id: &str,
        canceled_at: DateTime<Utc>,
    ) -> AnyResult<WriteEffect> {
        let mut rows = self.subscriptions.lock().unwrap();
        match rows
            .values_mut()
            .find(|row| row.stripe_subscription_id == stripe_subscription_id)
        {
            Some(row) if row.subscription_status() != SubscriptionStatus::Canceled => {
                row.status = SubscriptionStatus::Canceled.to_string();
                row.canceled_at = Some(canceled_at);
                Ok(WriteEffect::Applied)
            }
            _ => Ok(WriteEffect::AlreadyApplied),
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, user_id: Uuid) -> AnyResult<Option<UserEntity>> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AnyResult<Option<UserEntity>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn attach_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> AnyResult<WriteEffect> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&user_id) {
            Some(user) if user.stripe_customer_id.as_deref() != Some(stripe_customer_id) => {
                user.stripe_customer_id = Some(stripe_customer_id.to_string());
                Ok(WriteEffect::Applied)
            }
            _ => Ok(WriteEffect::AlreadyApplied),
        }
    }
}

#[async_trait]
impl ProcessedWebhookEventRepository for InMemoryStore {
    async fn try_claim(&self, event_id: &str, event_type: &str, stale_after: Duration) -> AnyResult<bool> {
        let now = Utc::now();
        let mut ledger = self.ledger.lock().unwrap();
        let reclaimable = match ledger.get(event_id) {
            None => true,
            Some(row) => match row.processing_status() {
                Some(EventProcessingStatus::Failed) => true,
                Some(EventProcessingStatus::Processing) => row.claimed_at < now - stale_after,
                _ => false,
            },
        };
        if reclaimable {
            ledger.insert(
                event_id.to_string(),
                ProcessedWebhookEventEntity {
                    event_id: event_id.to_string(),
                    event_type: event_type.to_string(),
                    status: EventProcessingStatus::Processing.to_string(),
                    outcome: None,
                    error: None,
                    claimed_at: now,
                    completed_at: None,
                },
            );
        }
        Ok(reclaimable)
    }

    async fn find(&self, event_id: &str) -> AnyResult<Option<ProcessedWebhookEventEntity>> {
        Ok(self.ledger.lock().unwrap().get(event_id).cloned())
    }

    async fn complete(
        &self,
        event_id: &str,
        status: EventProcessingStatus,
        outcome: String,
        error: Option<String>,
    ) -> AnyResult<()> {
        if let Some(row) = self.ledger.lock().unwrap().get_mut(event_id) {
            row.status = status.to_string();
            row.outcome = Some(outcome);
            row.error = error;
            row.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl ReconciliationFailureRepository for InMemoryStore {
    async fn record(&self, failure: InsertReconciliationFailureEntity) -> AnyResult<Uuid> {
        let id = Uuid::new_v4();
        self.failures.lock().unwrap().push(ReconciliationFailureEntity {
            id,
            event_id: failure.event_id,
            event_type: failure.event_type,
            step: failure.step,
            entity_ref: failure.entity_ref,
            error: failure.error,
            created_at: Utc::now(),
            resolved_at: None,
        });
        Ok(id)
    }

    async fn list_unresolved(&self, limit: i64) -> AnyResult<Vec<ReconciliationFailureEntity>> {
        Ok(self
            .failures
            .lock()
            .unwrap()
            .iter()
            .filter(|failure| failure.resolved_at.is_none())
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

/// Captures notifications instead of sending them.
#[derive(Default)]
pub struct RecordingNotifications {
    pub internal: Mutex<Vec<InternalOrderNotification>>,
    pub customer: Mutex<Vec<CustomerWelcomeNotification>>,
}

#[async_trait]
impl NotificationClient for RecordingNotifications {
    async fn notify_internal(&self, notification: InternalOrderNotification) -> AnyResult<()> {
        self.internal.lock().unwrap().push(notification);
        Ok(())
    }

    async fn notify_customer(&self, notification: CustomerWelcomeNotification) -> AnyResult<()> {
        self.customer.lock().unwrap().push(notification);
        Ok(())
    }
}

pub fn order_fixture() -> OrderEntity {
    let now = Utc::now();
    OrderEntity {
        id: Uuid::new_v4(),
        order_number: "ORD-20240101-0001".to_string(),
        package_id: None,
        package_name: "Starter site".to_string(),
        package_price_minor: 100,
        addons: json!([]),
        total_price_minor: 100,
        amount_paid_minor: None,
        currency: "usd".to_string(),
        status: OrderStatus::PendingPayment.to_string(),
        user_id: None,
        contact_email: "ada@example.com".to_string(),
        business_metadata: json!({ "businessName": "Ada's Bakery" }),
        stripe_session_id: None,
        stripe_payment_intent_id: None,
        stripe_subscription_id: None,
        subscription_id: None,
        paid_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn package_fixture() -> PackageEntity {
    PackageEntity {
        id: Uuid::new_v4(),
        name: "Custom automation".to_string(),
        price_minor: 25_000,
        addons: json!(["seo"]),
        maintenance_required: false,
        is_custom: true,
        status: PackageStatus::Pending.to_string(),
        user_id: None,
        activated_at: None,
        created_at: Utc::now(),
    }
}

pub fn user_fixture(email: &str) -> UserEntity {
    UserEntity {
        id: Uuid::new_v4(),
        email: email.to_string(),
        name: Some("Ada".to_string()),
        stripe_customer_id: None,
        created_at: Utc::now(),
    }
}

pub fn checkout_fixture(metadata: CheckoutMetadata) -> CheckoutCompleted {
    CheckoutCompleted {
        session_id: "cs_test_a1b2c3d4e5f6".to_string(),
        mode: Some("payment".to_string()),
        customer_id: Some("cus_1".to_string()),
        customer_email: Some("ada@example.com".to_string()),
        customer_name: Some("Ada".to_string()),
        payment_intent_id: Some("pi_1".to_string()),
        subscription_id: None,
        payment_status: Some("paid".to_string()),
        amount_total_minor: Some(100),
        currency: Some("usd".to_string()),
        metadata,
    }
}
