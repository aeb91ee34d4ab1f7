use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result as AnyResult, anyhow};
use chrono::{DateTime, Utc};
use serde_json::json;
use storefront_core::{
    domain::{
        entities::{
            orders::{CheckoutRefs, InsertOrderEntity},
            packages::PackageEntity,
            subscriptions::InsertSubscriptionEntity,
            users::UserEntity,
        },
        value_objects::{
            checkout_metadata::{CheckoutMetadata, EntityRef},
            enums::{order_statuses::OrderStatus, subscription_statuses::SubscriptionStatus},
            reconciliation::{
                ReconciliationOutcome, ReconciliationStep, SideEffect, SkipReason, StepFailure,
            },
        },
    },
    payments::stripe_events::CheckoutCompleted,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    billing_period::derive_billing_period,
    entity_resolver::{EntityResolver, ReconciliationRepositories},
    payment_gateway::{StripeGateway, with_timeout},
    setup_fee::{SetupFeeBiller, SetupFeeRequest},
    side_effects::{PaidOrder, paid_order_side_effects},
};

const DEFAULT_CURRENCY: &str = "usd";

/// Where a maintenance subscription should be recorded.
struct SubscriptionTarget<'a> {
    stripe_subscription_id: &'a str,
    order_id: Uuid,
    owner_id: Option<Uuid>,
    package_id: Option<Uuid>,
    package_name: &'a str,
    business_name: Option<String>,
    business_metadata: serde_json::Value,
}

/// Applies `checkout.session.completed`.
///
/// Two shapes are accepted: a checkout for an existing order (`orderId` in the
/// metadata), or a checkout for a custom package with no order yet
/// (`packageId` only), in which case the order is created here. Every step is
/// a conditional write, so a redelivered session converges on the same state.
pub struct CheckoutCompletedHandler {
    repos: ReconciliationRepositories,
    resolver: EntityResolver,
    stripe: Arc<dyn StripeGateway>,
    setup_fees: SetupFeeBiller,
    provider_timeout: Duration,
}

impl CheckoutCompletedHandler {
    pub fn new(
        repos: ReconciliationRepositories,
        stripe: Arc<dyn StripeGateway>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            resolver: EntityResolver::new(repos.clone()),
            setup_fees: SetupFeeBiller::new(Arc::clone(&stripe), provider_timeout),
            repos,
            stripe,
            provider_timeout,
        }
    }

    pub async fn handle(
        &self,
        checkout: &CheckoutCompleted,
        now: DateTime<Utc>,
    ) -> ReconciliationOutcome {
        let session_id = checkout.session_id.as_str();
        let metadata = &checkout.metadata;
        info!(
            session_id,
            order_id = ?metadata.order_id.as_ref().map(EntityRef::as_str),
            package_id = ?metadata.package_id.as_ref().map(EntityRef::as_str),
            "checkout: reconciling completed session"
        );

        if checkout.payment_status.as_deref() == Some("unpaid") {
            warn!(session_id, "checkout: session completed with payment_status=unpaid");
        }

        let result = match (&metadata.order_id, &metadata.package_id) {
            (Some(order_ref), _) => self.reconcile_existing_order(checkout, order_ref, now).await,
            (None, Some(package_ref)) => {
                self.reconcile_custom_package(checkout, package_ref, now).await
            }
            (None, None) => {
                warn!(session_id, "checkout: session carries neither order nor package id");
                return ReconciliationOutcome::skipped(SkipReason::NoCorrelation);
            }
        };

        result.unwrap_or_else(|err| {
            error!(session_id, error = ?err, "checkout: reconciliation failed");
            ReconciliationOutcome::failed(format!("{err:#}"))
        })
    }

    async fn reconcile_custom_package(
        &self,
        checkout: &CheckoutCompleted,
        package_ref: &EntityRef,
        now: DateTime<Utc>,
    ) -> AnyResult<ReconciliationOutcome> {
        let session_id = checkout.session_id.as_str();
        let package = match package_ref.as_uuid() {
            Some(package_id) => self
                .resolver
                .package(package_id)
                .await
                .context("load package")?,
            None => None,
        };
        let Some(package) = package else {
            error!(
                session_id,
                package_id = %package_ref,
                "checkout: package referenced by checkout does not exist"
            );
            return Ok(ReconciliationOutcome::skipped(SkipReason::MissingPackage(
                package_ref.clone(),
            )));
        };
        let package_id = package.id;
        let mut failures = Vec::new();

        let activation = self
            .repos
            .packages
            .activate_if_pending(package_id, now)
            .await
            .context("activate package")?;
        info!(
            session_id,
            %package_id,
            applied = activation.is_applied(),
            "checkout: package activation"
        );

        let owner = self
            .resolve_owner(package.user_id, checkout, &mut failures)
            .await;
        if let Some(owner) = owner.as_ref() {
            self.attach_customer(owner, checkout, &mut failures).await;
        }

        let new_order = custom_package_order(checkout, &package, owner.as_ref(), now);
        let base_amount = checkout.amount_total_minor.unwrap_or(package.price_minor);
        let insert = self
            .repos
            .orders
            .insert_paid_order_if_absent(new_order)
            .await
            .context("insert paid order")?;
        let order_id = insert.id();
        info!(
            session_id,
            %order_id,
            inserted = insert.is_inserted(),
            "checkout: paid order recorded for custom package"
        );
        let Some(order) = self
            .resolver
            .order(order_id)
            .await
            .context("reload paid order")?
        else {
            return Err(anyhow!("order {order_id} vanished after insert"));
        };

        let maintenance_required =
            package.maintenance_required || checkout.metadata.maintenance_required;
        let mut subscription_created = false;
        if let (true, Some(stripe_subscription_id)) =
            (maintenance_required, checkout.subscription_id.as_deref())
        {
            subscription_created = self
                .ensure_subscription(
                    SubscriptionTarget {
                        stripe_subscription_id,
                        order_id,
                        owner_id: owner.as_ref().map(|owner| owner.id).or(package.user_id),
                        package_id: Some(package_id),
                        package_name: &package.name,
                        business_name: checkout.metadata.business_name.clone(),
                        business_metadata: business_metadata(&checkout.metadata),
                    },
                    checkout,
                    now,
                    &mut failures,
                )
                .await;
        }

        let setup_fee =
            if setup_fee_outstanding(&checkout.metadata, order.amount_paid_minor, base_amount) {
                self.charge_setup_fee(checkout, order_id, &order.order_number, &mut failures)
                    .await
            } else {
                None
            };
        let amount_paid = base_amount + setup_fee.unwrap_or(0);
        if setup_fee.is_some() {
            self.record_setup_fee(order_id, amount_paid, &mut failures).await;
        }

        if !insert.is_inserted() {
            return Ok(replayed_outcome(
                activation.is_applied() || subscription_created || setup_fee.is_some(),
                failures,
            ));
        }

        let side_effects = self
            .paid_order_effects(order_id, checkout, amount_paid, setup_fee, maintenance_required)
            .await;

        Ok(ReconciliationOutcome::applied(side_effects, failures))
    }

    async fn reconcile_existing_order(
        &self,
        checkout: &CheckoutCompleted,
        order_ref: &EntityRef,
        now: DateTime<Utc>,
    ) -> AnyResult<ReconciliationOutcome> {
        let session_id = checkout.session_id.as_str();
        let order = match order_ref.as_uuid() {
            Some(order_id) => self.resolver.order(order_id).await.context("load order")?,
            None => None,
        };
        let Some(order) = order else {
            error!(
                session_id,
                order_id = %order_ref,
                "checkout: order referenced by checkout does not exist"
            );
            return Ok(ReconciliationOutcome::skipped(SkipReason::MissingOrder(
                order_ref.clone(),
            )));
        };
        let order_id = order.id;
        let mut failures = Vec::new();

        let owner = self
            .resolve_owner(order.user_id, checkout, &mut failures)
            .await;
        if let Some(owner) = owner.as_ref() {
            self.attach_customer(owner, checkout, &mut failures).await;
        }
        let owner_id = match (order.user_id, owner.as_ref()) {
            (Some(user_id), _) => Some(user_id),
            (None, Some(owner)) => self.link_owner(order.id, owner.id, &mut failures).await,
            (None, None) => None,
        };

        let refs_attached = match self
            .repos
            .orders
            .attach_checkout_refs(
                order.id,
                CheckoutRefs {
                    stripe_session_id: checkout.session_id.clone(),
                    stripe_payment_intent_id: checkout.payment_intent_id.clone(),
                    stripe_subscription_id: checkout.subscription_id.clone(),
                },
            )
            .await
        {
            Ok(effect) => {
                if !effect.is_applied() {
                    info!(session_id, %order_id, "checkout: order already carries checkout refs");
                }
                effect.is_applied()
            }
            Err(err) => {
                error!(session_id, %order_id, error = ?err, "checkout: failed to attach checkout refs");
                failures.push(StepFailure::new(
                    ReconciliationStep::AttachCheckoutRefs,
                    Some(order_id.to_string()),
                    format!("{err:#}"),
                ));
                false
            }
        };

        let package_id = checkout.metadata.package_uuid();
        if let (None, Some(package_ref)) = (package_id, checkout.metadata.package_id.as_ref()) {
            warn!(
                session_id,
                package_id = %package_ref,
                "checkout: package reference is not a known id, skipping activation"
            );
        }
        if let Some(package_id) = package_id {
            match self.repos.packages.activate_if_pending(package_id, now).await {
                Ok(effect) => info!(
                    session_id,
                    %package_id,
                    applied = effect.is_applied(),
                    "checkout: package activation"
                ),
                Err(err) => {
                    error!(session_id, %package_id, error = ?err, "checkout: package activation failed");
                    failures.push(StepFailure::new(
                        ReconciliationStep::ActivatePackage,
                        Some(package_id.to_string()),
                        format!("{err:#}"),
                    ));
                }
            }
        }

        let base_amount = checkout.amount_total_minor.unwrap_or(order.total_price_minor);
        let setup_fee =
            if setup_fee_outstanding(&checkout.metadata, order.amount_paid_minor, base_amount) {
                self.charge_setup_fee(checkout, order.id, &order.order_number, &mut failures)
                    .await
            } else {
                None
            };

        let maintenance_required = checkout.metadata.maintenance_required;
        let mut subscription_created = false;
        if let (true, Some(stripe_subscription_id)) =
            (maintenance_required, checkout.subscription_id.as_deref())
        {
            subscription_created = self
                .ensure_subscription(
                    SubscriptionTarget {
                        stripe_subscription_id,
                        order_id: order.id,
                        owner_id,
                        package_id: package_id.or(order.package_id),
                        package_name: &order.package_name,
                        business_name: checkout
                            .metadata
                            .business_name
                            .clone()
                            .or_else(|| order.business_name()),
                        business_metadata: order.business_metadata.clone(),
                    },
                    checkout,
                    now,
                    &mut failures,
                )
                .await;
        }

        let amount_paid = base_amount + setup_fee.unwrap_or(0);
        let paid = self
            .repos
            .orders
            .mark_paid(order.id, amount_paid, now)
            .await
            .context("mark order paid")?;

        if !paid.is_applied() {
            info!(session_id, %order_id, "checkout: order was already paid");
            if setup_fee.is_some() {
                self.record_setup_fee(order.id, amount_paid, &mut failures).await;
            }
            return Ok(replayed_outcome(
                refs_attached || subscription_created || setup_fee.is_some(),
                failures,
            ));
        }
        info!(session_id, %order_id, amount_paid, "checkout: order marked paid");

        let side_effects = self
            .paid_order_effects(order.id, checkout, amount_paid, setup_fee, maintenance_required)
            .await;

        Ok(ReconciliationOutcome::applied(side_effects, failures))
    }

    async fn resolve_owner(
        &self,
        linked_user_id: Option<Uuid>,
        checkout: &CheckoutCompleted,
        failures: &mut Vec<StepFailure>,
    ) -> Option<UserEntity> {
        match self
            .resolver
            .owner(linked_user_id, checkout.customer_email.as_deref())
            .await
        {
            Ok(owner) => owner,
            Err(err) => {
                error!(
                    session_id = %checkout.session_id,
                    error = ?err,
                    "checkout: failed to resolve owning user"
                );
                failures.push(StepFailure::new(
                    ReconciliationStep::LinkUser,
                    linked_user_id.map(|id| id.to_string()),
                    format!("{err:#}"),
                ));
                None
            }
        }
    }

    async fn attach_customer(
        &self,
        owner: &UserEntity,
        checkout: &CheckoutCompleted,
        failures: &mut Vec<StepFailure>,
    ) {
        let Some(customer_id) = checkout.customer_id.as_deref() else {
            return;
        };
        if owner.stripe_customer_id.as_deref() == Some(customer_id) {
            return;
        }

        match self
            .repos
            .users
            .attach_stripe_customer_id(owner.id, customer_id)
            .await
        {
            Ok(_) => info!(
                user_id = %owner.id,
                stripe_customer_id = customer_id,
                "checkout: provider customer attached to user"
            ),
            Err(err) => {
                error!(user_id = %owner.id, error = ?err, "checkout: failed to attach provider customer");
                failures.push(StepFailure::new(
                    ReconciliationStep::AttachCustomer,
                    Some(owner.id.to_string()),
                    format!("{err:#}"),
                ));
            }
        }
    }

    async fn link_owner(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        failures: &mut Vec<StepFailure>,
    ) -> Option<Uuid> {
        match self.repos.orders.link_user_if_absent(order_id, user_id).await {
            Ok(effect) => {
                info!(%order_id, %user_id, applied = effect.is_applied(), "checkout: order linked to user");
                Some(user_id)
            }
            Err(err) => {
                error!(%order_id, %user_id, error = ?err, "checkout: failed to link order to user");
                failures.push(StepFailure::new(
                    ReconciliationStep::LinkUser,
                    Some(order_id.to_string()),
                    format!("{err:#}"),
                ));
                None
            }
        }
    }

    /// Records the maintenance subscription once per provider id and links it
    /// to the order. Returns true only when this call created the row.
    async fn ensure_subscription(
        &self,
        target: SubscriptionTarget<'_>,
        checkout: &CheckoutCompleted,
        now: DateTime<Utc>,
        failures: &mut Vec<StepFailure>,
    ) -> bool {
        let stripe_subscription_id = target.stripe_subscription_id;
        let entity_ref = Some(stripe_subscription_id.to_string());
        let mut fail = |step: ReconciliationStep, err: anyhow::Error| {
            error!(
                stripe_subscription_id,
                order_id = %target.order_id,
                step = %step,
                error = ?err,
                "checkout: subscription step failed"
            );
            failures.push(StepFailure::new(step, entity_ref.clone(), format!("{err:#}")));
        };

        let existing = match self.resolver.subscription(stripe_subscription_id).await {
            Ok(existing) => existing,
            Err(err) => {
                fail(ReconciliationStep::CreateSubscription, err);
                return false;
            }
        };

        let (subscription_id, created) = match existing {
            Some(existing) => {
                info!(
                    stripe_subscription_id,
                    subscription_id = %existing.id,
                    "checkout: subscription already recorded"
                );
                (existing.id, false)
            }
            None => {
                let (Some(owner_id), Some(package_id)) = (target.owner_id, target.package_id) else {
                    fail(
                        ReconciliationStep::CreateSubscription,
                        anyhow!("subscription needs an owning user and a package"),
                    );
                    return false;
                };

                let provider = match with_timeout(
                    self.provider_timeout,
                    "retrieve subscription",
                    self.stripe.retrieve_subscription(stripe_subscription_id),
                )
                .await
                {
                    Ok(provider) => provider,
                    Err(err) => {
                        fail(ReconciliationStep::RetrieveSubscription, err);
                        return false;
                    }
                };

                let Some(stripe_customer_id) =
                    provider.customer.clone().or_else(|| checkout.customer_id.clone())
                else {
                    fail(
                        ReconciliationStep::CreateSubscription,
                        anyhow!("subscription has no provider customer"),
                    );
                    return false;
                };

                let period = derive_billing_period(&provider, now);
                let status = provider
                    .status
                    .as_deref()
                    .and_then(|raw| raw.parse::<SubscriptionStatus>().ok())
                    .unwrap_or_default();
                let price = provider.first_price();

                let insert = InsertSubscriptionEntity {
                    user_id: owner_id,
                    package_id,
                    order_id: Some(target.order_id),
                    stripe_subscription_id: stripe_subscription_id.to_string(),
                    stripe_customer_id,
                    stripe_price_id: price.map(|price| price.id.clone()),
                    stripe_product_id: price.and_then(|price| price.product_id().map(str::to_string)),
                    status: status.to_string(),
                    current_period_start: period.start,
                    current_period_end: period.end,
                    cancel_at_period_end: provider.cancel_at_period_end,
                    canceled_at: None,
                    package_name: target.package_name.to_string(),
                    business_name: target.business_name.clone(),
                    business_metadata: target.business_metadata.clone(),
                };

                match self.repos.subscriptions.insert_if_absent(insert).await {
                    Ok(outcome) => {
                        info!(
                            stripe_subscription_id,
                            subscription_id = %outcome.id(),
                            inserted = outcome.is_inserted(),
                            period_start = %period.start,
                            period_end = %period.end,
                            "checkout: subscription recorded"
                        );
                        (outcome.id(), outcome.is_inserted())
                    }
                    Err(err) => {
                        fail(ReconciliationStep::CreateSubscription, err);
                        return false;
                    }
                }
            }
        };

        if let Err(err) = self
            .repos
            .orders
            .link_subscription_if_absent(target.order_id, subscription_id)
            .await
        {
            fail(ReconciliationStep::LinkSubscription, err);
        }

        created
    }

    async fn charge_setup_fee(
        &self,
        checkout: &CheckoutCompleted,
        order_id: Uuid,
        order_number: &str,
        failures: &mut Vec<StepFailure>,
    ) -> Option<i64> {
        let amount_minor = checkout.metadata.chargeable_setup_fee()?;
        let mut fail = |err: anyhow::Error| {
            error!(
                %order_id,
                amount_minor,
                error = ?err,
                "checkout: setup fee invoice failed"
            );
            failures.push(StepFailure::new(
                ReconciliationStep::SetupFeeInvoice,
                Some(order_id.to_string()),
                format!("{err:#}"),
            ));
        };

        let Some(stripe_customer_id) = checkout.customer_id.as_deref() else {
            fail(anyhow!("checkout has no provider customer to bill"));
            return None;
        };

        match self
            .setup_fees
            .charge(SetupFeeRequest {
                order_id,
                order_number,
                stripe_customer_id,
                amount_minor,
                currency: &currency(checkout),
            })
            .await
        {
            Ok(Some(charged)) => {
                info!(%order_id, charged, "checkout: setup fee charged");
                Some(charged)
            }
            Ok(None) => {
                warn!(%order_id, amount_minor, "checkout: setup fee invoice issued but not yet paid");
                None
            }
            Err(err) => {
                fail(err);
                None
            }
        }
    }

    async fn record_setup_fee(
        &self,
        order_id: Uuid,
        amount_paid_minor: i64,
        failures: &mut Vec<StepFailure>,
    ) {
        match self
            .repos
            .orders
            .record_setup_fee(order_id, amount_paid_minor)
            .await
        {
            Ok(effect) => info!(
                %order_id,
                amount_paid_minor,
                applied = effect.is_applied(),
                "checkout: setup fee recorded on order"
            ),
            Err(err) => {
                error!(%order_id, error = ?err, "checkout: failed to record setup fee on order");
                failures.push(StepFailure::new(
                    ReconciliationStep::SetupFeeInvoice,
                    Some(order_id.to_string()),
                    format!("setup fee charged but not recorded: {err:#}"),
                ));
            }
        }
    }

    async fn paid_order_effects(
        &self,
        order_id: Uuid,
        checkout: &CheckoutCompleted,
        amount_paid_minor: i64,
        setup_fee_minor: Option<i64>,
        maintenance_required: bool,
    ) -> Vec<SideEffect> {
        match self.resolver.order(order_id).await {
            Ok(Some(order)) => paid_order_side_effects(PaidOrder {
                order: &order,
                customer_email: checkout.customer_email.as_deref(),
                customer_name: checkout.customer_name.as_deref(),
                amount_paid_minor,
                setup_fee_minor,
                maintenance_required,
            }),
            Ok(None) => {
                warn!(%order_id, "checkout: paid order vanished before notifications");
                Vec::new()
            }
            Err(err) => {
                warn!(%order_id, error = ?err, "checkout: could not reload paid order for notifications");
                Vec::new()
            }
        }
    }
}

/// A chargeable fee is outstanding until the order's recorded payment covers
/// the checkout amount plus the fee.
fn setup_fee_outstanding(
    metadata: &CheckoutMetadata,
    recorded_paid_minor: Option<i64>,
    base_amount_minor: i64,
) -> bool {
    metadata
        .chargeable_setup_fee()
        .is_some_and(|fee| recorded_paid_minor.unwrap_or(0) < base_amount_minor + fee)
}

fn replayed_outcome(progressed: bool, failures: Vec<StepFailure>) -> ReconciliationOutcome {
    if progressed {
        ReconciliationOutcome::applied(Vec::new(), failures)
    } else {
        ReconciliationOutcome::skipped_with_failures(SkipReason::AlreadyApplied, failures)
    }
}

fn custom_package_order(
    checkout: &CheckoutCompleted,
    package: &PackageEntity,
    owner: Option<&UserEntity>,
    now: DateTime<Utc>,
) -> InsertOrderEntity {
    InsertOrderEntity {
        order_number: order_number(&checkout.session_id, now),
        package_id: Some(package.id),
        package_name: package.name.clone(),
        package_price_minor: package.price_minor,
        addons: package.addons.clone(),
        total_price_minor: package.price_minor,
        amount_paid_minor: Some(checkout.amount_total_minor.unwrap_or(package.price_minor)),
        currency: currency(checkout),
        status: OrderStatus::Paid.to_string(),
        user_id: owner.map(|owner| owner.id).or(package.user_id),
        contact_email: checkout
            .customer_email
            .clone()
            .or_else(|| owner.map(|owner| owner.email.clone()))
            .unwrap_or_default(),
        business_metadata: business_metadata(&checkout.metadata),
        stripe_session_id: Some(checkout.session_id.clone()),
        stripe_payment_intent_id: checkout.payment_intent_id.clone(),
        stripe_subscription_id: checkout.subscription_id.clone(),
        paid_at: Some(now),
    }
}

/// `ORD-<yyyymmdd>-<last 8 alphanumerics of the session id>`, stable across
/// redeliveries of the same session.
pub fn order_number(session_id: &str, now: DateTime<Utc>) -> String {
    let alphanumerics: Vec<char> = session_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    let tail: String = alphanumerics[alphanumerics.len().saturating_sub(8)..]
        .iter()
        .collect();

    format!("ORD-{}-{}", now.format("%Y%m%d"), tail.to_ascii_uppercase())
}

fn currency(checkout: &CheckoutCompleted) -> String {
    checkout
        .currency
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
}

fn business_metadata(metadata: &CheckoutMetadata) -> serde_json::Value {
    match metadata.business_name.as_deref() {
        Some(name) => json!({ "businessName": name }),
        None => json!({}),
    }
}
