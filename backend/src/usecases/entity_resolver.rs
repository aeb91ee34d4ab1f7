use std::sync::Arc;

use anyhow::Result as AnyResult;
use storefront_core::domain::{
    entities::{
        orders::OrderEntity, packages::PackageEntity, subscriptions::SubscriptionEntity,
        users::UserEntity,
    },
    repositories::{
        orders::OrderRepository, packages::PackageRepository,
        subscriptions::SubscriptionRepository, users::UserRepository,
    },
};
use uuid::Uuid;

/// Persistence handles shared by every reconciliation handler.
#[derive(Clone)]
pub struct ReconciliationRepositories {
    pub orders: Arc<dyn OrderRepository + Send + Sync>,
    pub packages: Arc<dyn PackageRepository + Send + Sync>,
    pub subscriptions: Arc<dyn SubscriptionRepository + Send + Sync>,
    pub users: Arc<dyn UserRepository + Send + Sync>,
}

/// Read-only lookups by the correlation ids an event carries. Missing rows are
/// returned as `None`; each handler decides whether that is terminal.
#[derive(Clone)]
pub struct EntityResolver {
    repos: ReconciliationRepositories,
}

impl EntityResolver {
    pub fn new(repos: ReconciliationRepositories) -> Self {
        Self { repos }
    }

    pub async fn order(&self, order_id: Uuid) -> AnyResult<Option<OrderEntity>> {
        self.repos.orders.find_by_id(order_id).await
    }

    pub async fn package(&self, package_id: Uuid) -> AnyResult<Option<PackageEntity>> {
        self.repos.packages.find_by_id(package_id).await
    }

    pub async fn subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> AnyResult<Option<SubscriptionEntity>> {
        self.repos
            .subscriptions
            .find_by_stripe_subscription_id(stripe_subscription_id)
            .await
    }

    /// The user a checkout belongs to: the already-linked owner when there is
    /// one, otherwise whoever registered with the checkout email.
    pub async fn owner(
        &self,
        linked_user_id: Option<Uuid>,
        email: Option<&str>,
    ) -> AnyResult<Option<UserEntity>> {
        if let Some(user_id) = linked_user_id {
            if let Some(user) = self.repos.users.find_by_id(user_id).await? {
                return Ok(Some(user));
            }
        }

        match email.map(str::trim).filter(|email| !email.is_empty()) {
            Some(email) => self.repos.users.find_by_email(email).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockall::predicate::eq;
    use storefront_core::domain::repositories::{
        orders::MockOrderRepository, packages::MockPackageRepository,
        subscriptions::MockSubscriptionRepository, users::MockUserRepository,
    };

    fn user(id: Uuid, email: &str) -> UserEntity {
        UserEntity {
            id,
            email: email.to_string(),
            name: None,
            stripe_customer_id: None,
            created_at: Utc::now(),
        }
    }

    fn resolver(users: MockUserRepository) -> EntityResolver {
        EntityResolver::new(ReconciliationRepositories {
            orders: Arc::new(MockOrderRepository::new()),
            packages: Arc::new(MockPackageRepository::new()),
            subscriptions: Arc::new(MockSubscriptionRepository::new()),
            users: Arc::new(users),
        })
    }

    #[tokio::test]
    async fn linked_owner_wins_over_email() {
        let owner_id = Uuid::new_v4();
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_id()
            .with(eq(owner_id))
            .returning(move |id| Ok(Some(user(id, "owner@example.com"))));
        users.expect_find_by_email().never();

        let owner = resolver(users)
            .owner(Some(owner_id), Some("someone@example.com"))
            .await
            .unwrap();

        assert_eq!(owner.map(|u| u.id), Some(owner_id));
    }

    #[tokio::test]
    async fn falls_back_to_trimmed_email() {
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_email()
            .with(eq("ada@example.com"))
            .returning(|email| Ok(Some(user(Uuid::new_v4(), email))));

        let owner = resolver(users)
            .owner(None, Some(" ada@example.com "))
            .await
            .unwrap();

        assert_eq!(owner.map(|u| u.email), Some("ada@example.com".to_string()));
    }

    #[tokio::test]
    async fn no_link_and_no_email_resolves_nobody() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_email().never();

        assert!(resolver(users).owner(None, Some("  ")).await.unwrap().is_none());
    }
}
