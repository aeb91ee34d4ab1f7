use anyhow::Result;
use async_trait::async_trait;
use diesel::{OptionalExtension, RunQueryDsl, prelude::*, sql_types::Text, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::users},
};
use domain::{
    entities::users::UserEntity, repositories::users::UserRepository,
    value_objects::write_effects::WriteEffect,
};

diesel::define_sql_function!(fn lower(value: Text) -> Text);

pub struct UserPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl UserPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserRepository for UserPostgres {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user = users::table
            .filter(users::id.eq(user_id))
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user = users::table
            .filter(lower(users::email).eq(email.trim().to_lowercase()))
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(user)
    }

    async fn attach_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<WriteEffect> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = update(
            users::table.filter(users::id.eq(user_id)).filter(
                users::stripe_customer_id
                    .is_null()
                    .or(users::stripe_customer_id.ne(stripe_customer_id)),
            ),
        )
        .set(users::stripe_customer_id.eq(Some(stripe_customer_id)))
        .execute(&mut conn)?;

        Ok(WriteEffect::from_rows_affected(rows))
    }
}
