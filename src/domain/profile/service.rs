use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::errors::ProfileError;
use super::events::ProfileUpdated;
use super::model::{ProfileUpdate, UserProfile};
use crate::outbox::OutboxRecorder;

// ============================================================================
// Profile Service
// ============================================================================
//
// Read and update the user profile. The update path is the recorder's one
// production call site: it mutates the profile row and records the
// ProfileUpdated event in the same transaction, then commits. If either
// write fails nothing commits, so a consumer can never see an event for a
// mutation that didn't happen, or a mutation without its event.
//
// ============================================================================

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS user_profiles (
    id UUID PRIMARY KEY,
    first_name TEXT,
    last_name TEXT,
    phone TEXT,
    location TEXT,
    bio TEXT,
    avatar_url TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)";

pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA).execute(pool).await?;
    tracing::info!("profile schema ready");
    Ok(())
}

pub struct ProfileService {
    pool: PgPool,
    recorder: OutboxRecorder,
}

impl ProfileService {
    pub fn new(pool: PgPool, recorder: OutboxRecorder) -> Self {
        Self { pool, recorder }
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, ProfileError> {
        let row = sqlx::query(
            "SELECT id, first_name, last_name, phone, location, bio, avatar_url,
                    created_at, updated_at
             FROM user_profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(decode_profile(&row)?),
            None => Err(ProfileError::NotFound(user_id)),
        }
    }

    /// Apply a partial update and record the ProfileUpdated event
    /// atomically. `user_id` is both the aggregate and the acting user.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
        correlation_id: &str,
    ) -> Result<UserProfile, ProfileError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, first_name, last_name, phone, location, bio, avatar_url,
                    created_at, updated_at
             FROM user_profiles WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut profile = match row {
            Some(row) => decode_profile(&row)?,
            None => return Err(ProfileError::NotFound(user_id)),
        };

        profile.apply(update, chrono::Utc::now());

        sqlx::query(
            "UPDATE user_profiles
             SET first_name = $2, last_name = $3, phone = $4, location = $5,
                 bio = $6, avatar_url = $7, updated_at = $8
             WHERE id = $1",
        )
        .bind(profile.id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.phone)
        .bind(&profile.location)
        .bind(&profile.bio)
        .bind(&profile.avatar_url)
        .bind(profile.updated_at)
        .execute(&mut *tx)
        .await?;

        let event = ProfileUpdated::from_profile(&profile, user_id, correlation_id);
        let record = self.recorder.record(&mut tx, &event, correlation_id).await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            record_id = %record.id,
            correlation_id = %correlation_id,
            "profile updated"
        );

        Ok(profile)
    }
}

fn decode_profile(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    Ok(UserProfile {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        location: row.try_get("location")?,
        bio: row.try_get("bio")?,
        avatar_url: row.try_get("avatar_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// Gated on a real database: `DATABASE_URL=... cargo test -- --ignored`

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::postgres::PgPoolOptions;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        crate::outbox::pg::migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    async fn seed_profile(pool: &PgPool, user_id: Uuid) {
        sqlx::query(
            "INSERT INTO user_profiles (id, first_name, last_name, bio, created_at, updated_at)
             VALUES ($1, 'Test', 'User', 'original bio', $2, $2)",
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn outbox_count(pool: &PgPool, aggregate_id: Uuid) -> i64 {
        sqlx::query("SELECT COUNT(*) FROM outbox_records WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_one(pool)
            .await
            .unwrap()
            .try_get(0)
            .unwrap()
    }

    fn service(pool: PgPool) -> ProfileService {
        ProfileService::new(pool, OutboxRecorder::new("UserProfile", "profile-events-test"))
    }

    #[tokio::test]
    #[ignore]
    async fn test_update_commits_profile_and_outbox_record_together() {
        let pool = test_pool().await;
        let user_id = Uuid::new_v4();
        seed_profile(&pool, user_id).await;

        let updated = service(pool.clone())
            .update_profile(
                user_id,
                ProfileUpdate {
                    bio: Some("committed together".to_string()),
                    ..Default::default()
                },
                "corr-commit",
            )
            .await
            .unwrap();

        assert_eq!(updated.bio.as_deref(), Some("committed together"));
        assert_eq!(outbox_count(&pool, user_id).await, 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_recorder_failure_rolls_back_the_profile_update() {
        let pool = test_pool().await;
        let user_id = Uuid::new_v4();
        seed_profile(&pool, user_id).await;

        // The empty correlation id fails the recorder after the profile row
        // has been updated inside the transaction
        let svc = service(pool.clone());
        let result = svc
            .update_profile(
                user_id,
                ProfileUpdate {
                    bio: Some("must not stick".to_string()),
                    ..Default::default()
                },
                "",
            )
            .await;
        assert!(matches!(result, Err(ProfileError::Outbox(_))));

        // Neither the mutation nor the record survived
        let profile = svc.get_profile(user_id).await.unwrap();
        assert_eq!(profile.bio.as_deref(), Some("original bio"));
        assert_eq!(outbox_count(&pool, user_id).await, 0);
    }
}
