use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::db::{queries, DbPool};
use crate::error::{SosError, SosResult};
use crate::models::alert::{AlertRecord, NewAlert};

/// Persistence boundary for SOS alerts. Holds no client-side state.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Inserts one alert and returns the stored row, including its id.
    async fn create_alert(&self, alert: &NewAlert) -> SosResult<AlertRecord>;

    /// Sets the media url of an existing alert.
    async fn attach_media_url(&self, id: Uuid, url: &str) -> SosResult<()>;
}

pub struct PgAlertRepository {
    pool: DbPool,
}

impl PgAlertRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertRepository {
    async fn create_alert(&self, alert: &NewAlert) -> SosResult<AlertRecord> {
        let record = sqlx::query_as::<_, AlertRecord>(queries::INSERT_SOS_ALERT)
            .bind(alert.team_id)
            .bind(alert.latitude)
            .bind(alert.longitude)
            .bind(alert.created_at)
            .bind(alert.time_for_user)
            .bind(&alert.team_name)
            .bind(alert.event_id)
            .fetch_one(&self.pool)
            .await?;

        debug!("Inserted sos_alerts row {}", record.id);
        Ok(record)
    }

    async fn attach_media_url(&self, id: Uuid, url: &str) -> SosResult<()> {
        let result = sqlx::query(queries::UPDATE_SOS_ALERT_URL)
            .bind(url)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SosError::PersistenceFailure(format!(
                "alert {} not found or already has a video url",
                id
            )));
        }
        Ok(())
    }
}
