use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::location::Position;

pub const DEFAULT_TEAM_ID: Uuid = Uuid::nil();
pub const DEFAULT_TEAM_NAME: &str = "No team";

/// Team and event the alert is raised for, supplied when the flow is activated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertContext {
    pub team_id: Option<Uuid>,
    pub team_name: Option<String>,
    pub event_id: Option<Uuid>,
}

impl AlertContext {
    pub fn team_id(&self) -> Uuid {
        self.team_id.unwrap_or(DEFAULT_TEAM_ID)
    }

    pub fn team_name(&self) -> &str {
        self.team_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_TEAM_NAME)
    }
}

/// Insert payload for `sos_alerts`. The media url always starts empty.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub team_id: Uuid,
    pub team_name: String,
    pub event_id: Option<Uuid>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub time_for_user: DateTime<Utc>,
}

impl NewAlert {
    pub fn new(context: &AlertContext, position: Position, time_for_user: DateTime<Utc>) -> Self {
        // time_for_user never precedes created_at
        let created_at = Utc::now().min(time_for_user);
        Self {
            team_id: context.team_id(),
            team_name: context.team_name().to_string(),
            event_id: context.event_id,
            latitude: position.latitude,
            longitude: position.longitude,
            created_at,
            time_for_user,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)]
pub struct AlertRecord {
    pub id: Uuid,
    pub team_id: Uuid,
    pub team_name: String,
    pub event_id: Option<Uuid>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub time_for_user: DateTime<Utc>,
    #[sqlx(rename = "url")]
    pub media_url: String, // '' until the video is attached
}
