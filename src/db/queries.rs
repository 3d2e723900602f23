pub const INSERT_SOS_ALERT: &str = r#"
INSERT INTO sos_alerts (team_id, latitude, longitude, created_at, time_for_user, url, team_name, event_id)
VALUES ($1, $2, $3, $4, $5, '', $6, $7)
RETURNING id, team_id, latitude, longitude, created_at, time_for_user, url, team_name, event_id;
"#;

// Only an empty url is ever overwritten.
pub const UPDATE_SOS_ALERT_URL: &str = r#"
UPDATE sos_alerts
SET url = $1
WHERE id = $2 AND url = '';
"#;
