use super::state::AlertUiState;

pub fn render(state: &AlertUiState) -> String {
    match state {
        AlertUiState::Idle => ["Trigger an SOS", "  [start] Trigger an SOS"].join("\n"),
        AlertUiState::Countdown {
            seconds_remaining,
            total_seconds,
        } => [
            "Contactless SOS".to_string(),
            "Requesting help".to_string(),
            format!(
                "Sending the alert in {}s ({}%)",
                seconds_remaining,
                progress_percent(*seconds_remaining, *total_seconds)
            ),
            "  [confirm] Confirm the alert".to_string(),
            "  [cancel] Cancel the alert".to_string(),
        ]
        .join("\n"),
        AlertUiState::Triggered {
            latitude,
            longitude,
            live_preview,
        } => {
            let mut lines = vec![
                "Alert triggered!".to_string(),
                "An alert has been sent.".to_string(),
            ];
            match (latitude, longitude) {
                (Some(lat), Some(lon)) => lines.push(format!("GPS: {}, {}", lat, lon)),
                _ => lines.push("Position unavailable.".to_string()),
            }
            if *live_preview {
                lines.push("Camera preview: live".to_string());
            }
            lines.join("\n")
        }
    }
}

/// Share of the countdown still remaining, as shown on the progress ring.
pub fn progress_percent(seconds_remaining: u32, total_seconds: u32) -> u32 {
    if total_seconds == 0 {
        return 0;
    }
    seconds_remaining.min(total_seconds) * 100 / total_seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_panel() {
        let panel = render(&AlertUiState::Countdown {
            seconds_remaining: 15,
            total_seconds: 30,
        });
        assert!(panel.contains("Sending the alert in 15s (50%)"));
        assert!(panel.contains("[confirm]"));
        assert!(panel.contains("[cancel]"));
    }

    #[test]
    fn test_triggered_panel_with_coordinates() {
        let panel = render(&AlertUiState::Triggered {
            latitude: Some(48.85),
            longitude: Some(2.35),
            live_preview: true,
        });
        assert!(panel.contains("An alert has been sent."));
        assert!(panel.contains("GPS: 48.85, 2.35"));
        assert!(panel.contains("Camera preview: live"));
    }

    #[test]
    fn test_triggered_panel_without_position_or_camera() {
        let panel = render(&AlertUiState::Triggered {
            latitude: None,
            longitude: None,
            live_preview: false,
        });
        assert!(panel.contains("Position unavailable."));
        assert!(!panel.contains("GPS:"));
        assert!(!panel.contains("Camera preview"));
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(30, 30), 100);
        assert_eq!(progress_percent(1, 30), 3);
        assert_eq!(progress_percent(0, 30), 0);
        assert_eq!(progress_percent(5, 0), 0);
    }
}
