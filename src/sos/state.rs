/// What the alert panel shows. Only the state machine produces these.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AlertUiState {
    #[default]
    Idle,
    Countdown {
        seconds_remaining: u32,
        total_seconds: u32,
    },
    Triggered {
        latitude: Option<f64>,
        longitude: Option<f64>,
        /// The camera stream was acquired
        live_preview: bool,
    },
}
