use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{SosError, SosResult};

pub const GEOLOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates attached to an alert. Both fields are null when no fix was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Position {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<Fix> for Position {
    fn from(fix: Fix) -> Self {
        Self {
            latitude: Some(fix.latitude),
            longitude: Some(fix.longitude),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix the source may return.
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: GEOLOCATION_TIMEOUT,
            maximum_age: Duration::ZERO,
        }
    }
}

/// Platform geolocation API.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn locate(&self, options: &PositionOptions) -> SosResult<Fix>;
}

pub struct LocationProvider {
    source: Option<Arc<dyn PositionSource>>,
    options: PositionOptions,
}

impl LocationProvider {
    /// `None` means the device has no geolocation capability.
    pub fn new(source: Option<Arc<dyn PositionSource>>) -> Self {
        Self {
            source,
            options: PositionOptions::default(),
        }
    }

    pub async fn current_position(&self) -> Position {
        let Some(source) = &self.source else {
            warn!("Geolocation is not available on this device");
            return Position::unavailable();
        };

        match timeout(self.options.timeout, source.locate(&self.options)).await {
            Ok(Ok(fix)) => {
                info!("GPS position acquired: {}, {}", fix.latitude, fix.longitude);
                fix.into()
            }
            Ok(Err(e)) => {
                error!("Failed to get GPS position: {}", e);
                Position::unavailable()
            }
            Err(_) => {
                warn!(
                    "No GPS position within {} ms",
                    self.options.timeout.as_millis()
                );
                Position::unavailable()
            }
        }
    }
}

/// A position pinned in configuration, for fixed installations.
pub struct StaticPositionSource {
    fix: Fix,
}

impl StaticPositionSource {
    pub fn new(fix: Fix) -> Self {
        Self { fix }
    }
}

#[async_trait]
impl PositionSource for StaticPositionSource {
    async fn locate(&self, _options: &PositionOptions) -> SosResult<Fix> {
        Ok(self.fix)
    }
}

const GPSD_WATCH: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Debug, Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Reads fixes from a gpsd daemon over its JSON socket protocol.
///
/// Every request opens a fresh watch, so only reports produced after the
/// request are considered and a zero maximum age is always honoured.
pub struct GpsdPositionSource {
    addr: String,
}

impl GpsdPositionSource {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl PositionSource for GpsdPositionSource {
    async fn locate(&self, options: &PositionOptions) -> SosResult<Fix> {
        let unavailable = |e: std::io::Error| SosError::LocationUnavailable(e.to_string());

        let mut stream = TcpStream::connect(&self.addr).await.map_err(unavailable)?;
        stream.write_all(GPSD_WATCH).await.map_err(unavailable)?;
        debug!(
            "Watching gpsd at {} (high accuracy: {}, max age: {:?})",
            self.addr, options.enable_high_accuracy, options.maximum_age
        );

        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await.map_err(unavailable)? {
            let report: GpsdReport = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    debug!("Skipping unparsable gpsd line: {}", e);
                    continue;
                }
            };
            if report.class != "TPV" || report.mode < 2 {
                continue;
            }
            if let (Some(latitude), Some(longitude)) = (report.lat, report.lon) {
                return Ok(Fix {
                    latitude,
                    longitude,
                });
            }
        }

        Err(SosError::LocationUnavailable(
            "gpsd closed the connection before reporting a fix".to_string(),
        ))
    }
}
