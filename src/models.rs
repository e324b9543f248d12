//! Core data types: telemetry records, spill archives, and queue stats.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single vehicle position report.
///
/// The fixed fields cover the schema the backing store understands; any
/// additional attributes a device sends land in the `extra` map so that
/// forward-compatible payloads survive ingestion without schema changes.
///
/// Records are immutable once created. The producer owns a record until it
/// is handed to the queue; from then on the queue owns it until it is
/// persisted or spilled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Identifier of the reporting vehicle (the owning entity; the
    /// `telemetry` table holds a foreign key against it).
    pub vehicle_id: String,
    /// UTC time the position was recorded on the device.
    pub recorded_at: DateTime<Utc>,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,

    // References
    /// Order the vehicle was servicing, if any.
    pub order_id: Option<String>,
    /// Operational scenario identifier.
    pub scenario: Option<String>,
    /// Reporting device identifier.
    pub device_id: Option<String>,
    /// Operator (driver) identifier.
    pub operator: Option<String>,

    // Location detail
    /// UTM easting.
    pub utm_x: Option<f64>,
    /// UTM northing.
    pub utm_y: Option<f64>,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    /// Altitude in meters.
    pub altitude: Option<f64>,
    /// Bearing in degrees.
    pub bearing: Option<f64>,
    /// Location provider (gps, network, fused).
    pub provider: Option<String>,
    /// Whether the device flagged the location as mocked.
    pub is_mock_location: Option<bool>,
    /// Age of the fix when reported, in milliseconds.
    pub location_age_ms: Option<i64>,

    // Satellites
    /// Satellites used in the fix.
    pub satellites_used: Option<i64>,
    /// Satellites visible.
    pub satellites_total: Option<i64>,
    /// Average signal-to-noise ratio across satellites.
    pub satellites_avg_snr: Option<f64>,

    // Movement
    /// Speed in meters per second.
    pub speed: Option<f64>,
    /// Speed accuracy in meters per second.
    pub speed_accuracy: Option<f64>,
    /// Vertical accuracy in meters.
    pub vertical_accuracy: Option<f64>,
    /// Cumulative distance travelled in meters.
    pub distance_travelled: Option<f64>,
    /// Detected movement type (stationary, walking, driving).
    pub movement_type: Option<String>,

    // App
    /// Reporting app lifecycle state (foreground, background).
    pub app_state: Option<String>,
    /// Reporting app version.
    pub app_version: Option<String>,
    /// Whether GPS was enabled on the device.
    pub gps_enabled: Option<bool>,

    // Battery
    /// Battery level as a fraction or percentage, as reported.
    pub battery_level: Option<f64>,
    /// Whether the device was charging.
    pub battery_charging: Option<bool>,
    /// Raw battery status string.
    pub battery_status: Option<String>,
    /// Whether battery saver was active.
    pub battery_saver_on: Option<bool>,
    /// Whether the device was in doze mode.
    pub doze_mode_active: Option<bool>,

    // Network
    /// Network type (wifi, cellular).
    pub network_type: Option<String>,
    /// Whether the device had connectivity when recording.
    pub network_connected: Option<bool>,

    // Device
    /// Device manufacturer.
    pub device_manufacturer: Option<String>,
    /// Device model.
    pub device_model: Option<String>,
    /// Android OS version.
    pub android_version: Option<String>,
    /// Available memory in megabytes.
    pub memory_available_mb: Option<f64>,
    /// Whether the OS reported a low-memory condition.
    pub memory_low: Option<bool>,

    // Execution
    /// Monotonic counter of tracking-service executions.
    pub execution_counter: Option<i64>,
    /// Reason for the last tracking-service reset.
    pub last_reset_reason: Option<String>,
    /// Device-local wall-clock timestamp, as reported.
    pub recorded_at_local: Option<String>,

    /// Open extension map for dynamic attributes not covered by the fixed
    /// schema. Stored as a JSON blob alongside the record.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TelemetryRecord {
    /// Creates a record with only the required fields set; every optional
    /// attribute starts empty.
    pub fn new(
        vehicle_id: impl Into<String>,
        recorded_at: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        TelemetryRecord {
            vehicle_id: vehicle_id.into(),
            recorded_at,
            latitude,
            longitude,
            order_id: None,
            scenario: None,
            device_id: None,
            operator: None,
            utm_x: None,
            utm_y: None,
            accuracy: None,
            altitude: None,
            bearing: None,
            provider: None,
            is_mock_location: None,
            location_age_ms: None,
            satellites_used: None,
            satellites_total: None,
            satellites_avg_snr: None,
            speed: None,
            speed_accuracy: None,
            vertical_accuracy: None,
            distance_travelled: None,
            movement_type: None,
            app_state: None,
            app_version: None,
            gps_enabled: None,
            battery_level: None,
            battery_charging: None,
            battery_status: None,
            battery_saver_on: None,
            doze_mode_active: None,
            network_type: None,
            network_connected: None,
            device_manufacturer: None,
            device_model: None,
            android_version: None,
            memory_available_mb: None,
            memory_low: None,
            execution_counter: None,
            last_reset_reason: None,
            recorded_at_local: None,
            extra: HashMap::new(),
        }
    }

    /// Minimal shape check before a record is admitted to the queue.
    ///
    /// Full validation is the record normalizer's job upstream; this only
    /// rejects records the store could never accept.
    pub fn validate(&self) -> Result<(), String> {
        if self.vehicle_id.trim().is_empty() {
            return Err("missing vehicle_id".to_string());
        }
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err("non-finite coordinates".to_string());
        }
        Ok(())
    }
}

/// Durable artifact written for a batch that exhausted every retry.
///
/// Never read back by the running process; recovery is a manual,
/// out-of-band operation (re-import the `records` array).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedBatchArchive {
    /// When the batch was spilled.
    pub timestamp: DateTime<Utc>,
    /// Why the batch could not be persisted.
    pub reason: String,
    /// Number of records in the batch.
    pub count: usize,
    /// The full record list, unmodified.
    pub records: Vec<TelemetryRecord>,
}

/// Read-only snapshot of queue state for observability.
///
/// Derived, not authoritative: the queue keeps moving while you look.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Records currently buffered (not yet detached into a flush).
    pub queue_depth: usize,
    /// Whether a flush cycle is in flight.
    pub is_flushing: bool,
    /// Configured flush-on-size threshold.
    pub batch_size: usize,
    /// Configured flush-on-time threshold in milliseconds.
    pub flush_interval_ms: u64,
}
