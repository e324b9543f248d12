//! Backing-store write interface and its SQLite implementation.
//!
//! The flush executor and dependency repairer only ever talk to the
//! [`TelemetryStore`] trait, so tests (and future store swaps) can inject
//! their own implementation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::error_handling::{classify_store_error, PersistError};
use crate::models::TelemetryRecord;

/// The three store operations the core needs: a bulk write, an existence
/// check, and a provisioning fallback for missing parent vehicles.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Persists a batch of records. All-or-nothing: on error, no record of
    /// the batch has been applied, so the same batch is safe to retry.
    async fn insert_batch(&self, records: &[TelemetryRecord]) -> Result<(), PersistError>;

    /// Returns the subset of `ids` that exist as vehicles.
    async fn existing_vehicles(
        &self,
        ids: &HashSet<String>,
    ) -> Result<HashSet<String>, PersistError>;

    /// Creates a minimal vehicle row so telemetry referencing it can be
    /// persisted. No-op when the vehicle already exists.
    async fn upsert_vehicle_stub(&self, vehicle_id: &str) -> Result<(), PersistError>;
}

/// SQLite-backed store over the shared connection pool.
pub struct SqliteTelemetryStore {
    pool: Arc<Pool<Sqlite>>,
}

impl SqliteTelemetryStore {
    /// Creates a store over an initialized pool.
    pub fn new(pool: Arc<Pool<Sqlite>>) -> Self {
        SqliteTelemetryStore { pool }
    }
}

#[async_trait]
impl TelemetryStore for SqliteTelemetryStore {
    async fn insert_batch(&self, records: &[TelemetryRecord]) -> Result<(), PersistError> {
        if records.is_empty() {
            return Ok(());
        }

        // One transaction for the whole batch keeps the write
        // all-or-nothing, which the retry loop depends on.
        let mut tx = self.pool.begin().await.map_err(classify_store_error)?;

        for record in records {
            let extra_json = if record.extra.is_empty() {
                None
            } else {
                serde_json::to_string(&record.extra).ok()
            };

            sqlx::query(
                r#"
                INSERT INTO telemetry (
                    vehicle_id, order_id, scenario, device_id, operator,
                    latitude, longitude, utm_x, utm_y,
                    accuracy, altitude, bearing, provider, is_mock_location, location_age_ms,
                    satellites_used, satellites_total, satellites_avg_snr,
                    speed, speed_accuracy, vertical_accuracy, distance_travelled, movement_type,
                    app_state, app_version, gps_enabled,
                    battery_level, battery_charging, battery_status, battery_saver_on, doze_mode_active,
                    network_type, network_connected,
                    device_manufacturer, device_model, android_version,
                    memory_available_mb, memory_low,
                    execution_counter, last_reset_reason,
                    recorded_at, recorded_at_local, extra
                ) VALUES (
                    ?, ?, ?, ?, ?,
                    ?, ?, ?, ?,
                    ?, ?, ?, ?, ?, ?,
                    ?, ?, ?,
                    ?, ?, ?, ?, ?,
                    ?, ?, ?,
                    ?, ?, ?, ?, ?,
                    ?, ?,
                    ?, ?, ?,
                    ?, ?,
                    ?, ?,
                    ?, ?, ?
                )
                "#,
            )
            .bind(&record.vehicle_id)
            .bind(&record.order_id)
            .bind(&record.scenario)
            .bind(&record.device_id)
            .bind(&record.operator)
            .bind(record.latitude)
            .bind(record.longitude)
            .bind(record.utm_x)
            .bind(record.utm_y)
            .bind(record.accuracy)
            .bind(record.altitude)
            .bind(record.bearing)
            .bind(&record.provider)
            .bind(record.is_mock_location)
            .bind(record.location_age_ms)
            .bind(record.satellites_used)
            .bind(record.satellites_total)
            .bind(record.satellites_avg_snr)
            .bind(record.speed)
            .bind(record.speed_accuracy)
            .bind(record.vertical_accuracy)
            .bind(record.distance_travelled)
            .bind(&record.movement_type)
            .bind(&record.app_state)
            .bind(&record.app_version)
            .bind(record.gps_enabled)
            .bind(record.battery_level)
            .bind(record.battery_charging)
            .bind(&record.battery_status)
            .bind(record.battery_saver_on)
            .bind(record.doze_mode_active)
            .bind(&record.network_type)
            .bind(record.network_connected)
            .bind(&record.device_manufacturer)
            .bind(&record.device_model)
            .bind(&record.android_version)
            .bind(record.memory_available_mb)
            .bind(record.memory_low)
            .bind(record.execution_counter)
            .bind(&record.last_reset_reason)
            .bind(record.recorded_at.timestamp_millis())
            .bind(&record.recorded_at_local)
            .bind(extra_json)
            .execute(tx.as_mut())
            .await
            .map_err(classify_store_error)?;
        }

        tx.commit().await.map_err(classify_store_error)?;
        Ok(())
    }

    async fn existing_vehicles(
        &self,
        ids: &HashSet<String>,
    ) -> Result<HashSet<String>, PersistError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT id FROM vehicles WHERE id IN ({})", placeholders);

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(classify_store_error)?;

        Ok(rows.into_iter().collect())
    }

    async fn upsert_vehicle_stub(&self, vehicle_id: &str) -> Result<(), PersistError> {
        sqlx::query(
            r#"
            INSERT INTO vehicles (id, label, fleet_id, show_on_map, status, created_at)
            VALUES (?, ?, 0, 1, 1, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(vehicle_id)
        .bind(format!("Vehicle {}", vehicle_id))
        .bind(Utc::now().timestamp_millis())
        .execute(self.pool.as_ref())
        .await
        .map_err(classify_store_error)?;
        Ok(())
    }
}
