//! Dependency repair: provisioning missing parent vehicles.
//!
//! Invoked by the flush executor when a batch fails with a foreign-key
//! violation. The repairer only fixes prerequisites and reports what it
//! fixed; deciding whether to retry the batch stays with the executor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;

use crate::error_handling::ProvisionError;
use crate::models::TelemetryRecord;
use crate::storage::TelemetryStore;

/// External endpoint that can create a vehicle the store doesn't know yet.
#[async_trait]
pub trait VehicleProvisioner: Send + Sync {
    /// Requests creation of the given vehicle. Success means the request
    /// was accepted, not that the vehicle is immediately visible; the
    /// repairer re-checks existence after a settle delay.
    async fn provision(&self, vehicle_id: &str) -> Result<(), ProvisionError>;
}

#[derive(Serialize)]
struct ProvisionRequest<'a> {
    vehicle_id: &'a str,
}

/// [`VehicleProvisioner`] that POSTs to an internal creation service.
pub struct HttpProvisioner {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProvisioner {
    /// Creates a provisioner that POSTs to `endpoint` with the given client.
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        HttpProvisioner { client, endpoint }
    }
}

#[async_trait]
impl VehicleProvisioner for HttpProvisioner {
    async fn provision(&self, vehicle_id: &str) -> Result<(), ProvisionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ProvisionRequest { vehicle_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Provisions the parent vehicles a failed batch references.
pub struct DependencyRepairer {
    store: Arc<dyn TelemetryStore>,
    provisioner: Option<Arc<dyn VehicleProvisioner>>,
    settle: Duration,
}

impl DependencyRepairer {
    /// Creates a repairer. With no `provisioner`, missing vehicles are
    /// created as stub rows directly in the store.
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        provisioner: Option<Arc<dyn VehicleProvisioner>>,
        settle: Duration,
    ) -> Self {
        DependencyRepairer {
            store,
            provisioner,
            settle,
        }
    }

    /// Attempts to provision every missing vehicle the batch references.
    ///
    /// Returns the identifiers confirmed to exist afterwards. A vehicle
    /// that could not be provisioned is logged and skipped; partial
    /// failure never aborts the pass for the others. An empty result
    /// means nothing was repaired (the executor grants no bonus retry).
    pub async fn repair(&self, batch: &[TelemetryRecord]) -> Vec<String> {
        let referenced: HashSet<String> =
            batch.iter().map(|r| r.vehicle_id.clone()).collect();

        let existing = match self.store.existing_vehicles(&referenced).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Repair aborted: existence check failed: {e}");
                return Vec::new();
            }
        };

        let missing: HashSet<String> = referenced
            .difference(&existing)
            .cloned()
            .collect();
        if missing.is_empty() {
            // FK violation but every referenced vehicle exists: the
            // conflict resolved underneath us (e.g. a concurrent import).
            info!("Repair found no missing vehicles among {} referenced", referenced.len());
            return Vec::new();
        }

        info!(
            "Repair pass: {} of {} referenced vehicle(s) missing",
            missing.len(),
            referenced.len()
        );

        let mut used_endpoint = false;
        for vehicle_id in &missing {
            match &self.provisioner {
                Some(provisioner) => match provisioner.provision(vehicle_id).await {
                    Ok(()) => {
                        used_endpoint = true;
                        info!("Provisioning requested for vehicle {vehicle_id}");
                    }
                    Err(e) => {
                        warn!(
                            "Provisioning endpoint failed for vehicle {vehicle_id}: {e}; \
                             creating stub row instead"
                        );
                        self.upsert_stub(vehicle_id).await;
                    }
                },
                None => {
                    // No endpoint configured; the stub row is the only
                    // provisioning path.
                    self.upsert_stub(vehicle_id).await;
                }
            }
        }

        // Give the provisioning service time to materialize the vehicles
        // before trusting the existence check again.
        if used_endpoint && !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let after_settle = match self.store.existing_vehicles(&missing).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Repair existence re-check failed: {e}");
                return Vec::new();
            }
        };

        // Endpoint said yes but the vehicle still isn't visible: fall back
        // to a stub row rather than leaving the batch unrepairable.
        let mut stubbed = false;
        for vehicle_id in missing.difference(&after_settle) {
            warn!("Vehicle {vehicle_id} still missing after settle; creating stub row");
            self.upsert_stub(vehicle_id).await;
            stubbed = true;
        }

        let confirmed_set = if stubbed {
            match self.store.existing_vehicles(&missing).await {
                Ok(existing) => existing,
                Err(e) => {
                    warn!("Repair final existence check failed: {e}");
                    after_settle
                }
            }
        } else {
            after_settle
        };

        let confirmed: Vec<String> = confirmed_set.into_iter().collect();
        if confirmed.len() < missing.len() {
            warn!(
                "Repair provisioned {} of {} missing vehicle(s)",
                confirmed.len(),
                missing.len()
            );
        } else {
            info!("Repair provisioned all {} missing vehicle(s)", missing.len());
        }
        confirmed
    }

    async fn upsert_stub(&self, vehicle_id: &str) {
        if let Err(e) = self.store.upsert_vehicle_stub(vehicle_id).await {
            warn!("Failed to create stub row for vehicle {vehicle_id}: {e}");
        }
    }
}
