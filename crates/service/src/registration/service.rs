use std::sync::Arc;

use chrono::Utc;
use models::registration::{normalize_id, position_by_id};
use models::{Registration, RegistrationInput};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::storage::facade::StorageFacade;

/// Whole-collection CRUD over the storage facade.
///
/// Every mutation loads the full collection, edits it in memory and saves it
/// back while holding `write_lock`, so mutations in one process never
/// interleave. Separate processes can still overwrite each other.
pub struct RegistrationService {
    storage: Arc<StorageFacade>,
    write_lock: Mutex<()>,
}

impl RegistrationService {
    pub fn new(storage: Arc<StorageFacade>) -> Self {
        Self { storage, write_lock: Mutex::new(()) }
    }

    pub fn storage(&self) -> &Arc<StorageFacade> {
        &self.storage
    }

    async fn load(&self) -> Result<Vec<Registration>, ServiceError> {
        let outcome = self.storage.get_registrations().await;
        if !outcome.success {
            return Err(ServiceError::Storage(outcome.message));
        }
        Ok(outcome.data)
    }

    async fn save(&self, registrations: &[Registration]) -> Result<(), ServiceError> {
        let outcome = self.storage.save_registrations(registrations).await;
        if !outcome.success {
            return Err(ServiceError::Storage(outcome.message));
        }
        Ok(())
    }

    pub async fn get_registrations(&self) -> Result<Vec<Registration>, ServiceError> {
        self.load().await
    }

    /// Exact id first, then the normalized form (`"ABC-123"` finds `"abc123"`).
    pub async fn get_registration_by_id(&self, id: &str) -> Result<Option<Registration>, ServiceError> {
        let registrations = self.load().await?;
        Ok(position_by_id(&registrations, id).map(|i| registrations[i].clone()))
    }

    pub async fn store_registration(&self, input: RegistrationInput) -> Result<Registration, ServiceError> {
        let registration = input.into_registration(Utc::now())?;

        let _guard = self.write_lock.lock().await;
        let mut registrations = self.load().await?;
        let wanted = normalize_id(&registration.registration_id);
        if registrations.iter().any(|r| {
            r.registration_id == registration.registration_id || normalize_id(&r.registration_id) == wanted
        }) {
            warn!(registration_id = %registration.registration_id, "duplicate registration id rejected");
            return Err(ServiceError::Conflict(format!(
                "registration {} already exists",
                registration.registration_id
            )));
        }
        registrations.push(registration.clone());
        self.save(&registrations).await?;
        info!(
            event = "registration_stored",
            registration_id = %registration.registration_id,
            total = registrations.len(),
            "registration stored"
        );
        Ok(registration)
    }

    pub async fn update_registration_donation(
        &self,
        id: &str,
        amount: f64,
        session_id: Option<String>,
    ) -> Result<Registration, ServiceError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(ServiceError::Validation("amount must be a non-negative number".into()));
        }

        let _guard = self.write_lock.lock().await;
        let mut registrations = self.load().await?;
        let index = position_by_id(&registrations, id).ok_or_else(|| ServiceError::not_found("registration"))?;
        registrations[index].record_donation(amount, session_id, Utc::now());
        let updated = registrations[index].clone();
        self.save(&registrations).await?;
        info!(
            event = "donation_recorded",
            registration_id = %updated.registration_id,
            amount = %updated.donation_amount,
            "registration donation updated"
        );
        Ok(updated)
    }

    /// Remove one record. An unknown id leaves storage untouched.
    pub async fn delete_registration(&self, id: &str) -> Result<Registration, ServiceError> {
        let _guard = self.write_lock.lock().await;
        let mut registrations = self.load().await?;
        let index = position_by_id(&registrations, id).ok_or_else(|| ServiceError::not_found("registration"))?;
        let removed = registrations.remove(index);
        self.save(&registrations).await?;
        info!(
            event = "registration_deleted",
            registration_id = %removed.registration_id,
            remaining = registrations.len(),
            "registration deleted"
        );
        Ok(removed)
    }
}
