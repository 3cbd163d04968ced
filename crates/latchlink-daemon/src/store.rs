// ============================================
// File: crates/latchlink-daemon/src/store.rs
// ============================================
//! # Credential & Certificate Store
//!
//! ## Creation Reason
//! Owns the device key pair and the cloud-issued certificate, and keeps
//! the certificate fresh so a handshake is never attempted with an
//! expired one.
//!
//! ## Main Functionality
//! - `register()`: One-time key generation and certificate issuance
//! - `get_active_credential()`: Current record, renewed first when close
//!   to expiry
//! - `renew()`: New certificate for the existing key pair
//! - `get_signed_timestamp()`: Cloud-signed time for one handshake
//! - `unregister()`: Removes the controller from the cloud and disk
//! - Renewal broadcast for the activity resolver
//!
//! ## Renewal Decision
//! ```text
//!            now < expiry - margin ──────────► current record
//!                     │ no
//!                     ▼
//!                 renew() ── ok ─────────────► new record
//!                     │ err
//!                     ▼
//!     certificate still valid? ── yes ──────► current record (warn)
//!                     │ no
//!                     ▼
//!               RenewalError
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Records are replaced wholesale (`Arc` swap); a live session keeps
//!   the record it handshook with
//! - Concurrent renewals are coalesced behind one async mutex
//! - The credential file holds the private key: it is written `0o600`
//!   through a temp file and rename
//!
//! ## Last Modified
//! v0.1.0 - Initial credential store

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use latchlink_common::time::{Clock, Timestamp};
use latchlink_common::types::{DeviceId, MobileId};
use latchlink_core::crypto::{
    Certificate, ClientCredentials, IdentityKeyPair, IdentityPublicKey, SignedTimestamp,
};

use crate::cloud::{CloudService, IssuedCertificate};
use crate::error::{CloudError, DaemonError, Result};

// ============================================
// CredentialRecord
// ============================================

/// Key pair plus the certificate issued for it.
#[derive(Debug)]
pub struct CredentialRecord {
    /// Device identity key.
    pub identity: Arc<IdentityKeyPair>,
    /// Cloud-issued certificate for `identity`.
    pub certificate: Certificate,
    /// Identity key of the lock, returned with the certificate.
    pub lock_key: IdentityPublicKey,
    /// Id the cloud assigned to this controller.
    pub mobile_id: MobileId,
    /// Lock the certificate is for.
    pub device_id: DeviceId,
}

impl CredentialRecord {
    /// Certificate expiry.
    #[must_use]
    pub const fn expires_at(&self) -> Timestamp {
        self.certificate.expires_at()
    }

    /// Borrows the handshake credentials for one attempt.
    #[must_use]
    pub fn credentials(&self, signed_time: SignedTimestamp) -> ClientCredentials<'_> {
        ClientCredentials {
            identity: self.identity.as_ref(),
            certificate: &self.certificate,
            lock_key: self.lock_key,
            signed_time,
        }
    }

    fn with_certificate(&self, issued: IssuedCertificate) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            certificate: issued.certificate,
            lock_key: issued.lock_key,
            mobile_id: self.mobile_id,
            device_id: self.device_id,
        }
    }
}

/// On-disk form of a [`CredentialRecord`].
#[derive(Serialize, Deserialize)]
struct StoredCredential {
    private_key: String,
    certificate: Certificate,
    lock_key: IdentityPublicKey,
    mobile_id: MobileId,
    device_id: DeviceId,
    expires_at: Timestamp,
}

impl StoredCredential {
    fn from_record(record: &CredentialRecord) -> Self {
        let seed = Zeroizing::new(record.identity.to_bytes());
        Self {
            private_key: BASE64.encode(&*seed),
            certificate: record.certificate.clone(),
            lock_key: record.lock_key,
            mobile_id: record.mobile_id,
            device_id: record.device_id,
            expires_at: record.certificate.expires_at(),
        }
    }

    fn into_record(self) -> std::result::Result<CredentialRecord, String> {
        let seed = Zeroizing::new(BASE64.decode(&self.private_key).map_err(|e| e.to_string())?);
        let identity = IdentityKeyPair::from_bytes(&seed).map_err(|e| e.to_string())?;
        if *self.certificate.subject() != identity.public_key() {
            return Err("certificate does not match the stored key".into());
        }
        Ok(CredentialRecord {
            identity: Arc::new(identity),
            certificate: self.certificate,
            lock_key: self.lock_key,
            mobile_id: self.mobile_id,
            device_id: self.device_id,
        })
    }
}

// ============================================
// CredentialStore
// ============================================

/// Owner of the credential record.
pub struct CredentialStore {
    cloud: Arc<dyn CloudService>,
    clock: Arc<dyn Clock>,
    margin: Duration,
    path: Option<PathBuf>,
    record: RwLock<Option<Arc<CredentialRecord>>>,
    renewal: Mutex<()>,
    renewals: broadcast::Sender<()>,
}

impl CredentialStore {
    /// Opens the store backed by `path`, loading an existing record.
    ///
    /// # Errors
    /// `Storage` if the file exists but cannot be read or parsed.
    pub async fn open(
        cloud: Arc<dyn CloudService>,
        clock: Arc<dyn Clock>,
        margin: Duration,
        path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let path = path.into();
        let record = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let stored: StoredCredential = serde_json::from_str(&content)
                    .map_err(|e| DaemonError::storage(path.display().to_string(), e))?;
                let record = stored
                    .into_record()
                    .map_err(|e| DaemonError::storage(path.display().to_string(), e))?;
                info!(
                    mobile_id = %record.mobile_id,
                    device_id = %record.device_id,
                    expires = %record.expires_at(),
                    "Credential loaded"
                );
                Some(Arc::new(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No credential file");
                None
            }
            Err(e) => return Err(DaemonError::storage(path.display().to_string(), e)),
        };

        let mut store = Self::in_memory(cloud, clock, margin);
        store.path = Some(path);
        *store.record.get_mut() = record;
        Ok(store)
    }

    /// Creates a store that never touches the disk.
    #[must_use]
    pub fn in_memory(cloud: Arc<dyn CloudService>, clock: Arc<dyn Clock>, margin: Duration) -> Self {
        let (renewals, _) = broadcast::channel(8);
        Self {
            cloud,
            clock,
            margin,
            path: None,
            record: RwLock::new(None),
            renewal: Mutex::new(()),
            renewals,
        }
    }

    /// Current record, if registered.
    #[must_use]
    pub fn current(&self) -> Option<Arc<CredentialRecord>> {
        self.record.read().clone()
    }

    /// Returns `true` once a record exists.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.record.read().is_some()
    }

    /// Cloud service this store talks to.
    #[must_use]
    pub fn cloud(&self) -> &Arc<dyn CloudService> {
        &self.cloud
    }

    /// Receiver notified after every successful renewal.
    #[must_use]
    pub fn subscribe_renewals(&self) -> broadcast::Receiver<()> {
        self.renewals.subscribe()
    }

    /// Returns `true` if the certificate expires within the margin.
    #[must_use]
    pub fn needs_renewal(&self) -> bool {
        self.current()
            .is_some_and(|record| self.within_margin(&record))
    }

    fn within_margin(&self, record: &CredentialRecord) -> bool {
        record.expires_at().saturating_sub(self.margin) <= self.clock.now()
    }

    // ========================================
    // Operations
    // ========================================

    /// Generates a key pair and registers it for `device_id`.
    ///
    /// Replaces any existing record.
    ///
    /// # Errors
    /// `Registration` if the cloud refuses, or returns a certificate for
    /// another key or lock; `Storage` if the record cannot be saved.
    pub async fn register(
        &self,
        access_token: &str,
        device_id: DeviceId,
    ) -> Result<Arc<CredentialRecord>> {
        let _guard = self.renewal.lock().await;
        let identity = IdentityKeyPair::generate();
        let public_key = identity.public_key();

        let registration = self
            .cloud
            .register_device(&public_key, access_token, device_id)
            .await
            .map_err(DaemonError::Registration)?;
        let certificate = &registration.issued.certificate;
        if *certificate.subject() != public_key {
            return Err(DaemonError::Registration(CloudError::invalid(
                "certificate issued for another key",
            )));
        }
        if certificate.device_id() != device_id {
            return Err(DaemonError::Registration(CloudError::invalid(format!(
                "certificate issued for device {}",
                certificate.device_id()
            ))));
        }

        let record = Arc::new(CredentialRecord {
            identity: Arc::new(identity),
            certificate: registration.issued.certificate,
            lock_key: registration.issued.lock_key,
            mobile_id: registration.mobile_id,
            device_id,
        });
        self.persist(&record).await?;
        *self.record.write() = Some(Arc::clone(&record));
        info!(
            mobile_id = %record.mobile_id,
            key = %public_key.fingerprint(),
            expires = %record.expires_at(),
            "Device registered"
        );
        Ok(record)
    }

    /// Returns the record to handshake with, renewing first if needed.
    ///
    /// # Errors
    /// `NotRegistered` without a record; `Renewal` if renewal failed and
    /// the certificate has already expired.
    pub async fn get_active_credential(&self) -> Result<Arc<CredentialRecord>> {
        let record = self.current().ok_or(DaemonError::NotRegistered)?;
        if !self.within_margin(&record) {
            return Ok(record);
        }

        match self.renew().await {
            Ok(renewed) => Ok(renewed),
            Err(e) => {
                let record = self.current().ok_or(DaemonError::NotRegistered)?;
                if record.certificate.is_valid_at(self.clock.now()) {
                    warn!(error = %e, expires = %record.expires_at(), "Renewal failed, using current certificate");
                    Ok(record)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Requests a new certificate for the existing key pair.
    ///
    /// A renewal that finishes while this call waits for the lock is
    /// reused instead of asking the cloud again.
    ///
    /// # Errors
    /// `NotRegistered` without a record; `Renewal` if the cloud call fails
    /// or returns a certificate for another key.
    pub async fn renew(&self) -> Result<Arc<CredentialRecord>> {
        let before = self.current().ok_or(DaemonError::NotRegistered)?;
        let _guard = self.renewal.lock().await;

        let current = self.current().ok_or(DaemonError::NotRegistered)?;
        if !Arc::ptr_eq(&before, &current) {
            debug!("Renewal already completed by another caller");
            return Ok(current);
        }

        debug!(mobile_id = %current.mobile_id, "Renewing certificate");
        let issued = self
            .cloud
            .renew_certificate(current.mobile_id, current.device_id)
            .await
            .map_err(DaemonError::Renewal)?;
        if *issued.certificate.subject() != current.identity.public_key() {
            return Err(DaemonError::Renewal(CloudError::invalid(
                "certificate issued for another key",
            )));
        }

        let renewed = Arc::new(current.with_certificate(issued));
        self.persist(&renewed).await?;
        *self.record.write() = Some(Arc::clone(&renewed));
        info!(expires = %renewed.expires_at(), "Certificate renewed");
        let _ = self.renewals.send(());
        Ok(renewed)
    }

    /// Removes this controller from the cloud and forgets the record.
    ///
    /// A controller the cloud no longer knows is removed locally anyway.
    ///
    /// # Errors
    /// `NotRegistered` without a record; `Cloud` if the cloud refuses;
    /// `Storage` if the credential file cannot be removed.
    pub async fn unregister(&self) -> Result<()> {
        let _guard = self.renewal.lock().await;
        let record = self.current().ok_or(DaemonError::NotRegistered)?;

        match self.cloud.delete_mobile(record.mobile_id).await {
            Ok(()) => {}
            Err(CloudError::Status { status: 404, .. }) => {
                warn!(mobile_id = %record.mobile_id, "Controller already unknown to the cloud");
            }
            Err(e) => return Err(DaemonError::Cloud(e)),
        }

        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(DaemonError::storage(path.display().to_string(), e)),
            }
        }
        *self.record.write() = None;
        info!(mobile_id = %record.mobile_id, "Device unregistered");
        Ok(())
    }

    /// Fetches a cloud-signed time for one handshake.
    ///
    /// # Errors
    /// `Cloud` if the call fails.
    pub async fn get_signed_timestamp(&self) -> Result<SignedTimestamp> {
        self.cloud
            .get_signed_timestamp()
            .await
            .map_err(DaemonError::Cloud)
    }

    // ========================================
    // Persistence
    // ========================================

    async fn persist(&self, record: &CredentialRecord) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = Zeroizing::new(
            serde_json::to_string_pretty(&StoredCredential::from_record(record))
                .map_err(|e| DaemonError::storage("credential encode", e))?,
        );
        write_private(path, content.as_bytes()).await
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

/// Writes `content` to `path` with owner-only permissions, atomically.
///
/// # Errors
/// `Storage` on any I/O failure.
pub async fn write_private(path: &Path, content: &[u8]) -> Result<()> {
    let context = || path.display().to_string();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DaemonError::storage(context(), e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| DaemonError::storage(context(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(&tmp)
            .await
            .map_err(|e| DaemonError::storage(context(), e))?
            .permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(&tmp, perms)
            .await
            .map_err(|e| DaemonError::storage(context(), e))?;
    }

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| DaemonError::storage(context(), e))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedCloud;
    use latchlink_common::time::ManualClock;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn setup() -> (Arc<SimulatedCloud>, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_secs(1_700_000_000));
        let cloud = Arc::new(SimulatedCloud::new(clock.clone(), DeviceId(42)));
        (cloud, clock)
    }

    #[tokio::test]
    async fn test_register_and_reload() {
        let (cloud, clock) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("credential.json");

        let store = CredentialStore::open(cloud.clone(), Arc::new(clock.clone()), 5 * DAY, &path)
            .await
            .unwrap();
        assert!(!store.is_registered());
        let record = store.register("token", DeviceId(42)).await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let reopened = CredentialStore::open(cloud, Arc::new(clock), 5 * DAY, &path)
            .await
            .unwrap();
        let loaded = reopened.current().unwrap();
        assert_eq!(loaded.certificate, record.certificate);
        assert_eq!(loaded.identity.public_key(), record.identity.public_key());
        assert_eq!(loaded.mobile_id, record.mobile_id);
    }

    #[tokio::test]
    async fn test_registration_refused() {
        let (cloud, clock) = setup();
        cloud.reject_registration(true);
        let store = CredentialStore::in_memory(cloud, Arc::new(clock), 5 * DAY);
        let err = store.register("token", DeviceId(42)).await.unwrap_err();
        assert!(matches!(err, DaemonError::Registration(_)));
        assert!(err.is_fatal());
        assert!(!store.is_registered());
    }

    #[tokio::test]
    async fn test_renews_within_margin() {
        let (cloud, clock) = setup();
        let store = CredentialStore::in_memory(cloud.clone(), Arc::new(clock.clone()), 5 * DAY);
        let first = store.register("token", DeviceId(42)).await.unwrap();
        let mut renewals = store.subscribe_renewals();

        let active = store.get_active_credential().await.unwrap();
        assert!(Arc::ptr_eq(&first, &active));
        assert_eq!(cloud.renewal_calls(), 0);

        clock.advance(cloud.certificate_lifetime() - 4 * DAY);
        assert!(store.needs_renewal());
        let active = store.get_active_credential().await.unwrap();
        assert!(active.expires_at() > first.expires_at());
        assert_eq!(cloud.renewal_calls(), 1);
        assert!(renewals.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_failed_renewal_keeps_valid_certificate() {
        let (cloud, clock) = setup();
        let store = CredentialStore::in_memory(cloud.clone(), Arc::new(clock.clone()), 5 * DAY);
        let first = store.register("token", DeviceId(42)).await.unwrap();

        cloud.fail_renewals(true);
        clock.advance(cloud.certificate_lifetime() - DAY);
        let active = store.get_active_credential().await.unwrap();
        assert!(Arc::ptr_eq(&first, &active));

        clock.advance(2 * DAY);
        let err = store.get_active_credential().await.unwrap_err();
        assert!(matches!(err, DaemonError::Renewal(_)));
    }

    #[tokio::test]
    async fn test_unregister_removes_file_and_mobile() {
        let (cloud, clock) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        let store = CredentialStore::open(cloud.clone(), Arc::new(clock), 5 * DAY, &path)
            .await
            .unwrap();
        store.register("token", DeviceId(42)).await.unwrap();
        assert!(path.exists());

        store.unregister().await.unwrap();
        assert!(!store.is_registered());
        assert!(!path.exists());
        assert!(matches!(store.unregister().await, Err(DaemonError::NotRegistered)));
    }

    #[tokio::test]
    async fn test_unregistered() {
        let (cloud, clock) = setup();
        let store = CredentialStore::in_memory(cloud, Arc::new(clock), 5 * DAY);
        assert!(matches!(
            store.get_active_credential().await,
            Err(DaemonError::NotRegistered)
        ));
        assert!(!store.needs_renewal());
    }
}
