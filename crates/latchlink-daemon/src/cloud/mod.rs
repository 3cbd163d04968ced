// ============================================
// File: crates/latchlink-daemon/src/cloud/mod.rs
// ============================================
//! # Cloud Identity Service
//!
//! ## Creation Reason
//! The lock only trusts keys the vendor cloud has certified, and only
//! accepts time the cloud has signed. This module is the seam to that
//! service.
//!
//! ## Main Functionality
//! - `CloudService`: What the engine needs from the cloud
//! - `HttpCloud`: REST implementation
//! - Wire models in [`models`]
//!
//! ## Call Sites
//! ```text
//! register ──► register_device ─┐
//! renew    ──► renew_certificate ├─► CredentialStore
//! handshake ─► get_signed_timestamp
//! resolver ──► get_activity_log
//! CLI ───────► list_locks, delete_mobile
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Retries and backoff for cloud calls belong to the caller; a single
//!   failure is a `CloudError`, nothing more
//! - Never log the API key or the access token
//!
//! ## Last Modified
//! v0.1.0 - Initial cloud client

pub mod http;
pub mod models;

use async_trait::async_trait;
use serde::Serialize;

use latchlink_common::types::{ActorId, DeviceId, MobileId};
use latchlink_core::crypto::{Certificate, IdentityPublicKey, SignedTimestamp};

use crate::error::CloudError;

pub use http::HttpCloud;

/// Result type for cloud calls.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

// ============================================
// Domain Types
// ============================================

/// Certificate plus the lock key it lets us talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Certificate for our device key.
    pub certificate: Certificate,
    /// Identity key of the lock.
    pub lock_key: IdentityPublicKey,
}

/// Outcome of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Id the cloud assigned to this controller.
    pub mobile_id: MobileId,
    /// First certificate.
    pub issued: IssuedCertificate,
}

/// One activity log entry naming an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    /// Actor id carried in notifications.
    pub actor: ActorId,
    /// Display name.
    pub name: String,
}

/// A lock on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    /// Cloud device id.
    pub id: DeviceId,
    /// Display name.
    pub name: String,
    /// Serial number as printed.
    pub serial: String,
}

// ============================================
// CloudService Trait
// ============================================

/// Cloud identity service.
#[async_trait]
pub trait CloudService: Send + Sync {
    /// Registers `public_key` for `device_id` and obtains the first
    /// certificate.
    ///
    /// # Errors
    /// `Unauthorized` if the token is refused or lacks scopes.
    async fn register_device(
        &self,
        public_key: &IdentityPublicKey,
        access_token: &str,
        device_id: DeviceId,
    ) -> CloudResult<Registration>;

    /// Requests a fresh certificate for the registered key.
    async fn renew_certificate(
        &self,
        mobile_id: MobileId,
        device_id: DeviceId,
    ) -> CloudResult<IssuedCertificate>;

    /// Fetches a short-lived cloud-signed time.
    async fn get_signed_timestamp(&self) -> CloudResult<SignedTimestamp>;

    /// Fetches the activity log of a lock, newest first.
    async fn get_activity_log(&self, device_id: DeviceId) -> CloudResult<Vec<ActivityEntry>>;

    /// Lists the locks on the account.
    async fn list_locks(&self) -> CloudResult<Vec<LockInfo>>;

    /// Removes a registered controller.
    async fn delete_mobile(&self, mobile_id: MobileId) -> CloudResult<()>;
}
