// ============================================
// File: crates/latchlink-daemon/src/cloud/http.rs
// ============================================
//! # REST Cloud Client
//!
//! ## Main Functionality
//! `HttpCloud` implements [`CloudService`] against the vendor REST API.
//!
//! ## Endpoints
//! | Operation | Request |
//! |-----------|---------|
//! | register_device | `POST /my/mobile`, then certificate fetch |
//! | renew_certificate | `GET /my/devicecertificate/getformobile` |
//! | get_signed_timestamp | `GET /datetime/getsignedtime` |
//! | get_activity_log | `GET /my/deviceactivity` |
//! | list_locks | `GET /my/device/details` |
//! | delete_mobile | `DELETE /my/mobile/{id}` |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Registration authenticates with the caller's access token; every
//!   other call uses the configured API key
//! - 401/403 map to `Unauthorized` regardless of envelope content

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use latchlink_common::types::{DeviceId, MobileId};
use latchlink_core::crypto::{IdentityPublicKey, SignedTimestamp};

use super::models::{
    ActivityRecord, CertificateResult, DeviceDetailsResult, Envelope, RegisterMobileRequest,
    RegisterMobileResult, SignedTimeResult,
};
use super::{ActivityEntry, CloudResult, CloudService, IssuedCertificate, LockInfo, Registration};
use crate::config::CloudConfig;
use crate::error::CloudError;

/// Number of activity records requested per lookup.
pub const ACTIVITY_PAGE_SIZE: u32 = 200;

/// Controller name sent on registration.
pub const CONTROLLER_NAME: &str = "latchlink";

/// Vendor REST client.
pub struct HttpCloud {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl HttpCloud {
    /// Creates a client from configuration.
    ///
    /// # Errors
    /// `Http` if the TLS backend cannot be initialized.
    pub fn new(config: &CloudConfig) -> CloudResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(CloudError::http)?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> CloudResult<RequestBuilder> {
        let key = self.api_key.as_deref().ok_or_else(|| CloudError::Unauthorized {
            reason: "no API key configured".into(),
        })?;
        Ok(request.header("Authorization", format!("PersonalKey {key}")))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> CloudResult<T> {
        let response = request.send().await.map_err(CloudError::http)?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> CloudResult<T> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CloudError::Unauthorized {
                reason: format!("status {}", status.as_u16()),
            });
        }
        let body = response.text().await.map_err(CloudError::http)?;
        match serde_json::from_str::<Envelope<T>>(&body) {
            Ok(envelope) => envelope.into_result(status.as_u16()),
            Err(_) if !status.is_success() => Err(CloudError::Status {
                status: status.as_u16(),
                messages: Vec::new(),
            }),
            Err(e) => Err(CloudError::invalid(e.to_string())),
        }
    }

    async fn fetch_certificate(
        &self,
        request: RequestBuilder,
    ) -> CloudResult<IssuedCertificate> {
        let result: CertificateResult = self.send(request).await?;
        debug!(expires = %result.expiration_date, "Certificate received");
        result.into_issued()
    }

    fn certificate_request(&self, mobile_id: MobileId, device_id: DeviceId) -> RequestBuilder {
        self.http
            .get(self.url("/my/devicecertificate/getformobile"))
            .query(&[("MobileId", mobile_id.0), ("DeviceId", device_id.0)])
    }
}

impl std::fmt::Debug for HttpCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCloud")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl CloudService for HttpCloud {
    async fn register_device(
        &self,
        public_key: &IdentityPublicKey,
        access_token: &str,
        device_id: DeviceId,
    ) -> CloudResult<Registration> {
        info!(device_id = %device_id, key = %public_key.fingerprint(), "Registering controller");
        let bearer = format!("Bearer {access_token}");

        let body = RegisterMobileRequest::new(CONTROLLER_NAME, public_key);
        let registered: RegisterMobileResult = self
            .send(
                self.http
                    .post(self.url("/my/mobile"))
                    .header("Authorization", &bearer)
                    .json(&body),
            )
            .await?;
        let mobile_id = MobileId(registered.id);

        let issued = self
            .fetch_certificate(
                self.certificate_request(mobile_id, device_id)
                    .header("Authorization", &bearer),
            )
            .await?;
        info!(mobile_id = %mobile_id, "Controller registered");
        Ok(Registration { mobile_id, issued })
    }

    async fn renew_certificate(
        &self,
        mobile_id: MobileId,
        device_id: DeviceId,
    ) -> CloudResult<IssuedCertificate> {
        debug!(mobile_id = %mobile_id, device_id = %device_id, "Requesting certificate");
        let request = self.authorized(self.certificate_request(mobile_id, device_id))?;
        self.fetch_certificate(request).await
    }

    async fn get_signed_timestamp(&self) -> CloudResult<SignedTimestamp> {
        let request = self.authorized(self.http.get(self.url("/datetime/getsignedtime")))?;
        let result: SignedTimeResult = self.send(request).await?;
        result.into_signed()
    }

    async fn get_activity_log(&self, device_id: DeviceId) -> CloudResult<Vec<ActivityEntry>> {
        let request = self.authorized(
            self.http
                .get(self.url("/my/deviceactivity"))
                .query(&[("DeviceId", device_id.0), ("Elements", u64::from(ACTIVITY_PAGE_SIZE))]),
        )?;
        let records: Vec<ActivityRecord> = self.send(request).await?;
        let total = records.len();
        let entries: Vec<_> = records.into_iter().filter_map(ActivityRecord::into_entry).collect();
        debug!(total, attributed = entries.len(), "Activity log fetched");
        Ok(entries)
    }

    async fn list_locks(&self) -> CloudResult<Vec<LockInfo>> {
        let request = self.authorized(self.http.get(self.url("/my/device/details")))?;
        let details: DeviceDetailsResult = self.send(request).await?;
        Ok(details.locks.into_iter().map(LockInfo::from).collect())
    }

    async fn delete_mobile(&self, mobile_id: MobileId) -> CloudResult<()> {
        let request = self.authorized(
            self.http
                .delete(self.url(&format!("/my/mobile/{}", mobile_id.0))),
        )?;
        let response = request.send().await.map_err(CloudError::http)?;
        let status = response.status();
        if status.is_success() {
            info!(mobile_id = %mobile_id, "Controller removed");
            return Ok(());
        }
        warn!(mobile_id = %mobile_id, status = status.as_u16(), "Controller removal refused");
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CloudError::Unauthorized {
                reason: format!("status {}", status.as_u16()),
            });
        }
        Err(CloudError::Status {
            status: status.as_u16(),
            messages: Vec::new(),
        })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(key: Option<&str>) -> CloudConfig {
        // Default base URL carries no trailing slash; make sure one is tolerated.
        CloudConfig {
            base_url: "https://cloud.example/api/v37/".into(),
            api_key: key.map(String::from),
            ..CloudConfig::default()
        }
    }

    #[test]
    fn test_url_join() {
        let cloud = HttpCloud::new(&config(Some("k"))).unwrap();
        assert_eq!(cloud.url("/my/mobile"), "https://cloud.example/api/v37/my/mobile");
    }

    #[test]
    fn test_debug_redacts_key() {
        let cloud = HttpCloud::new(&config(Some("secret-key"))).unwrap();
        let rendered = format!("{cloud:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("redacted"));
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let cloud = HttpCloud {
            api_key: None,
            ..HttpCloud::new(&config(None)).unwrap()
        };
        match cloud.get_signed_timestamp().await {
            Err(CloudError::Unauthorized { .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
