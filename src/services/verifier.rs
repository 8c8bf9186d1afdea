//! Activation verification: the check a client runs to redeem a code.
//!
//! # Protocol
//!
//! Steps run in this order and stop at the first failure:
//!
//! 1. Required fields present, else `INVALID_REQUEST`
//! 2. HMAC-SHA256 signature over the canonical string, else `SIGNATURE_INVALID`
//! 3. Timestamp within the tolerance window, else `TIMESTAMP_INVALID`
//! 4. Code exists for this app, else `CODE_NOT_FOUND`
//! 5. Code not revoked or expired, else `CODE_REVOKED` / `CODE_EXPIRED`
//! 6. Device already bound, or bound now if there is room, else `DEVICE_LIMIT_EXCEEDED`
//!
//! Nothing touches the store before step 4. A failed verification changes no
//! state except stamping a code whose deadline has passed as expired.

use crate::{
    crypto,
    models::{
        activation_code::{BindOutcome, CodeStatus},
        statistics::StatsEvent,
        verification::{ReasonCode, VerificationData, VerificationRequest, VerificationResponse},
    },
    services::statistics_service::StatisticsAggregator,
    store::{ActivationCodeStore, StoreError},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct ActivationVerifier {
    codes: Arc<dyn ActivationCodeStore>,
    statistics: StatisticsAggregator,
    secret: Vec<u8>,
    tolerance_ms: i64,
}

/// Outcome of the store-backed steps.
struct Checked {
    response: VerificationResponse,
    new_device: bool,
}

impl ActivationVerifier {
    pub fn new(
        codes: Arc<dyn ActivationCodeStore>,
        statistics: StatisticsAggregator,
        secret: impl Into<Vec<u8>>,
        tolerance_secs: i64,
    ) -> Self {
        Self {
            codes,
            statistics,
            secret: secret.into(),
            tolerance_ms: tolerance_secs.saturating_mul(1000),
        }
    }

    pub async fn verify(&self, request: &VerificationRequest) -> VerificationResponse {
        self.verify_at(request, Utc::now()).await
    }

    /// Run the protocol with `now` as the server clock.
    pub async fn verify_at(
        &self,
        request: &VerificationRequest,
        now: DateTime<Utc>,
    ) -> VerificationResponse {
        if [
            &request.app_id,
            &request.code,
            &request.device_id,
            &request.signature,
        ]
        .iter()
        .any(|field| field.trim().is_empty())
        {
            return VerificationResponse::rejected(ReasonCode::InvalidRequest);
        }

        if !crypto::verify_signature(&self.secret, &request.canonical_string(), &request.signature)
        {
            tracing::warn!(
                app_id = %request.app_id,
                device_id = %request.device_id,
                "Verification rejected: bad signature"
            );
            return VerificationResponse::rejected(ReasonCode::SignatureInvalid);
        }

        let skew = now.timestamp_millis().abs_diff(request.timestamp);
        if skew > self.tolerance_ms.unsigned_abs() {
            tracing::warn!(
                app_id = %request.app_id,
                device_id = %request.device_id,
                skew_ms = skew,
                "Verification rejected: stale timestamp"
            );
            return VerificationResponse::rejected(ReasonCode::TimestampInvalid);
        }

        let code = crypto::normalize_code(&request.code);
        match self.check_and_bind(request, &code, now).await {
            Ok(Checked {
                response,
                new_device,
            }) => {
                if response.success {
                    tracing::info!(
                        app_id = %request.app_id,
                        device_id = %request.device_id,
                        new_device,
                        "Activation verified"
                    );
                } else {
                    tracing::info!(
                        app_id = %request.app_id,
                        device_id = %request.device_id,
                        reason = response.code.as_str(),
                        "Activation rejected"
                    );
                }
                self.statistics.emit(StatsEvent::Verification {
                    app_id: request.app_id.clone(),
                    success: response.success,
                    new_device,
                });
                response
            }
            Err(e) => {
                tracing::error!(app_id = %request.app_id, error = %e, "Verification failed");
                VerificationResponse::rejected(ReasonCode::InternalError)
            }
        }
    }

    async fn check_and_bind(
        &self,
        request: &VerificationRequest,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Checked, StoreError> {
        let rejected = |reason| Checked {
            response: VerificationResponse::rejected(reason),
            new_device: false,
        };

        let Some(record) = self.codes.find(code).await? else {
            return Ok(rejected(ReasonCode::CodeNotFound));
        };
        // A code from another app must look exactly like a missing one.
        if record.app_id != request.app_id {
            return Ok(rejected(ReasonCode::CodeNotFound));
        }
        match record.status {
            CodeStatus::Revoked => return Ok(rejected(ReasonCode::CodeRevoked)),
            CodeStatus::Expired => return Ok(rejected(ReasonCode::CodeExpired)),
            // Past-deadline codes go through the bind so the expiry is stamped.
            CodeStatus::Active => {}
        }

        let outcome = self
            .codes
            .bind_device(
                &request.app_id,
                code,
                &request.device_id,
                request.device_info.as_ref(),
                now,
            )
            .await?;

        let (newly_bound, devices_used) = match outcome {
            BindOutcome::Bound {
                newly_bound,
                devices_used,
            } => (newly_bound, devices_used),
            BindOutcome::DeviceLimitExceeded => {
                return Ok(rejected(ReasonCode::DeviceLimitExceeded));
            }
            BindOutcome::Revoked => return Ok(rejected(ReasonCode::CodeRevoked)),
            BindOutcome::Expired => return Ok(rejected(ReasonCode::CodeExpired)),
            BindOutcome::NotFound => return Ok(rejected(ReasonCode::CodeNotFound)),
        };

        let mut response = VerificationResponse::accepted(VerificationData {
            app_id: request.app_id.clone(),
            device_id: request.device_id.clone(),
            devices_used,
            max_devices: record.max_devices,
            remaining_devices: (record.max_devices - devices_used).max(0),
            expires_at: record.expires_at,
        });
        let timestamp = now.timestamp_millis();
        response.signature = Some(crypto::sign(
            &self.secret,
            &VerificationResponse::canonical_string(
                code,
                &request.app_id,
                &request.device_id,
                timestamp,
            ),
        ));
        response.timestamp = Some(timestamp);

        Ok(Checked {
            response,
            new_device: newly_bound,
        })
    }
}
