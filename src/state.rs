//! Shared application state handed to every handler and middleware.

use crate::{
    config::Config,
    services::{
        activation_service::ActivationService, api_key_service::ApiKeyService,
        audit_service::AuditRecorder, statistics_service::StatisticsAggregator,
        verifier::ActivationVerifier,
    },
    store::Storage,
};
use std::sync::Arc;

/// Services built once at startup over a single storage backend.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub verifier: Arc<ActivationVerifier>,
    pub activation: Arc<ActivationService>,
    pub api_keys: Arc<ApiKeyService>,
    pub audit: AuditRecorder,
    pub statistics: StatisticsAggregator,
}

impl AppState {
    pub fn new<S: Storage>(store: Arc<S>, config: &Config) -> Self {
        let statistics = StatisticsAggregator::new(store.clone());

        Self {
            verifier: Arc::new(ActivationVerifier::new(
                store.clone(),
                statistics.clone(),
                config.signature_secret.as_bytes(),
                config.timestamp_tolerance_secs,
            )),
            activation: Arc::new(ActivationService::new(store.clone(), statistics.clone())),
            api_keys: Arc::new(ApiKeyService::new(store.clone())),
            audit: AuditRecorder::new(store.clone()),
            statistics,
            storage: store,
        }
    }
}
