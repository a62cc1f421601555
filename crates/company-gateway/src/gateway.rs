// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The request-processing pipeline.
//!
//! Each `/company` request flows through validation, cache lookup, SLA
//! admission, country routing, the circuit-breaker check, and finally the
//! upstream call whose result is normalized, cached, and emitted. Every
//! terminal state produces at most one response; when configured to shed
//! load the pipeline may instead drop the request entirely (`None`), in
//! which case the inbound connection keeps serving.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use tracing::{debug, error, warn};

use statsd_client::MetricsClient;

use crate::cache::Cache;
use crate::circuit_breaker::CircuitBreaker;
use crate::company::{self, TimestampError};
use crate::config::{metric, AppConfig};
use crate::http_utils::{
    log_and_json_response, HttpResponse, ERROR_BAD_GATEWAY, ERROR_GATEWAY_TIMEOUT, ERROR_INTERNAL,
    ERROR_MISSING_PARAMETERS, ERROR_NOT_FOUND, ERROR_UNCONFIGURED_COUNTRY,
};
use crate::upstream::UpstreamClient;

/// Successful normalizations are cached for one day regardless of the cache
/// backend's own default TTL.
const RESPONSE_CACHE_TTL: Duration = Duration::from_secs(3600 * 24);

#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    #[error("Failed to serialize normalized company: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct CompanyGateway {
    config: Arc<AppConfig>,
    cache: Arc<dyn Cache>,
    metrics: Arc<dyn MetricsClient>,
    circuit_breaker: CircuitBreaker,
    upstream: UpstreamClient,
}

impl CompanyGateway {
    pub fn new(
        config: Arc<AppConfig>,
        cache: Arc<dyn Cache>,
        metrics: Arc<dyn MetricsClient>,
        upstream: UpstreamClient,
    ) -> Self {
        let circuit_breaker = CircuitBreaker::new(metrics.clone());
        Self {
            config,
            cache,
            metrics,
            circuit_breaker,
            upstream,
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn handle_status(&self) -> HttpResponse {
        HttpResponse::text(StatusCode::OK, "Frontend Server is running")
    }

    /// Entry point for `/company`. Internal faults are converted to a 500
    /// here so the session never sees an error.
    pub async fn handle_company(
        &self,
        query: Option<&str>,
        received_at: Instant,
    ) -> Option<HttpResponse> {
        match self.process_company(query, received_at).await {
            Ok(response) => response,
            Err(e) => {
                error!("Unexpected error in company request pipeline: {e}");
                self.metrics.incr(metric::CODE_EXCEPTION);
                Some(HttpResponse::json(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ERROR_INTERNAL,
                ))
            }
        }
    }

    async fn process_company(
        &self,
        query: Option<&str>,
        received_at: Instant,
    ) -> Result<Option<HttpResponse>, PipelineError> {
        let Some((company_id, country_iso)) = parse_company_query(query) else {
            return Ok(Some(log_and_json_response(
                "Rejecting request with missing required parameters",
                StatusCode::BAD_REQUEST,
                ERROR_MISSING_PARAMETERS,
            )));
        };

        let cache_key = format!("{company_id}:{country_iso}");
        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!("Found cache for key: {cache_key}");
            return Ok(Some(HttpResponse::json(StatusCode::OK, cached)));
        }

        // SLA admission: a request that has already burned its budget will
        // not complete in time, so shed it before touching the upstream.
        let elapsed = received_at.elapsed();
        let budget = self
            .config
            .server_sla
            .saturating_sub(self.config.average_processing_time);
        if elapsed > budget {
            debug!("SLA missed for request after {elapsed:?}");
            self.metrics.incr(metric::REQUEST_TIMED_OUT);
            if self.config.drop_sla_timeout_requests {
                return Ok(None);
            }
            return Ok(Some(HttpResponse::json(
                StatusCode::GATEWAY_TIMEOUT,
                ERROR_GATEWAY_TIMEOUT,
            )));
        }

        let Some(target) = self.config.country_backend_map.get(&country_iso) else {
            return Ok(Some(log_and_json_response(
                &format!("Unconfigured country: {country_iso}"),
                StatusCode::NOT_FOUND,
                ERROR_UNCONFIGURED_COUNTRY,
            )));
        };

        if self.circuit_breaker.is_tripped(&target.url).await {
            return Ok(Some(HttpResponse::json(
                StatusCode::GATEWAY_TIMEOUT,
                ERROR_GATEWAY_TIMEOUT,
            )));
        }

        let deadline = self.config.connect_timeout
            + self.config.read_timeout
            + self.config.upstream_deadline_safety_margin;

        match self.upstream.call(target, &company_id, deadline).await {
            Ok(response) if response.status == StatusCode::OK => {
                let record = company::parse_company(
                    &company_id,
                    response.content_type.as_deref(),
                    &response.body,
                );
                if !record.parse_ok {
                    self.metrics.incr(metric::JSON_ERROR);
                    return Ok(Some(log_and_json_response(
                        &format!(
                            "Upstream returned 200 but response parsing failed for companyId: {company_id}"
                        ),
                        StatusCode::BAD_GATEWAY,
                        ERROR_BAD_GATEWAY,
                    )));
                }

                let normalized = company::normalize(&record)?;
                let body = company::to_pretty_json(&normalized)?;

                // Cache before the response write begins; a best-effort
                // failure here never surfaces to the client.
                self.cache
                    .set(&cache_key, &body, RESPONSE_CACHE_TTL)
                    .await;
                debug!("Setting cache for key: {cache_key}");

                Ok(Some(HttpResponse::json(StatusCode::OK, body)))
            }
            Ok(response) if response.status == StatusCode::NOT_FOUND => {
                debug!("Upstream has no company {company_id}. Returning 404");
                Ok(Some(HttpResponse::json(
                    StatusCode::NOT_FOUND,
                    ERROR_NOT_FOUND,
                )))
            }
            Ok(response) if response.status.is_server_error() => {
                error!(
                    "Upstream returned {} for {}. Tripping circuit breaker for {}ms",
                    response.status,
                    target.url,
                    self.config.breaker_cooldown.as_millis()
                );
                self.circuit_breaker
                    .trip(&target.url, self.config.breaker_cooldown)
                    .await;
                Ok(Some(HttpResponse::json(
                    StatusCode::BAD_GATEWAY,
                    ERROR_BAD_GATEWAY,
                )))
            }
            Ok(response) => Ok(Some(log_and_json_response(
                &format!(
                    "Upstream returned unexpected status {} for companyId: {company_id}",
                    response.status
                ),
                StatusCode::BAD_GATEWAY,
                ERROR_BAD_GATEWAY,
            ))),
            Err(e) => {
                warn!("Error calling upstream for companyId {company_id}: {e}");
                if e.is_connection_error() {
                    self.circuit_breaker
                        .trip(&target.url, self.config.breaker_cooldown)
                        .await;
                }
                Ok(Some(HttpResponse::json(
                    StatusCode::GATEWAY_TIMEOUT,
                    ERROR_GATEWAY_TIMEOUT,
                )))
            }
        }
    }
}

/// Extracts and percent-decodes `id` and `country_iso` from the query
/// string. `country_iso` is uppercased; either parameter missing or empty
/// fails validation.
fn parse_company_query(query: Option<&str>) -> Option<(String, String)> {
    let query = query?;
    let mut id = None;
    let mut country_iso = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "id" => id = Some(value.into_owned()),
            "country_iso" => country_iso = Some(value.into_owned()),
            _ => {}
        }
    }
    let id = id.filter(|value| !value.is_empty())?;
    let country_iso = country_iso
        .filter(|value| !value.is_empty())?
        .to_uppercase();
    Some((id, country_iso))
}
