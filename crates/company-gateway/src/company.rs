// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Company payload parsing and normalization.
//!
//! Upstream backends answer in one of two content-type-tagged JSON schemas;
//! both are mapped onto an intermediate [`CompanyRecord`] and then normalized
//! to the stable egress shape `{id, name, active, active_until?}`.

use chrono::{NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

pub const CONTENT_TYPE_COMPANY_V1: &str = "application/x-company-v1";
pub const CONTENT_TYPE_COMPANY_V2: &str = "application/x-company-v2";

/// `YYYY-MM-DDTHH:MM:SS[.frac]Z`, fractional seconds optional, trailing `Z`
/// mandatory.
const UTC_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

#[derive(Debug, thiserror::Error)]
#[error("Failed to parse UTC timestamp {value:?}: {source}")]
pub struct TimestampError {
    value: String,
    #[source]
    source: chrono::ParseError,
}

/// Intermediate, request-scoped view of an upstream company payload.
#[derive(Debug, Clone, Default)]
pub struct CompanyRecord {
    pub id: String,
    pub name: String,
    pub schema_version: u8,
    pub created_on: Option<String>,
    pub closed_on: Option<String>,
    pub tin: Option<String>,
    pub dissolved_on: Option<String>,
    pub parse_ok: bool,
}

/// Stable egress schema served to inbound clients regardless of the upstream
/// variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCompany {
    pub id: String,
    pub name: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_until: Option<String>,
}

#[derive(Deserialize)]
struct CompanyV1Body {
    cn: Option<String>,
    created_on: Option<String>,
    closed_on: Option<String>,
}

#[derive(Deserialize)]
struct CompanyV2Body {
    company_name: Option<String>,
    tin: Option<String>,
    dissolved_on: Option<String>,
}

/// Maps an upstream response body onto a [`CompanyRecord`] based on its
/// content type. Unknown content types and malformed JSON leave
/// `parse_ok = false`.
pub fn parse_company(id: &str, content_type: Option<&str>, body: &[u8]) -> CompanyRecord {
    let mut record = CompanyRecord {
        id: id.to_string(),
        ..CompanyRecord::default()
    };

    match content_type {
        Some(CONTENT_TYPE_COMPANY_V1) => match serde_json::from_slice::<CompanyV1Body>(body) {
            Ok(parsed) => {
                record.schema_version = 1;
                record.name = parsed.cn.unwrap_or_default();
                record.created_on = parsed.created_on;
                record.closed_on = parsed.closed_on;
                record.parse_ok = true;
            }
            Err(e) => error!("Upstream v1 response JSON parse error: {e}"),
        },
        Some(CONTENT_TYPE_COMPANY_V2) => match serde_json::from_slice::<CompanyV2Body>(body) {
            Ok(parsed) => {
                record.schema_version = 2;
                record.name = parsed.company_name.unwrap_or_default();
                record.tin = parsed.tin;
                record.dissolved_on = parsed.dissolved_on;
                record.parse_ok = true;
            }
            Err(e) => error!("Upstream v2 response JSON parse error: {e}"),
        },
        other => error!("Unrecognized upstream content type: {other:?}"),
    }

    record
}

/// Compares an RFC 3339 UTC timestamp against wall-clock now.
///
/// Fractional seconds are accepted but ignored; the comparison happens at
/// second resolution. Timestamps far in the past simply compare as "not in
/// the future" rather than erroring.
pub fn is_utc_time_in_future(value: &str) -> Result<bool, TimestampError> {
    let parsed =
        NaiveDateTime::parse_from_str(value, UTC_TIME_FORMAT).map_err(|source| TimestampError {
            value: value.to_string(),
            source,
        })?;
    let parsed = parsed.with_nanosecond(0).unwrap_or(parsed);
    Ok(parsed > Utc::now().naive_utc())
}

/// Computes the egress view of a parsed company record.
///
/// A timestamp that fails to parse is an upstream data fault that surfaces as
/// an internal error at the pipeline boundary.
pub fn normalize(record: &CompanyRecord) -> Result<NormalizedCompany, TimestampError> {
    let mut normalized = NormalizedCompany {
        id: record.id.clone(),
        name: record.name.clone(),
        active: true,
        active_until: None,
    };

    match record.schema_version {
        1 => {
            if let Some(created_on) = record.created_on.as_deref() {
                // Questionable upstream semantics, preserved as-is: a company
                // created in the future is reported inactive.
                if !created_on.is_empty() && is_utc_time_in_future(created_on)? {
                    normalized.active = false;
                }
            }
            if let Some(closed_on) = record.closed_on.as_deref() {
                if !closed_on.is_empty() {
                    normalized.active_until = Some(closed_on.to_string());
                    if !is_utc_time_in_future(closed_on)? {
                        normalized.active = false;
                    }
                }
            }
        }
        _ => {
            if let Some(dissolved_on) = record.dissolved_on.as_deref() {
                if !dissolved_on.is_empty() {
                    normalized.active_until = Some(dissolved_on.to_string());
                    if !is_utc_time_in_future(dissolved_on)? {
                        normalized.active = false;
                    }
                }
            }
        }
    }

    Ok(normalized)
}

/// Serializes with four-space indentation, the gateway's egress JSON style.
pub fn to_pretty_json(company: &NormalizedCompany) -> Result<String, serde_json::Error> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    company.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
