// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Country-routing company-lookup gateway.
//!
//! Serves a uniform `/company` API by dispatching each request to a
//! country-specific upstream, normalizing its schema-variant response to a
//! single stable shape, and answering within a strict per-request latency
//! budget. Results are cached (Redis when available, bounded in-memory LRU
//! otherwise), failing upstreams are short-circuited per URL, and requests
//! that have already blown their SLA budget are shed before the upstream is
//! ever contacted.

pub mod backend;
pub mod cache;
pub mod circuit_breaker;
pub mod company;
pub mod config;
pub mod gateway;
pub mod http_utils;
pub mod server;
pub mod session;
pub mod upstream;
