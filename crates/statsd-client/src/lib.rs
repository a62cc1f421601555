// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget StatsD client with batched UDP delivery.
//!
//! Metrics are formatted as StatsD text lines (`key:value|c`, `key:value|ms`,
//! `key:value|g`, `key:value|s`) and handed to a background sender task over a
//! channel. The sender buffers lines and flushes them as a single
//! newline-joined datagram once the configured batch size is reached or the
//! send interval elapses, whichever comes first. Emission never blocks the
//! caller and failures never surface past an error log.

pub mod client;
pub mod sender;

pub use client::{MetricsClient, MetricsError, NoopMetricsClient, StatsdClient};
pub use sender::{SenderCommand, SenderHandle, SenderService};
