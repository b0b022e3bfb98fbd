// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local metrics relay.
//!
//! Samples arrive as plaintext `name value timestamp` lines over TCP or through a spool
//! directory. They are validated, optionally aggregated per time window and copied to every
//! configured backend. Each backend has its own bounded queue, persistent connection and
//! on-disk retry file, so a dead backend never stalls ingestion or the other backends.
//! The relay reports its own counters through the same pipeline.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod aggregator_service;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod errors;
pub mod flusher;
pub mod listener;
pub mod metric;
pub mod monitoring;
pub mod queue;
pub mod relay;
pub mod retry;
pub mod router;
pub mod spool;
pub mod stats;
pub mod util;
