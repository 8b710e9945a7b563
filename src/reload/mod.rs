// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hot reload of the encryption configuration.
//!
//! Two pieces cooperate here. The [`DynamicTransformers`] holder publishes
//! one transformer generation at a time through an atomic swap, so storage
//! readers pick up a reload without locking and a superseded generation's
//! KMS connections stay open until its grace period runs out. The
//! [`EncryptionConfigController`] owns the file-watching loop: a periodic
//! tick enqueues a sentinel, a single worker re-reads the file, detects
//! change by content hash, health-gates the new transformers and commits
//! them through the holder, retrying failures with capped exponential
//! backoff.

mod controller;
mod holder;

pub use controller::{EncryptionConfigController, ReloadError, DEFAULT_POLL_PERIOD};
pub use holder::{CloseFn, DynamicTransformers};
