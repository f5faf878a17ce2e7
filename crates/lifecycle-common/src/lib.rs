// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ambient building blocks shared by the retention and log tailing crates.
//!
//! - [`errors`]: provider and configuration error taxonomy
//! - [`retry`]: explicit retry strategies wrapping single fallible calls
//! - [`context`]: the provider context passed into every collaborator call
//! - [`logger`]: tracing formatter and subscriber setup

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod context;
pub mod errors;
pub mod logger;
pub mod retry;

pub use context::ProviderContext;
pub use errors::{ConfigError, ProviderError};
pub use retry::{retry_transient, RetryError, RetryStrategy};
