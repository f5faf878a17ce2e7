// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Uploads local log lines into a remote log stream.
//!
//! Lines are queued through a [`ShipperHandle`] and cut into batches of at most
//! 10,000 events and 1 MiB by the [`ShipperService`], which flushes them every
//! couple of seconds and once more when it stops.

pub mod batcher;
pub mod service;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lifecycle_common::{ProviderContext, ProviderError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::ShipperConfig;
use crate::errors::TailError;
use crate::follow::follow_file;

pub use batcher::LineBatcher;
pub use service::{ShipperCommand, ShipperHandle, ShipperService, ShipperStats};

/// Per-event overhead the provider adds to the message size.
pub const EVENT_OVERHEAD_BYTES: usize = 26;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippedEvent {
    /// Epoch milliseconds, taken when the batch was cut
    pub timestamp: i64,
    pub message: String,
}

/// Remote log stream accepting batches of events.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Appends `events` to `group`/`stream` and returns the token the next
    /// call must pass, if the provider hands one out.
    async fn put_events(
        &self,
        context: &ProviderContext,
        group: &str,
        stream: &str,
        events: &[ShippedEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ProviderError>;
}

/// Follows `path` and ships every line to `group`/`stream` until `cancel`
/// fires. Lines still queued at that point get one final flush.
#[allow(clippy::too_many_arguments)]
pub async fn ship_file<S>(
    path: &Path,
    poll: Duration,
    sink: Arc<S>,
    context: ProviderContext,
    group: &str,
    stream: &str,
    config: ShipperConfig,
    cancel: CancellationToken,
) -> Result<ShipperStats, TailError>
where
    S: LogSink + 'static,
{
    config.validate()?;
    let (service, handle) = ShipperService::new(sink, context, group, stream, config);
    let service_task = tokio::spawn(service.run(cancel.clone()));

    let followed = follow_file(path, poll, &cancel, |line| {
        if let Err(e) = handle.send_line(line) {
            warn!("Log shipper is gone, dropping line: {e}");
        }
    })
    .await;
    drop(handle);

    let stats = service_task.await?;
    followed?;
    Ok(stats)
}
