// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use lifecycle_common::{retry_transient, ConfigError, ProviderContext, ProviderError, RetryStrategy};
use regex::Regex;
use tracing::debug;

use crate::errors::TailError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub names: Vec<String>,
    pub next_token: Option<String>,
}

/// Paginated listing of source group names.
#[async_trait]
pub trait SourceLister: Send + Sync {
    async fn list(
        &self,
        context: &ProviderContext,
        token: Option<&str>,
    ) -> Result<ListPage, ProviderError>;
}

/// Compiles a source filter. An empty filter matches everything.
pub fn compile_filter(filter: &str) -> Result<Regex, ConfigError> {
    Regex::new(filter).map_err(|e| ConfigError::InvalidFilter {
        pattern: filter.to_string(),
        reason: e.to_string(),
    })
}

/// Lists every page and returns the names matching `filter` (unanchored), in
/// listing order.
///
/// The filter is validated before the first list call.
pub async fn discover_sources<L>(
    context: &ProviderContext,
    lister: &L,
    filter: &str,
    retry_strategy: &RetryStrategy,
) -> Result<Vec<String>, TailError>
where
    L: SourceLister + ?Sized,
{
    let filter = compile_filter(filter)?;
    let mut matched = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0;

    loop {
        let page = retry_transient(retry_strategy, "list sources", || {
            context.bounded("list sources", lister.list(context, token.as_deref()))
        })
        .await?;
        pages += 1;

        matched.extend(page.names.into_iter().filter(|name| filter.is_match(name)));

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    debug!(
        "Discovered {} source(s) matching '{}' over {pages} page(s)",
        matched.len(),
        filter.as_str()
    );
    Ok(matched)
}
