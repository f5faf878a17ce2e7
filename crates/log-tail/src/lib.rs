// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tails many remote log sources at once and merges them into one stream.
//!
//! A [`TailController`] discovers the source groups matching a filter, hands one
//! [`WorkItem`] per source to a pool of fetch workers and writes whatever lands
//! in the [`MergeQueue`] in `(timestamp, sequence)` order. Fetch calls share a
//! refillable [`RateLimiter`]. In sorted mode nothing is written until every
//! source's initial backlog has been fetched.
//!
//! The crate also ships local files into a remote stream ([`shipper`]).

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod controller;
pub mod discovery;
pub mod errors;
pub mod follow;
pub mod merge_queue;
pub mod rate_limiter;
pub mod render;
pub mod shipper;
pub mod time_expr;
pub mod work;
pub mod worker;

pub use config::{ShipperConfig, TailConfig, TailRequest};
pub use controller::{TailController, TailSummary};
pub use discovery::{discover_sources, ListPage, SourceLister};
pub use errors::TailError;
pub use follow::follow_file;
pub use merge_queue::{MergeQueue, OutputRecord};
pub use rate_limiter::RateLimiter;
pub use render::{hashed_word, EventRenderer, OutputFormat};
pub use shipper::{ship_file, LogSink, ShippedEvent, ShipperHandle, ShipperService};
pub use time_expr::parse_time_expression;
pub use work::{BacklogSignal, FetchQuery, WorkItem, WorkQueue};
pub use worker::{FetchPage, FetchedEvent, LogFetcher, SourceFailure, WorkerState};
