// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod cluster;
mod config;
mod ingest;
pub mod refresh;
pub mod report;
pub mod rollup;
mod scheduler;
mod scope;
mod timed;
mod tracker;

pub use config::{ConfigError, TrackerConfig};
pub use ingest::{RESERVED_USERS, RequestTracker};
pub use report::Report;
pub use scheduler::{ScheduleError, Scheduler};
pub use scope::{Layout, Scope};
pub use tracker::{Membership, PERSISTENCE_JOB, TickOutcome, TopologyEvent, Tracker};
