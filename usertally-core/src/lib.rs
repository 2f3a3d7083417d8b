// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod counters;
pub mod store;
mod tier;

pub use counters::CounterStore;
pub use tier::{Tier, UnknownTier};

/// Per-user counts keyed by user id.
pub type CountMap = hashbrown::HashMap<String, u64>;
