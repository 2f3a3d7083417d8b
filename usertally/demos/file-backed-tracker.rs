// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Runs a single-instance tracker against a JSON-backed window tree, feeding it
//! synthetic traffic and printing the report every few seconds.
//!
//! ```text
//! RUST_LOG=usertally=debug cargo run --example file-backed-tracker -- /tmp/windows.json
//! ```

use std::time::Duration;

use usertally::{Membership, Scheduler, TopologyEvent, Tracker, TrackerConfig};
use usertally_core::store::LocalWindowStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let tree_file = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "windows.json".to_owned());
    let store = LocalWindowStore::file_backed(&tree_file)?;
    let tracker = Tracker::new(store, TrackerConfig::default())?;
    tracker.handle_topology_event(TopologyEvent::Init(Membership {
        instance_id: "demo".into(),
        is_leader: true,
    }));

    let scheduler = Scheduler::new();
    tracker.start(&scheduler)?;

    let requests = tracker.request_tracker();
    let users = ["alice", "bob", "carol", "system", "anonymous"];
    let mut report_every = tokio::time::interval(Duration::from_secs(10));
    for i in 0..18usize {
        for (n, user) in users.iter().enumerate() {
            for _ in 0..=(i + n) % 4 {
                requests.track(Some(user));
            }
        }
        report_every.tick().await;
        println!("{}", serde_json::to_string_pretty(&tracker.report().await)?);
    }

    tracker.stop(&scheduler).await;
    scheduler.shutdown().await;
    Ok(())
}
