//! Counts proposed street names per municipality with the in-memory backend.
//!
//! Run with `cargo run --example hello-world --features in-memory`.

use async_trait::async_trait;
use projector::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
struct StreetNameWasProposed {
    municipality: String,
    name: String,
}

#[derive(Default, ProjectionName)]
struct StreetCountProjection {
    counts: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl Projection for StreetCountProjection {
    async fn apply(
        &self,
        _context: &mut dyn ProjectionContext,
        event: &StreamEvent,
    ) -> Result<(), BoxError> {
        if event.event_type != "StreetNameWasProposed" {
            return Ok(());
        }
        let proposed: StreetNameWasProposed = event.data_as()?;
        log::info!("{} proposed in {}", proposed.name, proposed.municipality);
        *self
            .counts
            .lock()
            .await
            .entry(proposed.municipality)
            .or_default() += 1;
        Ok(())
    }
}

fn proposed(municipality: &str, name: &str) -> NewStreamEvent {
    NewStreamEvent::new(
        format!("municipality-{municipality}"),
        "StreetNameWasProposed",
        serde_json::json!({ "municipality": municipality, "name": name }),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let log = InMemoryEventLog::new();
    log.append_all([proposed("ghent", "Veldstraat"), proposed("ghent", "Korenmarkt")])
        .await?;

    let positions = Arc::new(InMemoryPositionStore::new());
    let projection = Arc::new(StreetCountProjection::default());
    let manager = ProjectionManager::builder(Arc::new(log.clone()))
        .register(ProjectionRegistration::named(projection.clone(), positions.clone()))
        .build()?;

    manager.start_all();
    manager
        .watch()
        .wait_for(|snapshot| snapshot.all_in(ProjectionState::Live))
        .await?;

    log.append(proposed("antwerp", "Meir")).await?;
    while positions.position("street-count").await != Some(2) {
        tokio::task::yield_now().await;
    }

    println!("{:?}", projection.counts.lock().await);
    manager.shutdown().await?;
    Ok(())
}
