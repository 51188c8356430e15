use std::sync::Arc;

use serde_json::json;
use strata_client::{Client, MemoryTransport, Query};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(MemoryTransport::new());
    let records = (0..23)
        .map(|n| json!({ "name": format!("cat-{n:02}"), "index": n }))
        .collect();
    transport.seed("cats", records);

    let client = Client::new(transport);
    let mut cats = client
        .fetch_collection("cats", Query::new().with_limit(10))
        .await?;

    let mut page = 1;
    loop {
        println!("page {page} ({} entities)", cats.len());
        while let Some(entity) = cats.next_entity() {
            println!("  {} {}", entity.uuid(), entity.name().unwrap_or("<unnamed>"));
        }
        if !cats.has_next_page() {
            break;
        }
        cats.advance_page().await?;
        page += 1;
    }

    Ok(())
}
