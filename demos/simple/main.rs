use std::collections::HashMap;

use jentis::{AppLifecycle, ClientConfig, ConsentStatus, Environment, FileStorage, TrackConfig};
use serde_json::json;

#[tokio::main]
async fn main() -> jentis::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("jentis=debug"))
        .init();

    let track_domain = std::env::var("JENTIS_TRACK_DOMAIN")
        .unwrap_or_else(|_| "qc3ipx.ckion-dev.jtm-demo.com".to_owned());
    let container = std::env::var("JENTIS_CONTAINER").unwrap_or_else(|_| "ckion-demo".to_owned());

    let client = ClientConfig::new()
        .track_config(TrackConfig::new(track_domain, container, Environment::Stage))
        .storage(FileStorage::open(std::env::temp_dir().join("jentis-demo.json"))?)
        .app_info("jentis-demo", env!("CARGO_PKG_VERSION"))
        .to_client()?;

    client
        .set_consents(HashMap::from([
            ("googleanalytics".to_owned(), ConsentStatus::Allow),
            ("facebook".to_owned(), ConsentStatus::Ncm),
        ]))
        .await?;

    client.push_json(json!({
        "track": "pageview",
        "pagetitle": "Demo-APP Pageview",
        "url": "https://www.demoapp.com",
    }))?;
    client.push_json(json!({
        "track": "product",
        "type": "productview",
        "product_id": "111",
        "name": "Testproduct",
        "price": "9.99",
    }))?;
    client.add_enrichment(
        "enrichment_xxxlprodfeed",
        HashMap::from([("productId".to_owned(), json!(["111"]))]),
        vec!["enrich_product_price".to_owned()],
    )?;

    // Failed submissions keep the events queued for the next attempt.
    if let Err(err) = client.submit().await {
        log::error!("submission failed, {} events kept: {err}", client.queue_len()?);
    }

    client.on_terminate();
    Ok(())
}
