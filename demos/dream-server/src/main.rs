//! Runnable Dreamlink demo: all three services over an in-memory store.
//!
//! Binds the match service on 29900 and the HTTP services on 8880, with
//! a couple of seeded content files so the list endpoint has something to
//! say. Point `RUST_LOG` at the usual env-filter syntax to tune logging.

use dreamlink::{ContentFile, DreamlinkServer, ServerConfig};
use dreamlink_session::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig {
        content_files: vec![
            ContentFile {
                name: "musical.bin".to_string(),
                file_type: "musical".to_string(),
                index: 1,
                bytes: vec![0u8; 64],
            },
            ContentFile {
                name: "cgear_summer.bin".to_string(),
                file_type: "cgear".to_string(),
                index: 2,
                bytes: vec![0u8; 64],
            },
        ],
        ..Default::default()
    };

    let server = DreamlinkServer::<MemoryStore>::builder()
        .bind_match("0.0.0.0:29900")
        .bind_http(([0, 0, 0, 0], 8880).into())
        .server_config(config)
        .build(MemoryStore::new())
        .await?;

    tracing::info!(
        match_addr = %server.match_addr()?,
        http_addr = %server.http_addr(),
        "dreamlink demo up"
    );
    server.run().await?;
    Ok(())
}
