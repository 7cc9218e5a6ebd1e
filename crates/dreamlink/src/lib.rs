//! # Dreamlink
//!
//! Emulated back-end for a discontinued console "Dream World" service,
//! faithful enough that unmodified game clients authenticate, hand their
//! session between endpoints, and exchange dream content byte-for-byte
//! the way the original servers did.
//!
//! Three services share one process and one set of registries:
//!
//! - the **login service** (HTTP, obfuscated UrlForm) issues session
//!   tokens and performs registration and service location;
//! - the **match service** (binary TCP, escaped frames) redeems a token
//!   via challenge-response and serves profile operations;
//! - the **content service** (HTTP, binary bodies) redeems a token to
//!   upload a save fragment or download the staged dream payload.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dreamlink::DreamlinkServer;
//! use dreamlink_session::MemoryStore;
//!
//! # async fn run() -> Result<(), dreamlink::DreamlinkError> {
//! let server = DreamlinkServer::<MemoryStore>::builder()
//!     .bind_match("127.0.0.1:29900")
//!     .bind_http(([127, 0, 0, 1], 8880).into())
//!     .build(MemoryStore::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod auth;
mod content;
mod error;
mod files;
mod handler;
mod server;

pub use error::DreamlinkError;
pub use server::{
    ContentFile, DreamlinkServer, DreamlinkServerBuilder, ServerConfig,
};
