//! MiniMirror - A reverse-mirroring HTTP proxy
//!
//! Serves a backend origin under the proxy's own domain:
//! - Single-tenant or host-based multi-tenant target selection
//! - Header allow-list for outbound requests
//! - Bounded retry on transport errors and 5xx responses
//! - Body rewriting: literal replacements, primary domain to relative
//!   links, secondary domains through the `/_EXTERNAL_` route
//! - Liveness endpoint and graceful shutdown

pub mod config;
pub mod engine;
pub mod error;
pub mod headers;
pub mod response;
pub mod rewrite;
pub mod router;
pub mod server;

pub use config::{ConfigStore, MirrorConfig, ReplaceRule, Settings, TargetConfig};
pub use engine::{HttpTransport, MirrorEngine, MirrorRequest, Transport, MAX_ATTEMPTS};
pub use error::{ConfigError, MirrorError, RouteError};
pub use rewrite::{BodyRewriter, TargetRewrite};
pub use router::RequestRouter;
pub use server::MirrorServer;
