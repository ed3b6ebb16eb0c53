//! Request router
//! Picks the target for each inbound request and hands it to the engine

use crate::config::{MirrorConfig, TargetConfig};
use crate::engine::{MirrorEngine, MirrorRequest, Transport};
use crate::error::{ConfigError, RouteError};
use crate::response::{status_response, text_response, MirrorBody};
use crate::rewrite::{BodyRewriter, EXTERNAL_PATH};
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, StatusCode};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Liveness probe route
pub const CHECK_PATH: &str = "/check";

/// Rewrites with literal rules only
static EMPTY_TARGET: TargetConfig = TargetConfig {
    domain: String::new(),
    endpoint: None,
    secondary_domains: Vec::new(),
};

/// Which route a request took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Check,
    External,
    Internal,
}

impl Route {
    fn of(parts: &Parts) -> Self {
        let path = parts.uri.path();
        if path == CHECK_PATH && (parts.method == Method::GET || parts.method == Method::HEAD) {
            Route::Check
        } else if path == EXTERNAL_PATH {
            Route::External
        } else {
            Route::Internal
        }
    }
}

/// Entry point for every inbound request
pub struct RequestRouter {
    config: Arc<MirrorConfig>,
    engine: MirrorEngine,
}

impl RequestRouter {
    pub fn new(config: Arc<MirrorConfig>, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let targets = config.store.targets().into_iter().chain([&EMPTY_TARGET]);
        let rewriter = BodyRewriter::new(&config.replace_rules, targets)?;
        let engine = MirrorEngine::new(transport, rewriter, config.marker_header.clone());

        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Handle one inbound request
    pub async fn handle<B>(&self, req: Request<B>) -> Response<MirrorBody>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let route = Route::of(&parts);

        debug!("{} {} -> {:?}", parts.method, parts.uri, route);

        let target = match route {
            Route::Check => return text_response(StatusCode::OK, "Ok"),
            Route::External => self.external_target(),
            Route::Internal => match self.config.store.resolve(&parts.headers, &parts.uri) {
                Ok(target) => target,
                Err(e) => return Self::route_error(e),
            },
        };

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                error!("Failed to read request body: {}", e);
                return status_response(StatusCode::BAD_REQUEST);
            }
        };

        let request = MirrorRequest::from_parts(&parts, body);

        let url = match route {
            Route::External => match request.external_url.clone() {
                Some(url) => url,
                None => return Self::route_error(RouteError::MissingExternalUrl),
            },
            _ => target.url_for(&request.path),
        };

        self.engine.mirror(&url, &request, target).await
    }

    /// Target used to rewrite bodies fetched through the external path.
    /// In multi-tenant mode this is always the configured external tenant,
    /// whichever tenant's page linked to it.
    fn external_target(&self) -> &TargetConfig {
        self.config.store.external_target().unwrap_or(&EMPTY_TARGET)
    }

    fn route_error(e: RouteError) -> Response<MirrorBody> {
        match &e {
            RouteError::UnknownHost(host) => info!("Config for host {} not found", host),
            _ => debug!("Rejecting request: {}", e),
        }
        text_response(e.status(), &e.to_string())
    }
}
