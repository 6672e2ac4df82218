//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AccessTokenResolver;
use crate::gateway::Gateway;

/// HTTP-facing gateway options.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Interval between SSE keep-alive comments on open streams.
    pub keep_alive: Duration,
    /// Browser origins accepted in addition to localhost.
    pub allowed_origins: Vec<String>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(15),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    gateway: Gateway,
    token_resolver: Arc<dyn AccessTokenResolver>,
    options: GatewayOptions,
}

impl AppState {
    pub fn new(
        gateway: Gateway,
        token_resolver: Arc<dyn AccessTokenResolver>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                gateway,
                token_resolver,
                options,
            }),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.inner.gateway
    }

    pub fn token_resolver(&self) -> &dyn AccessTokenResolver {
        self.inner.token_resolver.as_ref()
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.inner.options
    }
}
