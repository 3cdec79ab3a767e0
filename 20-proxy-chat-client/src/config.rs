//! Connection parameters resolved before a session starts.

use std::fmt;

use clap::ValueEnum;

use crate::transport::{Endpoint, ProxyRoute, Route};

pub const DEFAULT_PORT: &str = "30303";
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_NAME: &str = "Unnamed";

/// Authentication scheme used while establishing a proxied connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Digest,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthType::None => "none",
            AuthType::Basic => "basic",
            AuthType::Digest => "digest",
        };
        f.write_str(name)
    }
}

/// Immutable description of who to talk to and how to get there.
///
/// The display name stored here is only the starting value; the live name
/// belongs to [`crate::session::Session`].
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub address: String,
    pub port: String,
    pub display_name: String,
    pub proxy_address: String,
    pub proxy_port: String,
    pub auth: AuthType,
    pub proxy_user: String,
    pub proxy_password: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT.to_string(),
            display_name: DEFAULT_NAME.to_string(),
            proxy_address: String::new(),
            proxy_port: String::new(),
            auth: AuthType::None,
            proxy_user: String::new(),
            proxy_password: String::new(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("display_name", &self.display_name)
            .field("proxy_address", &self.proxy_address)
            .field("proxy_port", &self.proxy_port)
            .field("auth", &self.auth)
            .field("proxy_user", &self.proxy_user)
            .field("proxy_password", &redact(&self.proxy_password))
            .finish()
    }
}

/// Masks a secret for display, keeping only whether it was set.
pub(crate) fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "***" }
}

impl SessionConfig {
    /// A proxy is used only when both its address and port were given.
    pub fn uses_proxy(&self) -> bool {
        !self.proxy_address.is_empty() && !self.proxy_port.is_empty()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.address, &self.port)
    }

    /// Picks the route the controller should take for this configuration.
    pub fn route(&self) -> Route {
        if self.uses_proxy() {
            Route::Proxy(self.proxy_route(self.auth, &self.proxy_address, &self.proxy_port))
        } else {
            Route::Direct
        }
    }

    /// Builds a proxied route carrying this config's credentials.
    pub fn proxy_route(&self, auth: AuthType, proxy_address: &str, proxy_port: &str) -> ProxyRoute {
        ProxyRoute {
            auth,
            proxy: Endpoint::new(proxy_address, proxy_port),
            user: self.proxy_user.clone(),
            password: self.proxy_password.clone(),
        }
    }
}
