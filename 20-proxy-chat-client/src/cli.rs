use clap::Parser;

use crate::config::{AuthType, DEFAULT_ADDRESS, DEFAULT_NAME, DEFAULT_PORT, SessionConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Chat with a remote peer, optionally through an HTTP proxy", long_about = None)]
pub struct Cli {
    /// Port of the peer to connect to.
    #[arg(short = 'p', long, default_value = DEFAULT_PORT)]
    pub port: String,

    /// Address of the peer to connect to.
    #[arg(short = 'a', long, default_value = DEFAULT_ADDRESS)]
    pub address: String,

    /// Display name announced to the peer.
    #[arg(short = 'n', long, default_value = DEFAULT_NAME)]
    pub name: String,

    /// Proxy address. A proxy is used only when its port is set too.
    #[arg(short = 'x', long = "proxyaddr")]
    pub proxy_address: Option<String>,

    /// Proxy port.
    #[arg(short = 'y', long = "proxyport")]
    pub proxy_port: Option<String>,

    /// Proxy authentication type.
    #[arg(short = 't', long = "auth", value_enum, default_value_t = AuthType::None)]
    pub auth: AuthType,

    /// Proxy authentication user name.
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Proxy authentication password.
    #[arg(short = 'w', long)]
    pub password: Option<String>,
}

impl Cli {
    pub fn into_config(self) -> SessionConfig {
        SessionConfig {
            address: self.address,
            port: self.port,
            display_name: self.name,
            proxy_address: self.proxy_address.unwrap_or_default(),
            proxy_port: self.proxy_port.unwrap_or_default(),
            auth: self.auth,
            proxy_user: self.user.unwrap_or_default(),
            proxy_password: self.password.unwrap_or_default(),
        }
    }
}
