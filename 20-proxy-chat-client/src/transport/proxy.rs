//! HTTP `CONNECT` tunnelling with Basic or Digest proxy authentication.
//!
//! Basic credentials are sent with the first request. Digest needs the
//! proxy's challenge first, so the initial request goes out bare; a `407`
//! carrying a `Proxy-Authenticate: Digest ...` header is answered on a fresh
//! connection, since proxies commonly close after refusing.

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, info};

use super::{Endpoint, ProxyRoute, TransportError, tcp::connect_tcp};
use crate::config::AuthType;

/// Upper bound on the size of a proxy response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

const STATUS_PROXY_AUTH_REQUIRED: u16 = 407;

/// Opens a TCP connection to the proxy and asks it to tunnel to `target`.
/// On success the returned stream talks to `target`.
pub async fn open_tunnel(target: &Endpoint, route: &ProxyRoute) -> Result<TcpStream, TransportError> {
    target.port_number()?;
    let authority = target.authority();

    let preemptive = match route.auth {
        AuthType::Basic => Some(basic_authorization(&route.user, &route.password)),
        AuthType::None | AuthType::Digest => None,
    };

    let mut stream = connect_tcp(&route.proxy).await?;
    let response = request_tunnel(&mut stream, &authority, preemptive.as_deref()).await?;
    if response.is_success() {
        info!(proxy = %route.proxy, target = %authority, "proxy tunnel established");
        return Ok(stream);
    }

    if response.status != STATUS_PROXY_AUTH_REQUIRED || route.auth != AuthType::Digest {
        return Err(response.into_error());
    }

    let challenge = response
        .header_values("proxy-authenticate")
        .find_map(DigestChallenge::parse)
        .ok_or_else(|| {
            TransportError::MalformedProxyResponse("407 without a Digest challenge".into())
        })?;
    debug!(realm = %challenge.realm, "answering digest challenge");

    let authorization = challenge.authorization(
        &route.user,
        &route.password,
        "CONNECT",
        &authority,
        &new_cnonce(),
    );
    drop(stream);

    let mut stream = connect_tcp(&route.proxy).await?;
    let response = request_tunnel(&mut stream, &authority, Some(&authorization)).await?;
    if response.is_success() {
        info!(proxy = %route.proxy, target = %authority, "proxy tunnel established");
        Ok(stream)
    } else {
        Err(response.into_error())
    }
}

async fn request_tunnel<S>(
    stream: &mut S,
    authority: &str,
    authorization: Option<&str>,
) -> Result<ProxyResponse, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(credentials) = authorization {
        request.push_str("Proxy-Authorization: ");
        request.push_str(credentials);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let head = read_response_head(stream).await?;
    ProxyResponse::parse(&head)
}

/// Reads up to and including the blank line ending the response head. Reads
/// one byte at a time so nothing past the head is consumed from the tunnel.
async fn read_response_head<R>(reader: &mut R) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(TransportError::MalformedProxyResponse(
                "response head too large".into(),
            ));
        }
        if reader.read(&mut byte).await? == 0 {
            return Err(TransportError::MalformedProxyResponse(
                "proxy closed the connection mid-response".into(),
            ));
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

#[derive(Debug)]
struct ProxyResponse {
    status: u16,
    status_line: String,
    headers: Vec<(String, String)>,
}

impl ProxyResponse {
    fn parse(head: &str) -> Result<Self, TransportError> {
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default().to_string();

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(TransportError::MalformedProxyResponse(status_line));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| TransportError::MalformedProxyResponse(status_line.clone()))?;

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        Ok(Self {
            status,
            status_line,
            headers,
        })
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Values of every header called `name` (lowercase).
    fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn into_error(self) -> TransportError {
        if self.status == STATUS_PROXY_AUTH_REQUIRED {
            TransportError::ProxyAuthRequired
        } else {
            TransportError::ProxyRejected {
                status: self.status_line,
            }
        }
    }
}

pub fn basic_authorization(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

/// Parameters of a `Digest` challenge (RFC 2617).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    /// Whether the proxy offered `qop=auth`.
    pub qop_auth: bool,
}

impl DigestChallenge {
    /// Parses a `Proxy-Authenticate` value. Returns `None` for other schemes
    /// or when `realm` or `nonce` is missing.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim_start();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        let mut qop_auth = false;

        for (key, value) in auth_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                "qop" => {
                    qop_auth = value
                        .split(',')
                        .any(|option| option.trim().eq_ignore_ascii_case("auth"));
                }
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            opaque,
            algorithm,
            qop_auth,
        })
    }

    /// Builds the `Proxy-Authorization` value answering this challenge.
    pub fn authorization(
        &self,
        user: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> String {
        const NONCE_COUNT: &str = "00000001";

        let mut ha1 = md5_hex(&format!("{user}:{}:{password}", self.realm));
        let sess = self
            .algorithm
            .as_deref()
            .is_some_and(|algorithm| algorithm.eq_ignore_ascii_case("MD5-sess"));
        if sess {
            ha1 = md5_hex(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = md5_hex(&format!("{method}:{uri}"));

        let response = if self.qop_auth {
            md5_hex(&format!("{ha1}:{}:{NONCE_COUNT}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce))
        };

        let mut header = format!(
            "Digest username=\"{user}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", response=\"{response}\"",
            self.realm, self.nonce
        );
        if let Some(algorithm) = &self.algorithm {
            header.push_str(&format!(", algorithm={algorithm}"));
        }
        if self.qop_auth {
            header.push_str(&format!(", qop=auth, nc={NONCE_COUNT}, cnonce=\"{cnonce}\""));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        header
    }
}

/// Splits `key=value, key="quoted, value"` pairs.
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some((key, after_key)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_string();
        let after_key = after_key.trim_start();

        let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (quoted[..end].to_string(), &quoted[end + 1..]),
                None => (quoted.to_string(), ""),
            }
        } else {
            match after_key.find(',') {
                Some(end) => (after_key[..end].trim().to_string(), &after_key[end..]),
                None => (after_key.trim().to_string(), ""),
            }
        };

        params.push((key, value));
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    params
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn new_cnonce() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_CHALLENGE: &str = "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
        nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"";

    #[test]
    fn basic_credentials_are_base64() {
        assert_eq!(basic_authorization("alice", "secret"), "Basic YWxpY2U6c2VjcmV0");
    }

    #[test]
    fn parses_digest_challenge() {
        let challenge = DigestChallenge::parse(RFC_CHALLENGE).expect("digest challenge");
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(
            challenge.opaque.as_deref(),
            Some("5ccc069c403ebaf9f0171e9517f40e41")
        );
        assert!(challenge.qop_auth);
        assert_eq!(challenge.algorithm, None);
    }

    #[test]
    fn ignores_other_schemes_and_incomplete_challenges() {
        assert_eq!(DigestChallenge::parse("Basic realm=\"proxy\""), None);
        assert_eq!(DigestChallenge::parse("Digest realm=\"proxy\""), None);
    }

    #[test]
    fn digest_response_matches_rfc_2617_example() {
        let challenge = DigestChallenge::parse(RFC_CHALLENGE).unwrap();
        let header = challenge.authorization(
            "Mufasa",
            "Circle Of Life",
            "GET",
            "/dir/index.html",
            "0a4f113b",
        );
        assert!(header.starts_with("Digest username=\"Mufasa\""));
        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
        assert!(header.contains("qop=auth, nc=00000001, cnonce=\"0a4f113b\""));
        assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn digest_without_qop_uses_legacy_response() {
        let challenge = DigestChallenge {
            realm: "r".into(),
            nonce: "n".into(),
            opaque: None,
            algorithm: None,
            qop_auth: false,
        };
        let header = challenge.authorization("u", "p", "CONNECT", "h:1", "c");
        let expected = md5_hex(&format!(
            "{}:n:{}",
            md5_hex("u:r:p"),
            md5_hex("CONNECT:h:1")
        ));
        assert!(header.contains(&format!("response=\"{expected}\"")));
        assert!(!header.contains("qop="));
    }

    #[test]
    fn parses_status_and_headers() {
        let response = ProxyResponse::parse(
            "HTTP/1.1 407 Proxy Authentication Required\r\n\
             Proxy-Authenticate: Basic realm=\"x\"\r\n\
             Proxy-Authenticate: Digest realm=\"x\", nonce=\"y\"\r\n\r\n",
        )
        .unwrap();
        assert_eq!(response.status, 407);
        assert!(!response.is_success());
        assert_eq!(response.header_values("proxy-authenticate").count(), 2);
        assert!(
            response
                .header_values("proxy-authenticate")
                .find_map(DigestChallenge::parse)
                .is_some()
        );
        assert!(matches!(response.into_error(), TransportError::ProxyAuthRequired));
    }

    #[test]
    fn rejects_non_http_status_line() {
        assert!(matches!(
            ProxyResponse::parse("SSH-2.0-OpenSSH\r\n\r\n"),
            Err(TransportError::MalformedProxyResponse(_))
        ));
    }

    #[tokio::test]
    async fn response_head_stops_at_blank_line() {
        let mut input: &[u8] = b"HTTP/1.1 200 OK\r\n\r\nhello\n";
        let head = read_response_head(&mut input).await.unwrap();
        assert_eq!(head, "HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(input, b"hello\n");
    }
}
