use std::collections::HashMap;
use std::fmt;

/// Sentinel value for `extraCredentials` when acting under a host/server
/// certificate identity rather than a delegated (DN, group) pair.
pub const VAL_EXTRA_CREDENTIALS_HOST: &str = "hosts";

pub const KW_USE_CERTIFICATES: &str = "useCertificates";
pub const KW_EXTRA_CREDENTIALS: &str = "extraCredentials";
pub const KW_TIMEOUT: &str = "timeout";
pub const KW_SETUP: &str = "setup";
pub const KW_VO: &str = "VO";
pub const KW_DELEGATED_DN: &str = "delegatedDN";
pub const KW_DELEGATED_GROUP: &str = "delegatedGroup";
pub const KW_IGNORE_GATEWAYS: &str = "ignoreGateways";
pub const KW_PROXY_LOCATION: &str = "proxyLocation";
pub const KW_PROXY_STRING: &str = "proxyString";
pub const KW_PROXY_CHAIN: &str = "proxyChain";
pub const KW_SKIP_CA_CHECK: &str = "skipCACheck";
pub const KW_KEEP_ALIVE_LAPSE: &str = "keepAliveLapse";

/// Either of the two forms `extraCredentials` can take on the wire.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExtraCredentials {
	/// Empty string: no extra credentials at all.
	Empty,
	/// The `"hosts"` sentinel: acting as a host/server certificate.
	Hosts,
	/// Delegated (DN, group) identity.
	Identity(String, String),
}

impl Default for ExtraCredentials {
	fn default() -> Self {
		ExtraCredentials::Empty
	}
}

/// A proxy chain flattened into a single opaque string. The flattening is
/// a one-time operation: once `proxy_string` is populated the chain is
/// dropped.
#[derive(Clone, Debug, Default)]
pub struct ProxyMaterial {
	pub proxy_location: Option<String>,
	pub proxy_string: Option<String>,
	pub proxy_chain: Option<Vec<String>>,
}

/// The closed set of recognized client options, plus an escape hatch for
/// anything a protocol plugin wants that this crate doesn't know about.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
	pub use_certificates: Option<bool>,
	pub extra_credentials: Option<ExtraCredentials>,
	pub timeout: Option<u64>,
	pub setup: Option<String>,
	pub vo: Option<String>,
	pub delegated_dn: Option<String>,
	pub delegated_group: Option<String>,
	pub ignore_gateways: bool,
	pub proxy: ProxyMaterial,
	pub skip_ca_check: Option<bool>,
	pub keep_alive_lapse: Option<u64>,
	/// Unrecognized keys, forwarded verbatim to transport plugins.
	pub extra: HashMap<String, String>,
}

/// `(protocol, host, port, path)`, split from a resolved service URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UrlTuple {
	pub protocol: String,
	pub host: String,
	pub port: u16,
	pub path: String,
}

impl UrlTuple {
	pub fn parse(url: &str) -> Result<Self, String> {
		let parsed = url::Url::parse(url).map_err(|e| format!("{e} in {url}"))?;
		let host = parsed
			.host_str()
			.ok_or_else(|| format!("missing host in {url}"))?;
		let port = parsed
			.port()
			.ok_or_else(|| format!("missing port in {url}"))?;
		if host.is_empty() || parsed.scheme().is_empty() {
			return Err(format!("malformed URL {url}"));
		}
		Ok(UrlTuple {
			protocol: parsed.scheme().to_string(),
			host: host.to_string(),
			port,
			path: parsed.path().trim_start_matches('/').to_string(),
		})
	}

	pub fn to_url(&self) -> String {
		format!(
			"{}://{}:{}/{}",
			self.protocol, self.host, self.port, self.path
		)
	}

	pub fn host_port(&self) -> (String, u16) {
		(self.host.clone(), self.port)
	}
}

impl fmt::Display for UrlTuple {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_url())
	}
}
