use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::config::ConfigView;
use crate::error::ClientError;
use crate::options::{ClientOptions, UrlTuple};
use crate::transport::ProtocolRegistry;

/// Per-client state for URL discovery: candidates, ban set and the
/// retry/sweep bookkeeping that drives the ban policy.
///
/// `nb_of_urls`/`nb_of_retry` default to `1`/`3`, matching
/// `BaseClient.__init__`'s unconditional `__nbOfUrls = 1, __nbOfRetry = 3`
/// baseline: the already-qualified-URL and gateway-rewrite branches of
/// `find_service_url` never resolve a candidate list and so never
/// overwrite these, but a client reached through either branch still
/// needs a non-zero retry budget.
#[derive(Clone, Debug)]
pub struct ServiceEndpointSet {
	pub candidates: Vec<String>,
	pub banned_urls: HashSet<String>,
	pub nb_of_urls: usize,
	pub nb_of_retry: usize,
	pub retry: usize,
	pub retry_counter: usize,
}

impl Default for ServiceEndpointSet {
	fn default() -> Self {
		Self {
			candidates: Vec::new(),
			banned_urls: HashSet::new(),
			nb_of_urls: 1,
			nb_of_retry: 3,
			retry: 0,
			retry_counter: 0,
		}
	}
}

impl ServiceEndpointSet {
	/// Bound on the number of connect retries across one `connect()` call.
	pub fn retry_bound(&self) -> usize {
		self.nb_of_retry.saturating_mul(self.nb_of_urls.max(1)).saturating_sub(1)
	}

	/// Records a failed connect attempt against `url`. Returns the sleep
	/// to perform, if the ban set just became full (a "sweep" completed).
	pub fn record_failure(&mut self, url: &str) -> Option<Duration> {
		if self.banned_urls.insert(url.to_string()) {
			// newly banned
		}
		self.retry += 1;
		let mut sweep_delay = None;
		if self.banned_urls.len() == self.nb_of_urls {
			self.retry_counter += 1;
			let secs = if self.nb_of_urls > 1 {
				3.0 / self.nb_of_urls as f64
			} else {
				2.0
			};
			sweep_delay = Some(Duration::from_secs_f64(secs));
		}
		sweep_delay
	}

	/// Whether the next attempt should run with the "be patient" socket
	/// timeout, raised to 5s once `retryCounter == nbOfRetry - 1`.
	pub fn should_extend_timeout(&self) -> bool {
		self.nb_of_retry > 0 && self.retry_counter == self.nb_of_retry - 1
	}
}

/// Resolves a logical service name to a concrete URL, applying gateway
/// rewriting and the ban-aware selection algorithm.
pub struct UrlDiscoverer {
	config: Arc<dyn ConfigView>,
}

impl UrlDiscoverer {
	pub fn new(config: Arc<dyn ConfigView>) -> Self {
		Self { config }
	}

	fn gateway_url(&self, ignore_gateways: bool) -> Option<String> {
		if ignore_gateways {
			return None;
		}
		let site = self.config.site_name();
		let raw = self.config.get_value(&format!("/DIRAC/Gateways/{site}"))?;
		let mut candidates: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
		if candidates.is_empty() {
			return None;
		}
		candidates.shuffle(&mut rand::rng());
		let chosen = candidates[0];
		// keep only scheme://host:port
		let parts: Vec<&str> = chosen.split('/').collect();
		if parts.len() < 3 {
			return None;
		}
		Some(parts[..3].join("/"))
	}

	/// Merges `/DIRAC/ConnConf/<host>:<port>` into `options`, existing keys
	/// win. Runs again on every retry, since a
	/// different candidate URL can carry different per-endpoint options.
	fn merge_conn_conf(&self, options: &mut ClientOptions, tuple: &UrlTuple) {
		let Some(conn_opts) = self
			.config
			.get_options_dict(&format!("/DIRAC/ConnConf/{}:{}", tuple.host, tuple.port))
		else {
			return;
		};
		for (k, v) in conn_opts {
			match k.as_str() {
				crate::options::KW_USE_CERTIFICATES if options.use_certificates.is_none() => {
					options.use_certificates = Some(parse_bool(&v));
				},
				crate::options::KW_SKIP_CA_CHECK if options.skip_ca_check.is_none() => {
					options.skip_ca_check = Some(parse_bool(&v));
				},
				crate::options::KW_TIMEOUT if options.timeout.is_none() => {
					options.timeout = v.parse().ok();
				},
				_ => {
					options.extra.entry(k).or_insert(v);
				},
			}
		}
	}

	/// Resolves a destination service to a concrete URL: gateway rewrite,
	/// ban-aware candidate selection with host-avoidance tie-break, and a
	/// per-endpoint ConnConf merge. Returns the chosen URL and its parsed
	/// tuple.
	pub fn find_service_url(
		&self,
		destination_service: &str,
		setup: &str,
		options: &mut ClientOptions,
		registry: &ProtocolRegistry,
		state: &mut ServiceEndpointSet,
	) -> Result<(String, UrlTuple), ClientError> {
		let gateway = self.gateway_url(options.ignore_gateways);

		if let Some(scheme) = registry
			.schemes()
			.find(|s| destination_service.starts_with(&format!("{s}://")))
		{
			let url = if let Some(gateway) = gateway {
				let suffix: Vec<&str> = destination_service.split('/').skip(3).collect();
				format!("{gateway}/{}", suffix.join("/"))
			} else {
				let _ = scheme;
				destination_service.to_string()
			};
			let tuple = UrlTuple::parse(&url).map_err(ClientError::UrlMalformed)?;
			self.merge_conn_conf(options, &tuple);
			return Ok((url, tuple));
		}

		if let Some(gateway) = gateway {
			let url = format!("{gateway}/{destination_service}");
			let tuple = UrlTuple::parse(&url).map_err(ClientError::UrlMalformed)?;
			self.merge_conn_conf(options, &tuple);
			return Ok((url, tuple));
		}

		let raw = self
			.config
			.resolve_service_url(destination_service, setup)
			.ok_or_else(|| ClientError::UrlNotFound {
				service: destination_service.to_string(),
				setup: setup.to_string(),
			})?;
		let candidates: Vec<String> = raw
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string)
			.collect();
		if candidates.is_empty() {
			return Err(ClientError::UrlNotFound {
				service: destination_service.to_string(),
				setup: setup.to_string(),
			});
		}

		state.candidates = candidates.clone();
		state.nb_of_urls = candidates.len();
		state.nb_of_retry = if state.nb_of_urls > 2 { 2 } else { 3 };

		// All candidates banned -> sweep complete, retry everyone.
		if state.banned_urls.len() == candidates.len() {
			state.banned_urls.clear();
		}

		let mut working: Vec<String> = if candidates.len() > 1 {
			candidates
				.iter()
				.filter(|u| !state.banned_urls.contains(*u))
				.cloned()
				.collect()
		} else {
			candidates.clone()
		};
		if working.is_empty() {
			working = candidates.clone();
		}
		working.shuffle(&mut rand::rng());

		let mut chosen = working[0].clone();

		// Host-avoidance tie-break: avoid re-picking a host that already has a banned URL.
		if !state.banned_urls.is_empty() && state.nb_of_urls > 2 {
			if let Ok(chosen_tuple) = UrlTuple::parse(&chosen) {
				let host_is_banned = state.banned_urls.iter().any(|b| {
					UrlTuple::parse(b)
						.map(|t| t.host == chosen_tuple.host)
						.unwrap_or(false)
				});
				if host_is_banned {
					if let Some(alt) = working[1..].iter().find(|u| {
						UrlTuple::parse(u)
							.map(|t| t.host != chosen_tuple.host)
							.unwrap_or(false)
					}) {
						chosen = alt.clone();
					}
				}
			}
		}

		let mut tuple = UrlTuple::parse(&chosen).map_err(ClientError::UrlMalformed)?;
		tuple.path = tuple.path.trim_start_matches('/').to_string();
		self.merge_conn_conf(options, &tuple);

		Ok((chosen, tuple))
	}
}

fn parse_bool(s: &str) -> bool {
	matches!(s, "true" | "True" | "1" | "yes")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::YamlConfig;
	use crate::transport::dips::DipsPlugin;

	fn registry() -> ProtocolRegistry {
		let mut r = ProtocolRegistry::new();
		r.register("dips", Box::new(DipsPlugin));
		r
	}

	fn config_with_urls(urls: &str) -> Arc<dyn ConfigView> {
		Arc::new(
			YamlConfig::from_str(
				&format!("Systems:\n  A/B:\n    URLs:\n      Test: \"{urls}\"\n"),
				"CERN",
			)
			.unwrap(),
		)
	}

	#[test]
	fn single_url_happy_path() {
		let cfg = config_with_urls("dips://h1:9100/A/B");
		let discoverer = UrlDiscoverer::new(cfg);
		let mut state = ServiceEndpointSet::default();
		let (url, tuple) = discoverer
			.find_service_url("A/B", "Test", &mut ClientOptions::default(), &registry(), &mut state)
			.unwrap();
		assert_eq!(url, "dips://h1:9100/A/B");
		assert_eq!(tuple.host, "h1");
		assert_eq!(state.nb_of_urls, 1);
		assert_eq!(state.nb_of_retry, 3);
	}

	#[test]
	fn sweep_resets_ban_set_once_full() {
		let cfg = config_with_urls("dips://h1:9100/A/B,dips://h2:9100/A/B");
		let discoverer = UrlDiscoverer::new(cfg);
		let mut state = ServiceEndpointSet::default();
		state.banned_urls.insert("dips://h1:9100/A/B".into());
		state.banned_urls.insert("dips://h2:9100/A/B".into());
		let (_url, _tuple) = discoverer
			.find_service_url("A/B", "Test", &mut ClientOptions::default(), &registry(), &mut state)
			.unwrap();
		assert!(state.banned_urls.is_empty());
	}

	#[test]
	fn host_avoidance_prefers_other_host() {
		let cfg = config_with_urls(
			"dips://h1:9100/A/B,dips://h1:9101/A/B,dips://h2:9100/A/B,dips://h3:9100/A/B",
		);
		let discoverer = UrlDiscoverer::new(cfg);
		let mut state = ServiceEndpointSet {
			nb_of_urls: 4,
			..Default::default()
		};
		state.banned_urls.insert("dips://h1:9100/A/B".into());
		for _ in 0..20 {
			let (_url, tuple) = discoverer
				.find_service_url("A/B", "Test", &mut ClientOptions::default(), &registry(), &mut state.clone())
				.unwrap();
			// h1 is banned on one port but still has another live port; with
			// hosts h2/h3 available the tie-break must always steer away from h1.
			assert_ne!(tuple.host, "h1");
		}
	}

	#[test]
	fn gateway_rewrites_qualified_url() {
		let cfg = Arc::new(
			YamlConfig::from_str(
				"DIRAC:\n  Gateways:\n    CERN: dips://gw:9130/Ignored/Path\n",
				"CERN",
			)
			.unwrap(),
		);
		let discoverer = UrlDiscoverer::new(cfg);
		let mut state = ServiceEndpointSet::default();
		let (url, _tuple) = discoverer
			.find_service_url(
				"dips://direct:9100/X/Y",
				"Test",
				&mut ClientOptions::default(),
				&registry(),
				&mut state,
			)
			.unwrap();
		assert_eq!(url, "dips://gw:9130/X/Y");
	}

	#[test]
	fn ignore_gateways_bypasses_rewrite() {
		let cfg = Arc::new(
			YamlConfig::from_str("DIRAC:\n  Gateways:\n    CERN: dips://gw:9130\n", "CERN").unwrap(),
		);
		let discoverer = UrlDiscoverer::new(cfg);
		let mut state = ServiceEndpointSet::default();
		let mut opts = ClientOptions {
			ignore_gateways: true,
			..Default::default()
		};
		let (url, _tuple) = discoverer
			.find_service_url("dips://direct:9100/X/Y", "Test", &mut opts, &registry(), &mut state)
			.unwrap();
		assert_eq!(url, "dips://direct:9100/X/Y");
	}
}
