use std::collections::HashMap;

use serde_yaml::Value;

/// Read-only accessor for the site/gateway/connection options a real
/// DIRAC deployment keeps in its configuration service. Every lookup is
/// pure: a missing path returns `None`, never an error.
pub trait ConfigView: Send + Sync {
	fn get_setup(&self) -> Option<String> {
		self.get_value("/DIRAC/Setup")
	}

	/// Generic string lookup with a caller-supplied default.
	fn get_value(&self, path: &str) -> Option<String>;

	/// Same as `get_value` but without a default, distinguishing "absent"
	/// from "present and empty".
	fn get_option(&self, path: &str) -> Option<String> {
		self.get_value(path)
	}

	/// A comma-separated or mapping-valued config subtree flattened into a
	/// key/value map, e.g. `/DIRAC/ConnConf/<host>:<port>`.
	fn get_options_dict(&self, path: &str) -> Option<HashMap<String, String>>;

	fn use_server_certificate_default(&self) -> bool;

	fn skip_ca_check_default(&self) -> bool;

	fn site_name(&self) -> String;

	/// Logical service name + setup -> comma-separated URL list, as
	/// served by DIRAC's `PathFinder.getServiceURL`.
	fn resolve_service_url(&self, service_name: &str, setup: &str) -> Option<String> {
		self.get_value(&format!("/Systems/{service_name}/URLs/{setup}"))
	}
}

/// An in-memory config tree backed by a YAML document, the shape a real
/// deployment would load from `/etc/dirac/config.yaml` or receive from
/// its configuration service. Paths are `/`-separated, mirroring DIRAC's
/// configuration path convention.
#[derive(Clone, Debug, Default)]
pub struct YamlConfig {
	root: Value,
	site_name: String,
	use_server_certificate_default: bool,
	skip_ca_check_default: bool,
}

impl YamlConfig {
	pub fn from_str(yaml: &str, site_name: impl Into<String>) -> Result<Self, serde_yaml::Error> {
		let root: Value = serde_yaml::from_str(yaml)?;
		Ok(Self {
			use_server_certificate_default: lookup_bool(&root, "/DIRAC/Security/UseServerCertificate")
				.unwrap_or(false),
			skip_ca_check_default: lookup_bool(&root, "/DIRAC/Security/SkipCAChecks").unwrap_or(false),
			root,
			site_name: site_name.into(),
		})
	}

	pub fn empty(site_name: impl Into<String>) -> Self {
		Self {
			root: Value::Mapping(Default::default()),
			site_name: site_name.into(),
			use_server_certificate_default: false,
			skip_ca_check_default: false,
		}
	}
}

fn walk<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
	let mut cur = root;
	for segment in path.trim_start_matches('/').split('/') {
		cur = cur.as_mapping()?.get(Value::String(segment.to_string()))?;
	}
	Some(cur)
}

fn lookup_bool(root: &Value, path: &str) -> Option<bool> {
	walk(root, path).and_then(|v| v.as_bool())
}

impl ConfigView for YamlConfig {
	fn get_value(&self, path: &str) -> Option<String> {
		walk(&self.root, path).map(|v| match v {
			Value::String(s) => s.clone(),
			other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
		})
	}

	fn get_options_dict(&self, path: &str) -> Option<HashMap<String, String>> {
		let mapping = walk(&self.root, path)?.as_mapping()?;
		Some(
			mapping
				.iter()
				.filter_map(|(k, v)| {
					let k = k.as_str()?.to_string();
					let v = v.as_str().map(str::to_string)?;
					Some((k, v))
				})
				.collect(),
		)
	}

	fn use_server_certificate_default(&self) -> bool {
		self.use_server_certificate_default
	}

	fn skip_ca_check_default(&self) -> bool {
		self.skip_ca_check_default
	}

	fn site_name(&self) -> String {
		self.site_name.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reads_nested_paths() {
		let cfg = YamlConfig::from_str(
			"DIRAC:\n  Setup: Production\n  Gateways:\n    CERN: dips://gw1:9135,dips://gw2:9135\n",
			"CERN",
		)
		.unwrap();
		assert_eq!(cfg.get_value("/DIRAC/Setup"), Some("Production".into()));
		assert_eq!(
			cfg.get_value("/DIRAC/Gateways/CERN"),
			Some("dips://gw1:9135,dips://gw2:9135".into())
		);
		assert_eq!(cfg.get_value("/DIRAC/Missing"), None);
	}

	#[test]
	fn conn_conf_dict() {
		let cfg = YamlConfig::from_str(
			"DIRAC:\n  ConnConf:\n    \"h1:9100\":\n      timeout: \"900\"\n",
			"CERN",
		)
		.unwrap();
		let dict = cfg.get_options_dict("/DIRAC/ConnConf/h1:9100").unwrap();
		assert_eq!(dict.get("timeout"), Some(&"900".to_string()));
	}

	#[test]
	fn resolve_service_url_default_path() {
		let cfg = YamlConfig::from_str(
			"Systems:\n  Framework:\n    URLs:\n      Production: dips://h1:9100/Framework\n",
			"CERN",
		)
		.unwrap();
		assert_eq!(
			cfg.resolve_service_url("Framework", "Production"),
			Some("dips://h1:9100/Framework".into())
		);
	}
}
