use crate::error::ClientError;
use crate::identity::CallContext;
use crate::options::{ClientOptions, ExtraCredentials, VAL_EXTRA_CREDENTIALS_HOST};

/// External collaborator: resolves identity facts DN→group, the way
/// DIRAC's `Core.Security.CS` helper does. Specified only by the
/// interface the credential resolver consumes.
pub trait SecurityHelper: Send + Sync {
	fn find_default_group_for_dn(&self, dn: &str) -> Option<String>;
}

/// A helper that never resolves anything; useful as a default when no
/// security service is wired in (e.g. pure certificate-based setups).
#[derive(Default)]
pub struct NoSecurityHelper;

impl SecurityHelper for NoSecurityHelper {
	fn find_default_group_for_dn(&self, _dn: &str) -> Option<String> {
		None
	}
}

/// Produces `extraCredentials` and resolves the
/// delegated (DN, group) pair, consulting the caller's explicit options,
/// the call context, and finally the security helper.
pub struct CredentialResolver<'a> {
	pub security: &'a dyn SecurityHelper,
}

impl<'a> CredentialResolver<'a> {
	pub fn new(security: &'a dyn SecurityHelper) -> Self {
		Self { security }
	}

	/// Flattens a proxy chain into `proxy_string` exactly once. Flattening
	/// failure is `InvalidProxy`.
	pub fn flatten_proxy_chain(&self, opts: &mut ClientOptions) -> Result<(), ClientError> {
		let Some(chain) = opts.proxy.proxy_chain.take() else {
			return Ok(());
		};
		if chain.iter().any(|s| s.is_empty()) {
			return Err(ClientError::InvalidProxy);
		}
		opts.proxy.proxy_string = Some(chain.join(""));
		Ok(())
	}

	/// Construction-time defaulting, run once : fills
	/// in `useCertificates`/`skipCACheck` from the config view if the
	/// caller didn't pin them, then flattens any proxy chain.
	pub fn establish_certificate_defaults(
		&self,
		opts: &mut ClientOptions,
		config: &dyn crate::config::ConfigView,
	) -> Result<(), ClientError> {
		if opts.use_certificates.is_none() {
			opts.use_certificates = Some(config.use_server_certificate_default());
		}
		if opts.skip_ca_check.is_none() {
			opts.skip_ca_check = Some(if opts.use_certificates.unwrap_or(false) {
				false
			} else {
				config.skip_ca_check_default()
			});
		}
		self.flatten_proxy_chain(opts)
	}

	/// Resolves `extraCredentials` in place.
	/// Runs lazily on each connect, since the delegated identity can change
	/// between calls to the same client (the whole reason it is carried in
	/// [`CallContext`] rather than pinned at construction).
	///
	/// If only a DN is known, the security helper is asked for its default
	/// group; if it can't find one, that failure is propagated rather than
	/// silently leaving the group unset.
	pub fn resolve(
		&self,
		opts: &mut ClientOptions,
		ctx: &CallContext,
	) -> Result<ExtraCredentials, ClientError> {
		let mut extra_credentials = if opts.use_certificates.unwrap_or(false) {
			ExtraCredentials::Hosts
		} else {
			ExtraCredentials::Empty
		};
		if let Some(explicit) = opts.extra_credentials.clone() {
			extra_credentials = explicit;
		}

		let (ctx_dn, ctx_group) = ctx.identity();
		let delegated_dn = opts.delegated_dn.clone().or(ctx_dn);
		let delegated_group = opts.delegated_group.clone().or(ctx_group);

		if let Some(dn) = delegated_dn {
			let group = match delegated_group {
				Some(group) => group,
				None => self
					.security
					.find_default_group_for_dn(&dn)
					.ok_or_else(|| ClientError::GroupNotFound { dn: dn.clone() })?,
			};
			opts.delegated_dn = Some(dn.clone());
			opts.delegated_group = Some(group.clone());
			extra_credentials = ExtraCredentials::Identity(dn, group);
		}

		opts.extra_credentials = Some(extra_credentials.clone());
		Ok(extra_credentials)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct FixedGroup(&'static str);
	impl SecurityHelper for FixedGroup {
		fn find_default_group_for_dn(&self, _dn: &str) -> Option<String> {
			Some(self.0.to_string())
		}
	}

	#[test]
	fn certificates_use_hosts_sentinel() {
		let helper = NoSecurityHelper;
		let resolver = CredentialResolver::new(&helper);
		let mut opts = ClientOptions {
			use_certificates: Some(true),
			..Default::default()
		};
		let result = resolver.resolve(&mut opts, &CallContext::new()).unwrap();
		assert_eq!(result, ExtraCredentials::Hosts);
	}

	#[test]
	fn explicit_identity_overrides_hosts_sentinel() {
		let helper = NoSecurityHelper;
		let resolver = CredentialResolver::new(&helper);
		let mut opts = ClientOptions {
			use_certificates: Some(true),
			..Default::default()
		};
		let ctx = CallContext::new().with_identity("/O=DIRAC/CN=alice", "dirac_user");
		let result = resolver.resolve(&mut opts, &ctx).unwrap();
		assert_eq!(
			result,
			ExtraCredentials::Identity("/O=DIRAC/CN=alice".into(), "dirac_user".into())
		);
	}

	#[test]
	fn dn_without_group_asks_security_helper() {
		let helper = FixedGroup("dirac_admin");
		let resolver = CredentialResolver::new(&helper);
		let mut opts = ClientOptions {
			delegated_dn: Some("/O=DIRAC/CN=bob".into()),
			..Default::default()
		};
		let result = resolver.resolve(&mut opts, &CallContext::new()).unwrap();
		assert_eq!(
			result,
			ExtraCredentials::Identity("/O=DIRAC/CN=bob".into(), "dirac_admin".into())
		);
	}

	#[test]
	fn dn_without_resolvable_group_propagates_failure() {
		let helper = NoSecurityHelper;
		let resolver = CredentialResolver::new(&helper);
		let mut opts = ClientOptions {
			delegated_dn: Some("/O=DIRAC/CN=bob".into()),
			..Default::default()
		};
		let err = resolver.resolve(&mut opts, &CallContext::new()).unwrap_err();
		assert!(matches!(err, ClientError::GroupNotFound { dn } if dn == "/O=DIRAC/CN=bob"));
	}

	#[test]
	fn proxy_chain_flattens_once() {
		let helper = NoSecurityHelper;
		let resolver = CredentialResolver::new(&helper);
		let mut opts = ClientOptions {
			proxy: crate::options::ProxyMaterial {
				proxy_chain: Some(vec!["CERT1".into(), "CERT2".into()]),
				..Default::default()
			},
			..Default::default()
		};
		resolver.flatten_proxy_chain(&mut opts).unwrap();
		assert_eq!(opts.proxy.proxy_string, Some("CERT1CERT2".into()));
		assert!(opts.proxy.proxy_chain.is_none());
	}

	#[test]
	fn empty_proxy_chain_entry_is_invalid() {
		let helper = NoSecurityHelper;
		let resolver = CredentialResolver::new(&helper);
		let mut opts = ClientOptions {
			proxy: crate::options::ProxyMaterial {
				proxy_chain: Some(vec!["".into()]),
				..Default::default()
			},
			..Default::default()
		};
		let err = resolver.flatten_proxy_chain(&mut opts).unwrap_err();
		assert!(matches!(err, ClientError::InvalidProxy));
	}

	#[test]
	fn establish_certificate_defaults_fills_use_certificates_from_config() {
		let helper = NoSecurityHelper;
		let resolver = CredentialResolver::new(&helper);
		let config = crate::config::YamlConfig::from_str(
			"DIRAC:\n  Security:\n    UseServerCertificate: true\n",
			"CERN",
		)
		.unwrap();
		let mut opts = ClientOptions::default();
		resolver.establish_certificate_defaults(&mut opts, &config).unwrap();
		assert_eq!(opts.use_certificates, Some(true));
		assert_eq!(opts.skip_ca_check, Some(false));
	}
}
