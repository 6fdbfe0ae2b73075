use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::ConfigView;
use crate::credentials::{CredentialResolver, SecurityHelper};
use crate::discovery::{ServiceEndpointSet, UrlDiscoverer};
use crate::error::ClientError;
use crate::identity::{CallContext, IdentityDict};
use crate::manager::ConnectionManager;
use crate::options::{ClientOptions, ExtraCredentials, UrlTuple};
use crate::pool::{TransportId, TransportPool};
use crate::transport::ProtocolRegistry;

/// A transport handed back by [`Client::connect`], carrying what
/// [`Client::propose_action`] needs to address the same endpoint again
/// without re-running discovery.
pub struct Connected {
	pub id: TransportId,
	pub tuple: UrlTuple,
	pub extra_credentials: ExtraCredentials,
}

/// Client-side stub for one logical service. Mirrors
/// DIRAC's `BaseClient`: runs a construction-time discovery pipeline once,
/// latches the first failure, and from then on exposes `connect`,
/// `disconnect` and `proposeAction` against whatever URL the pipeline (and
/// later, ban/retry) resolved.
pub struct Client {
	destination_service: String,
	service_name: String,
	setup: String,
	vo: String,
	options: std::sync::Mutex<ClientOptions>,
	id_dict: std::sync::Mutex<IdentityDict>,
	state: AsyncMutex<ServiceEndpointSet>,
	init_error: Option<ClientError>,

	guard: crate::guard::ThreadAffinityGuard,
	config: Arc<dyn ConfigView>,
	security: Arc<dyn SecurityHelper>,
	discoverer: UrlDiscoverer,
	manager: ConnectionManager,
}

impl Client {
	/// Runs the full construction pipeline: setup, VO, timeout, URL
	/// (+ ConnConf merge), certificate defaults, transport sanity, keepalive
	/// lapse. Never panics and never returns `Err`: a failing step is
	/// latched in `init_error` and replayed by every later operation.
	///
	/// `ctx` supplies the thread-local-equivalent override for `setup`
	/// (spec precedence: explicit arg > `ctx` > config `/DIRAC/Setup` >
	/// `"Test"`); it is read once here, at construction, per the "thread
	/// config read at construction and at stub build" design note.
	pub async fn new(
		destination_service: impl Into<String>,
		mut options: ClientOptions,
		ctx: &CallContext,
		config: Arc<dyn ConfigView>,
		registry: Arc<ProtocolRegistry>,
		pool: Arc<TransportPool>,
		security: Arc<dyn SecurityHelper>,
	) -> Self {
		let destination_service = destination_service.into();
		let mut service_name = destination_service.clone();
		let mut init_error: Option<ClientError> = None;

		let setup = discover_setup(&options, ctx, config.as_ref());
		let vo = discover_vo(&options, config.as_ref());
		discover_timeout(&mut options);

		let discoverer = UrlDiscoverer::new(config.clone());
		let mut url_tuple = None;
		let mut state = ServiceEndpointSet::default();
		match discoverer.find_service_url(&destination_service, &setup, &mut options, &registry, &mut state) {
			Ok((_url, tuple)) => {
				service_name = tuple.path.clone();
				url_tuple = Some(tuple);
			},
			Err(e) => {
				init_error.get_or_insert(e);
			},
		}

		let resolver = CredentialResolver::new(security.as_ref());
		if let Err(e) = resolver.establish_certificate_defaults(&mut options, config.as_ref()) {
			init_error.get_or_insert(e);
		}

		let mut id_dict = IdentityDict::new();
		if let Some(tuple) = &url_tuple {
			if let Some(plugin) = registry.get(&tuple.protocol) {
				match plugin.sanity(&tuple.host, tuple.port, &options).await {
					Ok(facts) => id_dict = facts,
					Err(cause) => {
						init_error.get_or_insert(ClientError::InsaneTransport {
							scheme: tuple.protocol.clone(),
							reason: cause.to_string(),
						});
					},
				}
			} else {
				init_error.get_or_insert(ClientError::UnknownScheme(tuple.protocol.clone()));
			}
		}

		set_keep_alive_lapse(&mut options);

		Self {
			destination_service,
			service_name,
			setup,
			vo,
			options: std::sync::Mutex::new(options),
			id_dict: std::sync::Mutex::new(id_dict),
			state: AsyncMutex::new(state),
			init_error,
			guard: crate::guard::ThreadAffinityGuard::new(false),
			config,
			security,
			discoverer,
			manager: ConnectionManager::new(registry, pool),
		}
	}

	pub fn destination_service(&self) -> &str {
		&self.destination_service
	}

	pub fn service_name(&self) -> &str {
		&self.service_name
	}

	/// The DN/group-resolved stub handed to a server proposing an action on
	/// our behalf, mirroring DIRAC's `_getBaseStub`. `useCertificates`
	/// is stripped: it only ever governed how *we* opened the transport.
	pub fn base_stub(&self, ctx: &CallContext) -> (String, ClientOptions) {
		let mut out = self.options.lock().unwrap().clone();
		let id_dict = self.id_dict.lock().unwrap();
		let (ctx_dn, ctx_group) = ctx.identity();

		if out.delegated_dn.is_none() {
			out.delegated_dn = ctx_dn.or_else(|| id_dict.get("DN").cloned());
		}
		if out.delegated_group.is_none() {
			out.delegated_group = id_dict
				.get("group")
				.cloned()
				.or(ctx_group)
				.or_else(|| {
					out
						.delegated_dn
						.as_ref()
						.and_then(|dn| self.security.find_default_group_for_dn(dn))
				});
		}
		out.use_certificates = None;
		(self.destination_service.clone(), out)
	}

	/// Opens a transport for the destination service, applying the
	/// ban/retry policy across the client's persistent endpoint state.
	/// Resolves `extraCredentials` for this call from `ctx`.
	pub async fn connect(&self, ctx: &CallContext) -> Result<Connected, ClientError> {
		self.guard.check(&self.destination_service);
		if let Some(err) = &self.init_error {
			return Err(err.clone());
		}

		let resolver = CredentialResolver::new(self.security.as_ref());
		let extra_credentials = {
			let mut opts = self.options.lock().unwrap();
			resolver.resolve(&mut opts, ctx)?
		};

		let mut opts = self.options.lock().unwrap().clone();
		let mut state = self.state.lock().await;
		let (id, tuple) = self
			.manager
			.connect(&self.discoverer, &self.destination_service, &self.setup, &mut opts, &mut state)
			.await?;
		*self.options.lock().unwrap() = opts;

		Ok(Connected { id, tuple, extra_credentials })
	}

	pub async fn disconnect(&self, conn: Connected) {
		self.manager.disconnect(conn.id).await;
	}

	/// Proposes `action` over an already-`connect`ed transport, running the
	/// delegation round-trip transparently if the server asks for one.
	pub async fn propose_action(
		&self,
		conn: &Connected,
		action: &str,
	) -> Result<serde_json::Value, ClientError> {
		if let Some(err) = &self.init_error {
			return Err(err.clone());
		}
		let options = self.options.lock().unwrap().clone();
		self
			.manager
			.propose_action(
				conn.id,
				&conn.tuple,
				&self.setup,
				&self.vo,
				action,
				&conn.extra_credentials,
				&options,
			)
			.await
	}
}

/// Precedence: explicit `options.setup` > `ctx.setup` (the thread-local
/// override in DIRAC proper) > config `/DIRAC/Setup` > `"Test"`.
fn discover_setup(options: &ClientOptions, ctx: &CallContext, config: &dyn ConfigView) -> String {
	if let Some(setup) = options.setup.clone().filter(|s| !s.is_empty()) {
		return setup;
	}
	if let Some(setup) = ctx.setup.clone().filter(|s| !s.is_empty()) {
		return setup;
	}
	config.get_setup().unwrap_or_else(|| "Test".to_string())
}

fn discover_vo(options: &ClientOptions, config: &dyn ConfigView) -> String {
	if let Some(vo) = options.vo.clone().filter(|v| !v.is_empty()) {
		return vo;
	}
	config
		.get_value("/DIRAC/VirtualOrganization")
		.unwrap_or_else(|| "unknown".to_string())
}

/// Clamps the requested timeout to `[120, inf)`, defaulting to 600 when
/// none was given.
fn discover_timeout(options: &mut ClientOptions) {
	options.timeout = Some(match options.timeout {
		Some(t) if t > 0 => t.max(120),
		_ => 600,
	});
}

/// Clamps the keepalive lapse to `{0} ∪ [150, inf)`, reading the specific
/// `keepAliveLapse` value rather than the whole options map - the original
/// misreads `int(self.kwargs)` here, which always raises and silently
/// falls back to `1`. This implementation reads the actual value.
fn set_keep_alive_lapse(options: &mut ClientOptions) {
	let mut lapse = options.keep_alive_lapse.map(|v| v.max(0)).unwrap_or(1);
	if lapse != 0 {
		lapse = lapse.max(150);
	}
	options.keep_alive_lapse = Some(lapse);
}
