use std::collections::HashMap;

/// Per-call identity overrides. DIRAC's `BaseClient` reads these from
/// ambient thread-local state (`ThreadConfig`); here they're carried as an
/// explicit value alongside the call instead, so a handler thread can
/// serve requests for more than one identity without cross-talk.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
	pub setup: Option<String>,
	pub delegated_dn: Option<String>,
	pub delegated_group: Option<String>,
}

impl CallContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_setup(mut self, setup: impl Into<String>) -> Self {
		self.setup = Some(setup.into());
		self
	}

	pub fn with_identity(mut self, dn: impl Into<String>, group: impl Into<String>) -> Self {
		self.delegated_dn = Some(dn.into());
		self.delegated_group = Some(group.into());
		self
	}

	pub(crate) fn identity(&self) -> (Option<String>, Option<String>) {
		(self.delegated_dn.clone(), self.delegated_group.clone())
	}
}

/// Output of a protocol plugin's sanity check: whatever identity material
/// (DN, group, host cert CN, ...) it was able to establish locally.
pub type IdentityDict = HashMap<String, String>;
