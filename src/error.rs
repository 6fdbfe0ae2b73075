use std::fmt;

use crate::options::UrlTuple;

/// Errors surfaced at the public boundary. Never thrown as exceptions —
/// every public operation returns one of these inside a `Result`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ClientError {
	/// A step of the construction pipeline failed. This is latched on the
	/// client and replayed verbatim by every later operation.
	#[error("client initialization failed: {0}")]
	InitFailed(String),

	#[error("URL for service {service} not found in setup {setup}")]
	UrlNotFound { service: String, setup: String },

	#[error("URL is malformed: {0}")]
	UrlMalformed(String),

	#[error("invalid proxy chain specified on instantiation")]
	InvalidProxy,

	#[error("no default group found for DN {dn}")]
	GroupNotFound { dn: String },

	#[error("insane environment for protocol {scheme}: {reason}")]
	InsaneTransport { scheme: String, reason: String },

	#[error("can't connect to {url}: {cause}")]
	ConnectFailed { url: String, cause: String },

	#[error("send failed: {0}")]
	SendFailed(String),

	#[error("receive failed: {0}")]
	ReceiveFailed(String),

	#[error("delegation failed: {0}")]
	DelegationFailed(String),

	#[error("unknown protocol scheme: {0}")]
	UnknownScheme(String),
}

impl ClientError {
	pub(crate) fn connect_failed(tuple: &UrlTuple, cause: impl fmt::Display) -> Self {
		ClientError::ConnectFailed {
			url: tuple.to_url(),
			cause: cause.to_string(),
		}
	}
}
