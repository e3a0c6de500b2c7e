//! Crate-wide error type, following the same shape as the rest of the
//! ambient stack: a single enum with `err-derive` display impls, plus
//! an `OkOrMessage` extension trait for turning `Option`s into `Result`s
//! at call sites.

use err_derive::Error;

/// Errors produced by the block manager stack.
///
/// Variants map onto the "Kinds" enumerated in the error handling
/// design: precondition failures and invariant violations are
/// represented here; not-found and stale-state conditions are *not*
/// errors (they are handled as `Ok` with a signal value or routed into
/// a pending-messages queue), per the propagation policy.
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "{}", _0)]
	Message(String),

	#[error(display = "Invalid replication range: {}", _0)]
	InvalidReplication(String),

	#[error(display = "Unknown node: {:?}", _0)]
	UnknownNode(String),

	/// Internal consistency assertion failed. Per the error handling
	/// design this is fatal: background workers that observe this
	/// variant log it and terminate the process instead of retrying.
	#[error(display = "invariant violation: {}", _0)]
	Invariant(String),

	#[error(display = "I/O error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "TOML parse error: {}", _0)]
	Toml(#[error(source)] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	pub fn message<M: Into<String>>(m: M) -> Self {
		Error::Message(m.into())
	}

	pub fn is_invariant(&self) -> bool {
		matches!(self, Error::Invariant(_))
	}
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
	fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Error {
		Error::Message("send error".into())
	}
}

/// Helper trait to convert an `Option` into a `Result`, used pervasively
/// at call sites (e.g. `tx.ok_or_message("...")`).
pub trait OkOrMessage {
	type S;
	fn ok_or_message<M: Into<String>>(self, msg: M) -> Result<Self::S>;
}

impl<S> OkOrMessage for Option<S> {
	type S = S;
	fn ok_or_message<M: Into<String>>(self, msg: M) -> Result<S> {
		self.ok_or_else(|| Error::Message(msg.into()))
	}
}
