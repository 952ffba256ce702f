//! Error type shared by every farmconf crate

use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::types::{PageId, TenantKey};

pub type ClResult<T> = std::result::Result<T, Error>;

/// One reason a staged change was rejected
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
	/// `subject` requires a predicate on `reference` that does not hold
	Unmet { subject: Box<str>, reference: Box<str>, negated: bool },
	/// `subject` cannot coexist with `with`
	Conflict { subject: Box<str>, with: Box<str> },
	/// `subject` cannot be removed while `dependent` still requires it
	Dependent { subject: Box<str>, dependent: Box<str> },
	/// A structural domain rule (e.g. namespace 0 cannot be deleted)
	Invariant(Box<str>),
}

impl std::fmt::Display for Violation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Violation::Unmet { subject, reference, negated: false } => {
				write!(f, "'{}' requires '{}'", subject, reference)
			}
			Violation::Unmet { subject, reference, negated: true } => {
				write!(f, "'{}' requires '{}' to be absent", subject, reference)
			}
			Violation::Conflict { subject, with } => {
				write!(f, "'{}' conflicts with '{}'", subject, with)
			}
			Violation::Dependent { subject, dependent } => {
				write!(f, "'{}' is required by '{}'", subject, dependent)
			}
			Violation::Invariant(msg) => f.write_str(msg),
		}
	}
}

#[derive(Debug)]
pub enum Error {
	NotFound,
	PermissionDenied,
	DbError,
	Parse,
	Timeout,

	// configuration engine
	UnknownTenant(TenantKey),
	ConstraintViolation(Box<[Violation]>),
	TransactionFailure(String),
	MigrationPartial(Box<[PageId]>),
	ExternalToolFailure(String),

	ValidationError(String),
	ConfigError(String),
	ServiceUnavailable(String),
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl Error {
	/// Build a `ConstraintViolation` from a single violation
	pub fn violation(violation: Violation) -> Self {
		Self::ConstraintViolation(Box::new([violation]))
	}

	/// Build an invariant `ConstraintViolation` from a message
	pub fn invariant(msg: impl Into<Box<str>>) -> Self {
		Self::violation(Violation::Invariant(msg.into()))
	}

	pub fn violations(&self) -> &[Violation] {
		match self {
			Error::ConstraintViolation(v) => v,
			_ => &[],
		}
	}

	/// Whether running the same operation again may succeed
	pub fn is_retryable(&self) -> bool {
		!matches!(
			self,
			Error::NotFound
				| Error::PermissionDenied
				| Error::Parse
				| Error::UnknownTenant(_)
				| Error::ConstraintViolation(_)
				| Error::MigrationPartial(_)
				| Error::ValidationError(_)
				| Error::ConfigError(_)
		)
	}

	fn status_code(&self) -> StatusCode {
		match self {
			Error::NotFound | Error::UnknownTenant(_) => StatusCode::NOT_FOUND,
			Error::PermissionDenied => StatusCode::FORBIDDEN,
			Error::ConstraintViolation(_) => StatusCode::CONFLICT,
			Error::ValidationError(_) | Error::Parse => StatusCode::BAD_REQUEST,
			Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
			Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		tracing::warn!("JSON error: {}", err);
		Self::Parse
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::NotFound => f.write_str("not found"),
			Error::PermissionDenied => f.write_str("permission denied"),
			Error::DbError => f.write_str("database error"),
			Error::Parse => f.write_str("parse error"),
			Error::Timeout => f.write_str("timeout"),
			Error::UnknownTenant(tenant) => write!(f, "unknown tenant: {}", tenant),
			Error::ConstraintViolation(violations) => {
				f.write_str("constraint violation: ")?;
				for (i, v) in violations.iter().enumerate() {
					if i > 0 {
						f.write_str("; ")?;
					}
					write!(f, "{}", v)?;
				}
				Ok(())
			}
			Error::TransactionFailure(msg) => write!(f, "transaction failed: {}", msg),
			Error::MigrationPartial(pages) => {
				write!(f, "migration incomplete, {} page(s) failed: {:?}", pages.len(), pages)
			}
			Error::ExternalToolFailure(msg) => write!(f, "external tool failed: {}", msg),
			Error::ValidationError(msg) => write!(f, "validation error: {}", msg),
			Error::ConfigError(msg) => write!(f, "configuration error: {}", msg),
			Error::ServiceUnavailable(msg) => write!(f, "service unavailable: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let status = self.status_code();
		if status.is_server_error() {
			tracing::error!("Request failed: {}", self);
		}
		let message = match &self {
			// Don't leak internal details to clients
			Error::DbError | Error::Internal(_) | Error::Io(_) | Error::TransactionFailure(_) => {
				"internal error".to_string()
			}
			err => err.to_string(),
		};
		(status, Json(serde_json::json!({ "error": { "code": status.as_u16(), "message": message } })))
			.into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_violation_display() {
		let err = Error::ConstraintViolation(Box::new([
			Violation::Unmet { subject: "b".into(), reference: "a".into(), negated: false },
			Violation::Conflict { subject: "b".into(), with: "c".into() },
		]));
		assert_eq!(
			err.to_string(),
			"constraint violation: 'b' requires 'a'; 'b' conflicts with 'c'"
		);
		assert_eq!(err.violations().len(), 2);
	}

	#[test]
	fn test_status_codes() {
		assert_eq!(Error::PermissionDenied.status_code(), StatusCode::FORBIDDEN);
		assert_eq!(Error::invariant("x").status_code(), StatusCode::CONFLICT);
		assert_eq!(
			Error::UnknownTenant(TenantKey::new("nowiki").unwrap()).status_code(),
			StatusCode::NOT_FOUND
		);
	}

	#[test]
	fn test_retryable() {
		assert!(Error::DbError.is_retryable());
		assert!(Error::Timeout.is_retryable());
		assert!(!Error::MigrationPartial(Box::new([7])).is_retryable());
		assert!(!Error::invariant("x").is_retryable());
	}
}

// vim: ts=4
