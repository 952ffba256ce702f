//! farmconf server
//!
//! Wires the SQLite config adapter, the job runners and the HTTP surface
//! (administrative snapshot reset and scheduler health) into one process.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod prelude;
pub mod routes;

use tokio::net::TcpListener;

use crate::prelude::*;

/// Serve the HTTP routes on the configured listen address until the process exits
pub async fn run(app: App) -> ClResult<()> {
	let listener = TcpListener::bind(&*app.opts.listen).await.inspect_err(|e| {
		error!("FATAL: Cannot listen on {}: {}", app.opts.listen, e);
	})?;
	info!("Listening on {}", app.opts.listen);

	axum::serve(listener, routes::init(app)).await?;
	Ok(())
}

// vim: ts=4
