//! Edge cache purge
//!
//! Sends `PURGE <path>` with the tenant's `Host` header to every configured
//! edge node. Unreachable nodes are logged and skipped; the job only fails
//! (and is retried) when no node accepted the purge.

use async_trait::async_trait;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Method, Request, Uri, header};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;

use crate::prelude::*;
use farmconf_core::migration::{CachePurgeParams, KIND_CACHE_PURGE};
use farmconf_core::scheduler::Task;
use farmconf_types::types::TaskId;

const PURGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct CachePurgeTask {
	params: CachePurgeParams,
}

impl CachePurgeTask {
	pub fn new(params: CachePurgeParams) -> Arc<Self> {
		Arc::new(Self { params })
	}

	/// Host header and path of the tenant URL
	fn target(&self) -> ClResult<(String, String)> {
		let url: Uri = self.params.url.parse().map_err(|_| {
			Error::ValidationError(format!("Invalid tenant URL: {}", self.params.url))
		})?;
		let Some(authority) = url.authority() else {
			return Err(Error::ValidationError(format!("Tenant URL has no host: {}", self.params.url)));
		};
		let mut path = match url.path() {
			"" => "/".to_string(),
			path => path.to_string(),
		};
		if let Some(query) = url.query() {
			path.push('?');
			path.push_str(query);
		}
		Ok((authority.host().to_string(), path))
	}

	async fn purge(
		client: &Client<HttpConnector, Empty<Bytes>>,
		node: &str,
		host: &str,
		path: &str,
	) -> ClResult<()> {
		let node = node.trim_end_matches('/');
		let uri = if node.contains("://") {
			format!("{}{}", node, path)
		} else {
			format!("http://{}{}", node, path)
		};
		let method = Method::from_bytes(b"PURGE").map_err(|e| Error::Internal(e.to_string()))?;
		let request = Request::builder()
			.method(method)
			.uri(uri)
			.header(header::HOST, host)
			.body(Empty::<Bytes>::new())
			.map_err(|e| Error::ValidationError(format!("Cannot build PURGE request: {}", e)))?;

		match tokio::time::timeout(PURGE_TIMEOUT, client.request(request)).await {
			Ok(Ok(res)) if res.status().is_success() => Ok(()),
			Ok(Ok(res)) => Err(Error::ServiceUnavailable(format!("HTTP {}", res.status()))),
			Ok(Err(e)) => Err(Error::ServiceUnavailable(e.to_string())),
			Err(_) => Err(Error::Timeout),
		}
	}
}

#[async_trait]
impl Task<App> for CachePurgeTask {
	fn kind() -> &'static str {
		KIND_CACHE_PURGE
	}

	fn kind_of(&self) -> &'static str {
		Self::kind()
	}

	fn build(_id: TaskId, context: &str) -> ClResult<Arc<dyn Task<App>>> {
		let params: CachePurgeParams = serde_json::from_str(context)
			.map_err(|e| Error::ValidationError(format!("Invalid cache purge parameters: {}", e)))?;
		Ok(Self::new(params))
	}

	fn serialize(&self) -> String {
		serde_json::to_string(&self.params).unwrap_or_default()
	}

	async fn run(&self, app: &App) -> ClResult<()> {
		let nodes = &app.opts.edge_nodes;
		if nodes.is_empty() {
			return Ok(());
		}
		let (host, path) = self.target()?;
		let client: Client<HttpConnector, Empty<Bytes>> =
			Client::builder(TokioExecutor::new()).build_http();

		let mut purged = 0usize;
		for node in nodes {
			match Self::purge(&client, node, &host, &path).await {
				Ok(()) => purged += 1,
				Err(e) => warn!(tenant = %self.params.tenant, "PURGE via {} failed: {}", node, e),
			}
		}

		if purged == 0 {
			return Err(Error::ServiceUnavailable(format!(
				"No edge node accepted the purge of {}",
				self.params.url
			)));
		}
		info!(
			tenant = %self.params.tenant,
			"Purged {} on {}/{} edge node(s)",
			path,
			purged,
			nodes.len()
		);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn task(url: &str) -> CachePurgeTask {
		CachePurgeTask {
			params: CachePurgeParams { tenant: TenantKey::new("wikidb").unwrap(), url: url.into() },
		}
	}

	#[test]
	fn test_target() {
		assert_eq!(
			task("https://wikidb.example.org/wiki/Main_Page").target().unwrap(),
			("wikidb.example.org".to_string(), "/wiki/Main_Page".to_string())
		);
		assert_eq!(
			task("http://wikidb.example.org").target().unwrap(),
			("wikidb.example.org".to_string(), "/".to_string())
		);
		assert!(task("/relative/only").target().is_err());
	}
}

// vim: ts=4
