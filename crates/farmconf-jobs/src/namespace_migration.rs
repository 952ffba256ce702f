//! Namespace migration job
//!
//! Moves the pages of a removed, renumbered or restored namespace in
//! keyset-paginated batches. Each page move updates the page and its recent
//! changes together. A page that cannot be moved is recorded and skipped; the
//! job reports `MigrationPartial` once every batch has been processed.
//!
//! A run handles at most `migration_max_batches` batches, then enqueues a
//! continuation carrying the cursor and the pages that failed so far.

use async_trait::async_trait;
use std::sync::Arc;

use crate::prelude::*;
use farmconf_core::migration::{
	JobRequest, KIND_NAMESPACE_MIGRATE, MigrationAction, NamespaceMigrationParams,
};
use farmconf_core::scheduler::Task;
use farmconf_types::config_adapter::{OriginUpdate, Page, PageMove, PageSelector};
use farmconf_types::types::{PageId, TaskId};

/// Collision suffixes tried before giving up on a page
const MAX_TITLE_SUFFIX: u32 = 1000;

#[derive(Debug)]
pub struct NamespaceMigrationTask {
	params: NamespaceMigrationParams,
}

impl NamespaceMigrationTask {
	pub fn new(params: NamespaceMigrationParams) -> Arc<Self> {
		Arc::new(Self { params })
	}

	fn selector(&self) -> PageSelector {
		match self.params.action {
			MigrationAction::Delete | MigrationAction::Move => {
				PageSelector::Namespace(self.params.from)
			}
			MigrationAction::Restore => PageSelector::Origin(self.params.to),
		}
	}

	/// Title a page should get in the target namespace, before collision handling
	fn target_title(&self, page: &Page) -> Box<str> {
		match self.params.action {
			MigrationAction::Delete if self.params.maintain_prefix => {
				format!("{}:{}", self.params.ns_name, page.title).into()
			}
			MigrationAction::Delete | MigrationAction::Move => page.title.clone(),
			MigrationAction::Restore => {
				page.origin_title.clone().unwrap_or_else(|| page.title.clone())
			}
		}
	}

	/// The first recorded origin is kept, so a restore of it undoes a chain of deletions
	fn origin_update(&self, page: &Page) -> OriginUpdate {
		match self.params.action {
			MigrationAction::Delete if page.origin_namespace.is_some() => OriginUpdate::Keep,
			MigrationAction::Delete => {
				OriginUpdate::Set { namespace: self.params.from, title: page.title.clone() }
			}
			MigrationAction::Move => OriginUpdate::Keep,
			MigrationAction::Restore => OriginUpdate::Clear,
		}
	}

	async fn migrate_page(&self, app: &App, page: &Page) -> ClResult<Box<str>> {
		let tenant = &self.params.tenant;
		let base = self.target_title(page);

		let mut title = None;
		for n in 0..=MAX_TITLE_SUFFIX {
			let candidate = suffixed_title(&base, n);
			if !app.adapter.page_exists(tenant, self.params.to, &candidate).await? {
				title = Some(candidate);
				break;
			}
		}
		let Some(title) = title else {
			return Err(Error::ValidationError(format!("No free title for '{}'", base)));
		};

		let mv = PageMove {
			namespace: self.params.to,
			title: title.clone(),
			origin: self.origin_update(page),
		};
		app.adapter.move_page(tenant, page.page_id, &mv).await?;
		Ok(title)
	}

	async fn continue_later(&self, app: &App, cursor: PageId, failed: Vec<PageId>) -> ClResult<()> {
		let params = NamespaceMigrationParams { cursor: Some(cursor), failed, ..self.params.clone() };
		let job = JobRequest::namespace_migration(&params)?;
		let task_id = app.scheduler.enqueue(job.kind, Some(&job.key), &job.input, job.retry).await?;
		info!(
			tenant = %self.params.tenant,
			task_id,
			"Namespace migration {} continues after page {}",
			job.key,
			cursor
		);
		Ok(())
	}
}

/// `Foo`, `Foo1`, `Foo2`, ...
fn suffixed_title(base: &str, n: u32) -> Box<str> {
	if n == 0 { base.into() } else { format!("{}{}", base, n).into() }
}

#[async_trait]
impl Task<App> for NamespaceMigrationTask {
	fn kind() -> &'static str {
		KIND_NAMESPACE_MIGRATE
	}

	fn kind_of(&self) -> &'static str {
		Self::kind()
	}

	fn build(_id: TaskId, context: &str) -> ClResult<Arc<dyn Task<App>>> {
		let params: NamespaceMigrationParams = serde_json::from_str(context).map_err(|e| {
			Error::ValidationError(format!("Invalid namespace migration parameters: {}", e))
		})?;
		Ok(Self::new(params))
	}

	fn serialize(&self) -> String {
		serde_json::to_string(&self.params).unwrap_or_default()
	}

	async fn run(&self, app: &App) -> ClResult<()> {
		let p = &self.params;
		info!(
			tenant = %p.tenant,
			"Namespace migration ({}) {} -> {}",
			p.action.as_str(),
			p.from,
			p.to
		);

		let batch_size = app.opts.migration_batch_size.max(1);
		let mut cursor = p.cursor;
		let mut failed = p.failed.clone();
		let mut moved = 0usize;

		for _ in 0..app.opts.migration_max_batches.max(1) {
			let pages = app
				.adapter
				.list_migration_pages(&p.tenant, self.selector(), cursor, batch_size)
				.await?;
			let last_batch = pages.len() < batch_size as usize;

			for page in &pages {
				cursor = Some(page.page_id);
				match self.migrate_page(app, page).await {
					Ok(title) => {
						debug!(
							tenant = %p.tenant,
							"Moved page {} '{}' -> {}:'{}'",
							page.page_id,
							page.title,
							p.to,
							title
						);
						moved += 1;
					}
					Err(e) => {
						warn!(
							tenant = %p.tenant,
							"Cannot move page {} '{}': {}",
							page.page_id,
							page.title,
							e
						);
						failed.push(page.page_id);
					}
				}
			}

			if last_batch {
				info!(
					tenant = %p.tenant,
					"Namespace migration done: {} moved, {} failed",
					moved,
					failed.len()
				);
				if failed.is_empty() {
					return Ok(());
				}
				return Err(Error::MigrationPartial(failed.into_boxed_slice()));
			}
		}

		let Some(cursor) = cursor else {
			return Ok(());
		};
		info!(tenant = %p.tenant, "Namespace migration paused: {} moved so far", moved);
		self.continue_later(app, cursor, failed).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn task(action: MigrationAction, maintain_prefix: bool) -> NamespaceMigrationTask {
		NamespaceMigrationTask {
			params: NamespaceMigrationParams {
				tenant: TenantKey::new("wikidb").unwrap(),
				action,
				from: 100,
				to: 0,
				ns_name: "Project".into(),
				maintain_prefix,
				cursor: None,
				failed: vec![],
			},
		}
	}

	fn page(title: &str, origin_title: Option<&str>) -> Page {
		Page {
			page_id: 1,
			namespace: 100,
			title: title.into(),
			origin_namespace: origin_title.map(|_| 100),
			origin_title: origin_title.map(Into::into),
		}
	}

	#[test]
	fn test_target_title() {
		assert_eq!(&*task(MigrationAction::Delete, false).target_title(&page("Foo", None)), "Foo");
		assert_eq!(
			&*task(MigrationAction::Delete, true).target_title(&page("Foo", None)),
			"Project:Foo"
		);
		assert_eq!(&*task(MigrationAction::Move, true).target_title(&page("Foo", None)), "Foo");
		assert_eq!(
			&*task(MigrationAction::Restore, false).target_title(&page("Project:Foo", Some("Foo"))),
			"Foo"
		);
	}

	#[test]
	fn test_origin_update() {
		let fresh = page("Foo", None);
		assert_eq!(
			task(MigrationAction::Delete, false).origin_update(&fresh),
			OriginUpdate::Set { namespace: 100, title: "Foo".into() }
		);
		assert_eq!(task(MigrationAction::Move, false).origin_update(&fresh), OriginUpdate::Keep);
		assert_eq!(task(MigrationAction::Restore, false).origin_update(&fresh), OriginUpdate::Clear);

		// Already displaced once
		let displaced = page("Foo", Some("Foo"));
		assert_eq!(task(MigrationAction::Delete, false).origin_update(&displaced), OriginUpdate::Keep);
	}

	#[test]
	fn test_suffixed_title() {
		assert_eq!(&*suffixed_title("Foo", 0), "Foo");
		assert_eq!(&*suffixed_title("Foo", 2), "Foo2");
	}

	#[test]
	fn test_serialize_roundtrip_is_stable() {
		let task = task(MigrationAction::Delete, true);
		let built = NamespaceMigrationTask::build(0, &task.serialize()).unwrap();
		assert_eq!(built.serialize(), task.serialize());
	}
}

// vim: ts=4
