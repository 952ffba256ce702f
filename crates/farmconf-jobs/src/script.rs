//! Maintenance script runner
//!
//! Runs `<binary> <base_dir>/<script> <args..> --wiki <tenant>` under a shell
//! that caps virtual memory and output file size. The child is killed when
//! the timeout elapses. A failed script schedules its follow-up action once.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::prelude::*;
use farmconf_core::migration::{JobRequest, KIND_SCRIPT_RUN, ScriptParams};
use farmconf_core::scheduler::Task;
use farmconf_types::types::TaskId;

/// Characters of stderr quoted in a failure message
const STDERR_TAIL: usize = 512;

#[derive(Debug)]
pub struct ScriptTask {
	params: ScriptParams,
}

impl ScriptTask {
	pub fn new(params: ScriptParams) -> Arc<Self> {
		Arc::new(Self { params })
	}

	fn command(&self, app: &App) -> Command {
		let opts = &app.opts.script;
		let action = &self.params.action;

		// `ulimit -f` counts 512-byte blocks in a POSIX shell
		let limits = format!(
			"ulimit -v {}; ulimit -f {}; exec \"$@\"",
			opts.memory_limit_kb,
			opts.file_size_limit_kb.saturating_mul(2)
		);
		let mut cmd = Command::new("sh");
		cmd.arg("-c")
			.arg(limits)
			.arg("farmconf-script")
			.arg(&*opts.binary)
			.arg(opts.base_dir.join(&*action.script))
			.args(action.args.iter().map(|arg| &**arg))
			.arg("--wiki")
			.arg(self.params.tenant.as_str())
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		cmd
	}

	async fn execute(&self, app: &App) -> ClResult<()> {
		let script = &self.params.action.script;
		let child = self.command(app).spawn().inspect_err(|e| {
			error!(tenant = %self.params.tenant, "Cannot start {}: {}", script, e);
		})?;

		let timeout = Duration::from_secs(app.opts.script.timeout_secs);
		let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
			Ok(output) => output?,
			Err(_) => {
				return Err(Error::ExternalToolFailure(format!(
					"{} timed out after {}s",
					script,
					timeout.as_secs()
				)));
			}
		};

		if output.status.success() {
			debug!(
				tenant = %self.params.tenant,
				"{} output: {}",
				script,
				String::from_utf8_lossy(&output.stdout)
			);
			return Ok(());
		}
		let stderr = String::from_utf8_lossy(&output.stderr);
		let tail = stderr
			.char_indices()
			.rev()
			.nth(STDERR_TAIL)
			.map_or(&*stderr, |(pos, _)| &stderr[pos..]);
		Err(Error::ExternalToolFailure(format!(
			"{} failed ({}): {}",
			script,
			output.status,
			tail.trim()
		)))
	}

	async fn schedule_follow_up(&self, app: &App) -> ClResult<()> {
		let Some(follow_up) = &self.params.action.follow_up else {
			return Ok(());
		};
		let mut action = (**follow_up).clone();
		action.follow_up = None;
		let params = ScriptParams {
			tenant: self.params.tenant.clone(),
			origin: self.params.origin.clone(),
			action,
		};
		let job = JobRequest::script(&params)?;
		let task_id = app.scheduler.enqueue(job.kind, Some(&job.key), &job.input, job.retry).await?;
		info!(tenant = %self.params.tenant, task_id, "Scheduled follow-up {}", params.action.script);
		Ok(())
	}
}

#[async_trait]
impl Task<App> for ScriptTask {
	fn kind() -> &'static str {
		KIND_SCRIPT_RUN
	}

	fn kind_of(&self) -> &'static str {
		Self::kind()
	}

	fn build(_id: TaskId, context: &str) -> ClResult<Arc<dyn Task<App>>> {
		let params: ScriptParams = serde_json::from_str(context)
			.map_err(|e| Error::ValidationError(format!("Invalid script parameters: {}", e)))?;
		Ok(Self::new(params))
	}

	fn serialize(&self) -> String {
		serde_json::to_string(&self.params).unwrap_or_default()
	}

	async fn run(&self, app: &App) -> ClResult<()> {
		info!(
			tenant = %self.params.tenant,
			"Running {} for {}",
			self.params.action.script,
			self.params.origin
		);
		match self.execute(app).await {
			Ok(()) => {
				info!(tenant = %self.params.tenant, "{} finished", self.params.action.script);
				Ok(())
			}
			Err(e) => {
				error!(tenant = %self.params.tenant, "{}", e);
				if let Err(err) = self.schedule_follow_up(app).await {
					error!(tenant = %self.params.tenant, "Cannot schedule follow-up: {}", err);
				}
				Err(e)
			}
		}
	}
}

// vim: ts=4
