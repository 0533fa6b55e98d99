//! Process-flavoured worker spawning.

use std::io;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use tracing::debug;

use crate::process::worker::LaunchSpec;
use crate::process::{ProcessContext, LAUNCH_ENV};

/// Re-executes the current program as a worker carrying `launch` in its
/// environment. Stdio is inherited so worker diagnostics stay visible.
pub(crate) fn spawn_worker(ctx: &Arc<ProcessContext>, launch: &LaunchSpec) -> io::Result<Child> {
    let spec = serde_json::to_string(launch)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    debug!(worker = %launch.name, program = %ctx.program().display(), "spawning worker process");
    Command::new(ctx.program())
        .args(ctx.args())
        .env(LAUNCH_ENV, spec)
        .stdin(Stdio::null())
        .spawn()
}
