//! §4.C TTY sizer: forwards a resize to the container runtime, skipping the
//! no-op cases (no exec yet, or an unknown `(0, 0)` size) so callers never
//! need to special-case those themselves.

use crate::model::TtySize;
use crate::runtime::ContainerRuntime;

/// Forwards `size` to `exec_id` on `runtime`, unless `exec_id` is empty (no
/// exec started yet) or `size` is `(0, 0)` (unknown). Errors from the
/// runtime propagate to the caller.
pub async fn resize(
    runtime: &dyn ContainerRuntime,
    exec_id: &str,
    size: TtySize,
) -> anyhow::Result<()> {
    if exec_id.is_empty() {
        return Ok(());
    }
    if size.is_unknown() {
        return Ok(());
    }
    runtime.exec_resize(exec_id, size).await
}
