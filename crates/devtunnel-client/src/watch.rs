//! File-watch hot reload.
//!
//! Created or modified files under the watched paths trigger
//! [`InvocationRouter::reload`]. A burst of changes (an editor save, a
//! build writing many files) folds into one reload once the paths have
//! been quiet for the debounce period.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use devtunnel_core::error::{Result, TunnelError};

use crate::config::ReloadSection;
use crate::runtime::InvocationRouter;

/// Docs, manifests and config never change handler code.
const IGNORED_EXTENSIONS: &[&str] = &["json", "yml", "yaml", "md", "txt"];
const IGNORED_NAMES: &[&str] = &["LICENSE"];

/// Whether a change at `path` (relative to a watch root) is noise.
///
/// Anything under a dot directory (`.git`, `.idea`, `.vscode`, build
/// caches) or itself hidden is ignored, as are the files above.
pub fn is_ignored(path: &Path) -> bool {
    let hidden = path.components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().starts_with('.'),
        _ => false,
    });
    if hidden {
        return true;
    }
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if IGNORED_NAMES.contains(&name) {
            return true;
        }
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IGNORED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any)
    )
}

/// `path` relative to the first root containing it.
fn relative_to<'a>(roots: &[PathBuf], path: &'a Path) -> &'a Path {
    roots
        .iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .unwrap_or(path)
}

/// Running watcher; stops watching when dropped.
pub struct ReloadWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ReloadWatcher {
    pub fn start(section: &ReloadSection, router: Arc<InvocationRouter>) -> Result<Self> {
        let roots = section.watch_paths();
        let (tx, rx) = mpsc::unbounded_channel();

        let filter_roots = roots.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_change(&event.kind) => {
                for path in event.paths {
                    if is_ignored(relative_to(&filter_roots, &path)) {
                        continue;
                    }
                    let _ = tx.send(path);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "file watch error"),
        })
        .map_err(|e| TunnelError::Config(format!("file watcher: {e}")))?;

        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| TunnelError::Config(format!("watch {}: {e}", root.display())))?;
        }
        tracing::info!(paths = ?roots, debounce_ms = section.debounce_ms, "watching for file changes");

        let debounce = Duration::from_millis(section.debounce_ms);
        let task = tokio::spawn(reload_on_change(rx, debounce, router));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ReloadWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn reload_on_change(
    mut changes: mpsc::UnboundedReceiver<PathBuf>,
    debounce: Duration,
    router: Arc<InvocationRouter>,
) {
    while let Some(first) = changes.recv().await {
        let mut burst = 1usize;
        while let Ok(Some(_)) = tokio::time::timeout(debounce, changes.recv()).await {
            burst += 1;
        }

        tracing::debug!(path = %first.display(), changes = burst, "detected file change, reloading");
        match router.reload().await {
            Ok(()) => tracing::info!("runtime reloaded"),
            Err(e) => tracing::error!(error = %e, "runtime reload failed"),
        }
    }
}
