use arc_swap::ArcSwap;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{load_from_path, validate_config, Config};
use crate::error::{ProxyError, Result};

/// Quiet period after a change event before the file is re-read
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

/// Shared, atomically replaceable configuration snapshot
///
/// Readers take one snapshot per unit of work and keep it for its whole
/// duration; a reload never changes a snapshot that is already in use.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<ArcSwap<Config>>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(config)) }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Install a new snapshot.
    ///
    /// The listener and the relay client are bound once at startup, so
    /// `listen`, `proxy.relay_api_path`, `proxy.relay_endpoint`,
    /// `cors.declared_origin` and `timeout.relay_ms` keep their current
    /// values. The merged snapshot is validated again before it is installed.
    pub fn replace(&self, mut config: Config) -> Result<()> {
        let current = self.inner.load();
        pin("listen", &mut config.listen, &current.listen);
        pin("proxy.relay_api_path", &mut config.proxy.relay_api_path, &current.proxy.relay_api_path);
        pin("proxy.relay_endpoint", &mut config.proxy.relay_endpoint, &current.proxy.relay_endpoint);
        pin("cors.declared_origin", &mut config.cors.declared_origin, &current.cors.declared_origin);
        pin("timeout.relay_ms", &mut config.timeout.relay_ms, &current.timeout.relay_ms);

        validate_config(&config)?;
        self.inner.store(Arc::new(config));
        Ok(())
    }
}

fn pin<T: PartialEq + Clone + fmt::Debug>(field: &'static str, requested: &mut T, current: &T) {
    if requested != current {
        warn!(
            field,
            current = ?current,
            requested = ?requested,
            "setting cannot change at runtime, keeping current"
        );
        *requested = current.clone();
    }
}

/// Watch `path` and reload the store whenever the file changes
///
/// Invalid files are logged and skipped; the previous snapshot stays active.
pub fn watch_config(
    path: PathBuf,
    store: ConfigStore,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let watched = path.clone();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_relevant(&event, &watched) => {
            let _ = tx.send(());
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "config watcher error"),
    })?;

    let dir = watch_dir(&path)?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "watching configuration file");

    Ok(tokio::spawn(async move {
        // The watcher stops when dropped, so it lives inside the task.
        let _watcher = watcher;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    if event.is_none() {
                        break;
                    }
                    sleep(RELOAD_DEBOUNCE).await;
                    while rx.try_recv().is_ok() {}
                    reload(&path, &store);
                }
            }
        }
        debug!("config watcher stopped");
    }))
}

fn reload(path: &Path, store: &ConfigStore) {
    match load_from_path(path).and_then(|config| store.replace(config)) {
        Ok(()) => info!(path = %path.display(), "configuration reloaded"),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "configuration reload failed, keeping previous");
        }
    }
}

fn watch_dir(path: &Path) -> Result<PathBuf> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.is_dir() {
        return Err(ProxyError::Config(format!(
            "Config directory does not exist: {}",
            dir.display()
        )));
    }
    Ok(dir)
}

fn is_relevant(event: &Event, watched: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p.file_name() == watched.file_name())
}
