//! Opening the entry table and building scoped services for a command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, info};

use datastore_config::Config;
use datastore_storage::{
    CleanupSweep, EntryStore, FilesystemSink, OwnerRef, StorageService, SurrealKvEntryStore,
};

use crate::config_bridge;

/// Scope selection shared by the entry commands.
#[derive(Debug, Clone, Default, Args)]
pub(crate) struct ScopeArgs {
    /// Owner kind (e.g. user, team); requires --owner-id
    #[arg(long, requires = "owner_id")]
    pub(crate) owner_type: Option<String>,

    /// Owner identifier; requires --owner-type
    #[arg(long, requires = "owner_type")]
    pub(crate) owner_id: Option<i64>,

    /// Namespace (defaults to store.default_namespace)
    #[arg(short, long)]
    pub(crate) namespace: Option<String>,
}

/// An open entry table plus the loaded configuration.
pub(crate) struct StoreContext {
    pub(crate) config: Config,
    store: Arc<SurrealKvEntryStore>,
}

impl StoreContext {
    /// Open the persistent table named by the configuration.
    pub(crate) fn open(config: Config) -> Result<Self> {
        let dir = config_bridge::data_dir(&config).context("cannot locate data directory")?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create data directory {}", dir.display()))?;
        let store = SurrealKvEntryStore::open(&dir, config.store.table_name.clone())
            .with_context(|| format!("cannot open entry table in {}", dir.display()))?;
        debug!(dir = %dir.display(), table = store.table(), "entry table opened");
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    pub(crate) fn store(&self) -> Arc<dyn EntryStore> {
        Arc::clone(&self.store) as Arc<dyn EntryStore>
    }

    pub(crate) fn sweep(&self) -> CleanupSweep {
        CleanupSweep::new(self.store())
    }

    /// Purge expired rows first when `cleanup.auto_cleanup` is on.
    pub(crate) async fn auto_cleanup(&self) -> Result<()> {
        if self.config.cleanup.auto_cleanup {
            let purged = self.sweep().purge().await?;
            if purged > 0 {
                info!(purged, "expired entries purged before command");
            }
        }
        Ok(())
    }

    /// A service bound to the scope selected by `args`, exporting through
    /// `sink` when one is given.
    pub(crate) fn service(&self, args: &ScopeArgs, sink: Option<FilesystemSink>) -> StorageService {
        let settings = config_bridge::to_store_settings(&self.config);
        let mut service = StorageService::from_settings(self.store(), &settings);
        if let Some(sink) = sink {
            service = service.with_sink(Arc::new(sink));
        }
        if let (Some(kind), Some(id)) = (&args.owner_type, args.owner_id) {
            service = service.for_owner(&OwnerRef::new(kind.as_str(), id));
        }
        if let Some(ns) = &args.namespace {
            service = service.in_namespace(ns.as_str());
        }
        service
    }

    /// A sink and relative name for `file`.
    ///
    /// Absolute paths are written where they point; relative ones are
    /// resolved against `export.path`.
    pub(crate) fn sink_for(&self, file: &Path) -> Result<(FilesystemSink, String)> {
        split_target(&self.config.export.path, file)
    }

    pub(crate) async fn close(self) -> Result<()> {
        self.store.close().await.context("failed to close entry table")
    }
}

fn split_target(export_root: &Path, file: &Path) -> Result<(FilesystemSink, String)> {
    if file.is_absolute() {
        let parent = file.parent().map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", file.display()))?;
        return Ok((FilesystemSink::new(parent), name.to_owned()));
    }
    let name = file
        .to_str()
        .with_context(|| format!("{} is not valid UTF-8", file.display()))?;
    Ok((FilesystemSink::new(export_root), name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_target_uses_export_root() {
        let (sink, name) = split_target(Path::new("exports"), Path::new("a/b.json")).unwrap();
        assert_eq!(sink.root(), Path::new("exports"));
        assert_eq!(name, "a/b.json");
    }

    #[test]
    fn test_absolute_target_splits() {
        let (sink, name) = split_target(Path::new("exports"), Path::new("/tmp/x/dump.json")).unwrap();
        assert_eq!(sink.root(), Path::new("/tmp/x"));
        assert_eq!(name, "dump.json");
    }
}
