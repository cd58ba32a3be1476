//! Bundle staging for deploy.
//!
//! A deploy gets a fresh [`BuildLocation`] (a uuid-named directory under
//! the temp root), a [`BuildStage`] fills it with `bundle.tar.gz`, and the
//! location is removed once the deploy is over, whether it got that far
//! or not.

use crate::completion;
use crate::error::{BuildFailedDetails, Error, Result};
use crate::utils::io;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Builder;

pub const BUNDLE_FILE_NAME: &str = "bundle.tar.gz";

/// Top-level directories left out of the bundle.
pub const EXCLUDED_DIRS: &[&str] = &["node_modules", ".git", ".tmp"];

const GZIP_LEVEL: u32 = 6;

/// Produces the deployable bundle.
#[async_trait]
pub trait BuildStage: Send + Sync {
    /// Create `build_dir` (which must not exist yet) and write the archive of
    /// `app_path` to `bundle_path`.
    async fn build(&self, app_path: &Path, build_dir: &Path, bundle_path: &Path) -> Result<()>;
}

/// Per-deploy build directory. Removed on drop if not cleaned up before.
#[derive(Debug)]
pub struct BuildLocation {
    dir: PathBuf,
    bundle_path: PathBuf,
    removed: bool,
}

impl BuildLocation {
    pub fn new(temp_root: &Path) -> Self {
        let dir = temp_root.join(uuid::Uuid::new_v4().to_string());
        let bundle_path = dir.join(BUNDLE_FILE_NAME);
        Self {
            dir,
            bundle_path,
            removed: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    /// Remove the directory and everything in it. A directory that was
    /// never created counts as removed.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        io::remove_dir_all_if_exists(&self.dir, "remove build directory")?;
        self.removed = true;
        log_status!("build", "Removed {}", self.dir.display());
        Ok(())
    }
}

impl Drop for BuildLocation {
    fn drop(&mut self) {
        if !self.removed {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// gzip'd tar of the app directory.
#[derive(Debug, Default, Clone)]
pub struct TarballBuilder;

#[async_trait]
impl BuildStage for TarballBuilder {
    async fn build(&self, app_path: &Path, build_dir: &Path, bundle_path: &Path) -> Result<()> {
        let failed = |error: String| {
            Error::build_failed(BuildFailedDetails {
                app_path: app_path.to_string_lossy().to_string(),
                bundle_path: bundle_path.to_string_lossy().to_string(),
                error,
            })
        };

        fs::create_dir(build_dir).map_err(|e| failed(e.to_string()))?;
        log_status!("build", "Archiving {}", app_path.display());

        let (done, outcome) = completion::channel::<std::result::Result<(), String>>();

        let archive_done = done.clone();
        let source = app_path.to_path_buf();
        let dest = bundle_path.to_path_buf();
        let worker = tokio::task::spawn_blocking(move || {
            archive_done.complete(write_archive(&source, &dest).map_err(|e| e.to_string()));
        });

        if let Err(join_err) = worker.await {
            done.complete(Err(format!("archive worker stopped: {}", join_err)));
        }

        match outcome.await {
            Ok(Ok(())) => {
                log_status!("build", "Wrote {}", bundle_path.display());
                Ok(())
            }
            Ok(Err(error)) => Err(failed(error)),
            Err(_) => Err(failed("archive worker exited without a result".to_string())),
        }
    }
}

fn write_archive(source: &Path, dest: &Path) -> std::io::Result<()> {
    let mut entries: Vec<fs::DirEntry> = fs::read_dir(source)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    let file = fs::File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::new(GZIP_LEVEL));
    let mut builder = Builder::new(encoder);

    for entry in entries {
        let name = entry.file_name();
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            if is_excluded(&name.to_string_lossy()) {
                continue;
            }
            builder.append_dir_all(&name, &path)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

fn is_excluded(dir_name: &str) -> bool {
    EXCLUDED_DIRS.contains(&dir_name)
}
