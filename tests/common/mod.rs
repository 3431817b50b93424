/*!
 * Common test utilities for the transkit test suite
 */

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use transkit::app_config::Config;
use transkit::project::{Project, ProjectFile};
use transkit::store::ProgressStore;


/// Route library logs to the test output; safe to call from every test
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Project with one file per `(path, sources)` pair
pub fn project_with(files: &[(&str, &[&str])]) -> Project {
    files.iter().fold(Project::new("test project", "txt"), |project, (path, sources)| {
        project.with_file(ProjectFile::new(*path, "txt").with_sources(sources.iter().copied()))
    })
}

/// Store over a single file named `a.txt`
pub fn store_with(sources: &[&str]) -> Arc<ProgressStore> {
    Arc::new(ProgressStore::new(project_with(&[("a.txt", sources)])).unwrap())
}

/// Write a project as a snapshot file inside `dir`
pub fn write_snapshot(dir: &Path, project: Project) -> Result<PathBuf> {
    let path = dir.join("progress.json");
    ProgressStore::new(project)?.save(&path)?;
    Ok(path)
}

/// Default config with small chunks and fast autosave
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pipeline.lines_limit = 2;
    config.pipeline.worker_count = Some(2);
    config.pipeline.round_limit = 3;
    config.pipeline.autosave_interval_secs = 1;
    config
}
