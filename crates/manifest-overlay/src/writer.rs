//! Persists a composed fragment.

use std::path::{Path, PathBuf};

use manifest_overlay_shared::yaml::{self, SerializeOptions};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::kustomization::{KUSTOMIZATION_FILE, Kustomization};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to write fragment to {path:?}"))]
    WriteKustomization { source: yaml::Error, path: PathBuf },
}

/// Overwrites `dir/kustomization.yaml` with `kustomization` and returns the written path.
///
/// The output is stable: fields are written in declaration order and maps sorted by key.
pub fn write_kustomization(dir: &Path, kustomization: &Kustomization) -> Result<PathBuf, Error> {
    let path = dir.join(KUSTOMIZATION_FILE);

    debug!(path = %path.display(), "writing fragment");
    yaml::write_to_file(&path, kustomization, SerializeOptions::default())
        .context(WriteKustomizationSnafu { path: &path })?;

    Ok(path)
}
