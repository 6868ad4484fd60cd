//! Injects application parameters through a config map patch registered in a fragment.
//!
//! For an application `app` the parameters live in `app-config.yaml`, a strategic merge patch of
//! the config map `app-config`. Setting a parameter creates the directory, the fragment entry
//! and the patch as needed; repeating a call changes nothing.

use std::path::{Path, PathBuf};

use k8s_openapi::{
    api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use manifest_overlay_shared::yaml::{self, SerializeOptions};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    kustomization::{self, Kustomization, load_kustomization},
    writer,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create directory {path:?}"))]
    CreateDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to load fragment"))]
    LoadKustomization { source: kustomization::Error },

    #[snafu(display("failed to register config map patch for application {app_name:?}"))]
    RegisterPatch {
        source: writer::Error,
        app_name: String,
    },

    #[snafu(display("failed to read config map patch"))]
    ReadConfigMap { source: yaml::Error },

    #[snafu(display("failed to write config map patch"))]
    WriteConfigMap { source: yaml::Error },
}

/// Name of the patched config map of `app_name`.
pub fn config_map_name(app_name: &str) -> String {
    format!("{app_name}-config")
}

/// File name of the config map patch of `app_name`, relative to its fragment.
pub fn patch_file_name(app_name: &str) -> String {
    format!("{app_name}-config.yaml")
}

/// Sets `param_name` to `value` in the config map patch of `app_name` inside `target_dir`.
pub fn set_parameter_in_config_map(
    target_dir: &Path,
    app_name: &str,
    param_name: &str,
    value: &str,
) -> Result<()> {
    if !target_dir.is_dir() {
        info!(dir = %target_dir.display(), "creating fragment directory");
        std::fs::create_dir_all(target_dir).context(CreateDirectorySnafu { path: target_dir })?;
    }

    let patch_file = patch_file_name(app_name);

    let mut kustomization = load_kustomization(target_dir)
        .context(LoadKustomizationSnafu)?
        .unwrap_or_else(Kustomization::new);

    if kustomization.add_patch_strategic_merge(&patch_file) {
        writer::write_kustomization(target_dir, &kustomization)
            .context(RegisterPatchSnafu { app_name })?;
    } else {
        debug!(patch = %patch_file, "fragment already registers the config map patch");
    }

    let patch_path = target_dir.join(&patch_file);
    let mut config_map = yaml::read_from_file::<ConfigMap, _>(&patch_path)
        .context(ReadConfigMapSnafu)?
        .unwrap_or_else(|| ConfigMap {
            metadata: ObjectMeta {
                name: Some(config_map_name(app_name)),
                ..Default::default()
            },
            ..Default::default()
        });

    config_map
        .data
        .get_or_insert_with(Default::default)
        .insert(param_name.to_owned(), value.to_owned());

    yaml::write_to_file(&patch_path, &config_map, SerializeOptions::default())
        .context(WriteConfigMapSnafu)
}
