//! Fragments for application stacks.
//!
//! A stack application is a directory holding nothing but a fragment that points at a package
//! inside the repository cache. The fragment may already exist, for example because a parameter
//! was set through [`crate::config_map`] before, in which case the base is merged into it.

use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    kustomization::{self, Kustomization, load_kustomization},
    writer,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create stack directory {path:?}"))]
    CreateStackDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to load stack fragment"))]
    LoadStackFragment { source: kustomization::Error },

    #[snafu(display("failed to write stack fragment"))]
    WriteStackFragment { source: writer::Error },
}

/// Makes sure `stack_app_dir/kustomization.yaml` exists and lists `base_path` as a resource.
///
/// The namespace is deliberately left unset so that every package keeps its own default.
/// Returns the path of the fragment.
pub fn create_stack_app_kustomization(stack_app_dir: &Path, base_path: &str) -> Result<PathBuf> {
    if stack_app_dir.is_dir() {
        debug!(dir = %stack_app_dir.display(), "stack directory exists");
    } else {
        info!(dir = %stack_app_dir.display(), "creating stack directory");
        std::fs::create_dir_all(stack_app_dir)
            .context(CreateStackDirectorySnafu { path: stack_app_dir })?;
    }

    let mut kustomization = load_kustomization(stack_app_dir)
        .context(LoadStackFragmentSnafu)?
        .unwrap_or_default();

    kustomization.set_type_meta();
    kustomization.add_resource(base_path);

    writer::write_kustomization(stack_app_dir, &kustomization).context(WriteStackFragmentSnafu)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use tempfile::TempDir;

    use super::*;
    use crate::{config_map::set_parameter_in_config_map, kustomization::KUSTOMIZATION_FILE};

    #[test]
    fn create_fresh_stack_fragment() {
        let app_dir = TempDir::new().expect("temporary directory can be created");
        let stack_dir = app_dir.path().join("kustomize/kubeflow-apps");

        let path = create_stack_app_kustomization(&stack_dir, "../../.cache/manifests/stacks/gcp")
            .expect("stack fragment can be created");

        assert_eq!(
            std::fs::read_to_string(path).expect("fragment is readable"),
            indoc! {"
                apiVersion: kustomize.config.k8s.io/v1beta1
                kind: Kustomization
                resources:
                - ../../.cache/manifests/stacks/gcp
            "}
        );
    }

    #[test]
    fn existing_fragment_keeps_entries_and_is_idempotent() {
        let stack_dir = TempDir::new().expect("temporary directory can be created");
        set_parameter_in_config_map(stack_dir.path(), "profiles", "admin", "alice@example.com")
            .expect("parameter can be set");

        for _ in 0..2 {
            create_stack_app_kustomization(stack_dir.path(), "../../.cache/manifests/stacks/gcp")
                .expect("stack fragment can be updated");
        }

        let kustomization: Kustomization = serde_yaml::from_str(
            &std::fs::read_to_string(stack_dir.path().join(KUSTOMIZATION_FILE))
                .expect("fragment is readable"),
        )
        .expect("fragment is valid");
        assert_eq!(
            kustomization.resources,
            vec!["../../.cache/manifests/stacks/gcp"]
        );
        assert_eq!(
            kustomization.patches_strategic_merge,
            vec!["profiles-config.yaml"]
        );
    }
}
