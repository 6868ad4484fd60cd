//! Groups JSON 6902 patches by target and writes one combined patch file per group.

use std::{
    collections::BTreeSet,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use crate::kustomization::{Kustomization, PatchJson6902, PatchTarget};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read patch file {path:?}"))]
    ReadPatch {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to write aggregated patch file {path:?}"))]
    WritePatch {
        source: std::io::Error,
        path: PathBuf,
    },
}

struct PatchGroup {
    target: PatchTarget,
    contents: String,
}

/// Replaces the JSON 6902 patches of `kustomization` with one patch per (target name, target
/// kind).
///
/// The patch paths are resolved against `component_dir`, the directory `kustomization` is
/// written to. Each group is written to `component_dir/<name>-<kind>.yaml`, concatenating the
/// input files in the order they were encountered; the first patch of a group provides the
/// target of the combined patch. Input files that don't exist are skipped.
///
/// Groups are emitted in the order their first patch was encountered.
pub fn aggregate_json_patches(
    component_dir: &Path,
    kustomization: &mut Kustomization,
) -> Result<()> {
    if kustomization.patches_json6902.is_empty() {
        return Ok(());
    }

    let mut groups: IndexMap<(String, String), PatchGroup> = IndexMap::new();

    // Every input is read before any output is written, an output may share its path with an
    // input.
    for patch in &kustomization.patches_json6902 {
        let key = (patch.target.name.clone(), patch.target.kind.clone());
        let group = groups.entry(key).or_insert_with(|| PatchGroup {
            target: patch.target.clone(),
            contents: String::new(),
        });

        let input = component_dir.join(&patch.path);
        match std::fs::read_to_string(&input) {
            Ok(data) => {
                group.contents.push_str(&data);
                if !data.is_empty() && !data.ends_with('\n') {
                    group.contents.push('\n');
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(patch = %input.display(), "patch file does not exist, skipping it");
            }
            Err(err) => return Err(err).context(ReadPatchSnafu { path: input }),
        }
    }

    let mut aggregated = Vec::with_capacity(groups.len());
    let mut taken = BTreeSet::new();
    for ((name, kind), group) in groups {
        let file_name = unique_file_name(&mut taken, &name, &kind);
        let path = component_dir.join(&file_name);

        debug!(patch = %path.display(), %name, %kind, "writing aggregated patch");
        std::fs::write(&path, group.contents).context(WritePatchSnafu { path })?;

        aggregated.push(PatchJson6902 {
            target: group.target,
            path: file_name,
            ..Default::default()
        });
    }

    kustomization.patches_json6902 = aggregated;
    Ok(())
}

/// Returns `<name>-<kind>.yaml`, or `<name>-<kind>-<n>.yaml` if an earlier group already took
/// that name. Names and kinds may contain `-`, so different targets can share a plain name.
fn unique_file_name(taken: &mut BTreeSet<String>, name: &str, kind: &str) -> String {
    let stem = format!("{name}-{kind}");
    let mut file_name = format!("{stem}.yaml");

    let mut n = 2;
    while !taken.insert(file_name.clone()) {
        warn!(%file_name, %name, %kind, "aggregated patch file name is taken, adding a suffix");
        file_name = format!("{stem}-{n}.yaml");
        n += 1;
    }

    file_name
}
