//! The typed model of a configuration fragment (`kustomization.yaml`).
//!
//! Every field the merge engine knows how to fold is modelled explicitly. Everything else ends up
//! in [`Kustomization::unsupported`], which the engine refuses to merge instead of silently
//! dropping it.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use manifest_overlay_shared::yaml;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

mod generator;

pub use generator::{Behavior, ConfigMapArgs, Generator, GeneratorArgs, GeneratorOptions, SecretArgs};

/// File name of a fragment inside its directory.
pub const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

pub const KUSTOMIZATION_API_VERSION: &str = "kustomize.config.k8s.io/v1beta1";
pub const KUSTOMIZATION_KIND: &str = "Kustomization";

/// Keys of a fragment object that are not modelled and therefore have no merge policy.
pub type UnsupportedFields = BTreeMap<String, serde_yaml::Value>;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to load fragment from {dir:?}"))]
    LoadKustomization { source: yaml::Error, dir: PathBuf },
}

/// A directory-scoped configuration fragment.
///
/// Field declaration order is the serialization order, maps are sorted. Both together make the
/// written file stable for identical inputs.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name_prefix: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name_suffix: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub common_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub common_annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches_strategic_merge: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches_json6902: Vec<PatchJson6902>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<Var>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crds: Vec<String>,

    /// [`None`] and an empty list are different things: a fragment without a `bases` key is
    /// folded into its parent as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bases: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_map_generator: Vec<ConfigMapArgs>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_generator: Vec<SecretArgs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_options: Option<GeneratorOptions>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<String>,

    /// Keys without a merge policy.
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

impl Kustomization {
    /// Creates an empty fragment carrying the `apiVersion` and `kind` header.
    pub fn new() -> Self {
        Self {
            api_version: Some(KUSTOMIZATION_API_VERSION.to_owned()),
            kind: Some(KUSTOMIZATION_KIND.to_owned()),
            ..Default::default()
        }
    }

    /// Sets the `apiVersion` and `kind` header, replacing whatever was there before.
    pub fn set_type_meta(&mut self) {
        self.api_version = Some(KUSTOMIZATION_API_VERSION.to_owned());
        self.kind = Some(KUSTOMIZATION_KIND.to_owned());
    }

    /// Registers `patch_file` as a strategic merge patch. Returns `false` if it already was.
    pub fn add_patch_strategic_merge(&mut self, patch_file: &str) -> bool {
        if self.patches_strategic_merge.iter().any(|p| p == patch_file) {
            return false;
        }

        self.patches_strategic_merge.push(patch_file.to_owned());
        true
    }

    /// Registers `resource` as a resource. Returns `false` if it already was.
    pub fn add_resource(&mut self, resource: &str) -> bool {
        if self.resources.iter().any(|r| r == resource) {
            return false;
        }

        self.resources.push(resource.to_owned());
        true
    }

    /// Locations of all keys without a merge policy, for example `images[1].digestRef`.
    ///
    /// Top-level keys come first, nested ones follow in field order.
    pub fn unsupported_fields(&self) -> Vec<String> {
        let mut scopes: Vec<(String, &UnsupportedFields)> = vec![(String::new(), &self.unsupported)];

        if let Some(options) = &self.generator_options {
            scopes.push(("generatorOptions".to_owned(), &options.unsupported));
        }
        for (i, patch) in self.patches_json6902.iter().enumerate() {
            scopes.push((format!("patchesJson6902[{i}]"), &patch.unsupported));
            scopes.push((format!("patchesJson6902[{i}].target"), &patch.target.unsupported));
        }
        for (i, image) in self.images.iter().enumerate() {
            scopes.push((format!("images[{i}]"), &image.unsupported));
        }
        for (i, var) in self.vars.iter().enumerate() {
            scopes.push((format!("vars[{i}]"), &var.unsupported));
            scopes.push((format!("vars[{i}].objref"), &var.objref.unsupported));
            if let Some(fieldref) = &var.fieldref {
                scopes.push((format!("vars[{i}].fieldref"), &fieldref.unsupported));
            }
        }
        for (i, generator) in self.config_map_generator.iter().enumerate() {
            scopes.push((
                format!("configMapGenerator[{i}]"),
                &generator.generator_args.unsupported,
            ));
        }
        for (i, generator) in self.secret_generator.iter().enumerate() {
            scopes.push((
                format!("secretGenerator[{i}]"),
                &generator.generator_args.unsupported,
            ));
        }

        scopes
            .into_iter()
            .flat_map(|(scope, unsupported)| {
                unsupported.keys().map(move |key| {
                    if scope.is_empty() {
                        key.clone()
                    } else {
                        format!("{scope}.{key}")
                    }
                })
            })
            .collect()
    }
}

/// Image name/tag override.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

/// A named value captured from a field of another object.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct Var {
    pub name: String,

    pub objref: ObjectRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldref: Option<FieldRef>,

    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub kind: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct FieldRef {
    pub fieldpath: String,

    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

/// A JSON 6902 patch file applied to exactly one target resource.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct PatchJson6902 {
    pub target: PatchTarget,
    pub path: String,

    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct PatchTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub kind: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

/// Loads `dir/kustomization.yaml`, returning [`None`] if the directory holds no fragment.
pub fn load_kustomization(dir: &Path) -> Result<Option<Kustomization>> {
    yaml::read_from_file(dir.join(KUSTOMIZATION_FILE)).context(LoadKustomizationSnafu { dir })
}
