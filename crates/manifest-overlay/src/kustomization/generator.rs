use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::UnsupportedFields;

/// How a generator composes with an earlier generator of the same name.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Hash, Serialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Behavior {
    #[default]
    #[serde(alias = "")]
    Unspecified,
    Create,
    Merge,
    Replace,
}

impl Behavior {
    pub fn is_unspecified(self) -> bool {
        matches!(self, Self::Unspecified)
    }
}

// serde hands `skip_serializing_if` a reference
#[allow(clippy::trivially_copy_pass_by_ref)]
fn behavior_is_unspecified(behavior: &Behavior) -> bool {
    behavior.is_unspecified()
}

/// Fields shared by every generator kind.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct GeneratorArgs {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "behavior_is_unspecified")]
    pub behavior: Behavior,

    /// Single env file, the older spelling of [`GeneratorArgs::envs`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<String>,

    /// Either `path` or `key=path`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub literals: Vec<String>,

    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct ConfigMapArgs {
    #[serde(flatten)]
    pub generator_args: GeneratorArgs,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct SecretArgs {
    #[serde(flatten)]
    pub generator_args: GeneratorArgs,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
}

/// Access to the [`GeneratorArgs`] of the different generator kinds.
pub trait Generator: Clone {
    fn generator_args(&self) -> &GeneratorArgs;
    fn generator_args_mut(&mut self) -> &mut GeneratorArgs;
}

impl Generator for ConfigMapArgs {
    fn generator_args(&self) -> &GeneratorArgs {
        &self.generator_args
    }

    fn generator_args_mut(&mut self) -> &mut GeneratorArgs {
        &mut self.generator_args
    }
}

impl Generator for SecretArgs {
    fn generator_args(&self) -> &GeneratorArgs {
        &self.generator_args
    }

    fn generator_args_mut(&mut self) -> &mut GeneratorArgs {
        &mut self.generator_args
    }
}

/// Options applied to every generator of a fragment.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorOptions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_name_suffix_hash: bool,

    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}
