//! The top-level deployment configuration: which applications to compose, with which overlays
//! and parameters.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use manifest_overlay_shared::yaml;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{info, warn};

use crate::config_map;

/// Name of the application that collects most other applications into one stack.
pub const APPS_STACK: &str = "kubeflow-apps";

/// Directory below [`DeploymentSpec::app_dir`] holding one fragment directory per stack.
pub const KUSTOMIZE_DIR: &str = "kustomize";

/// Stack directory of applications that don't live in a directory of their own name.
const APP_TO_STACK: &[(&str, &str)] = &[
    ("centraldashboard", APPS_STACK),
    ("cloud-endpoints", "cloud-endpoints"),
    ("default-install", APPS_STACK),
    ("istio-stack", "istio-stack"),
    ("iap-ingress", "iap-ingress"),
    ("jupyter-web-app", APPS_STACK),
    ("metacontroller", "metacontroller"),
    ("profiles", APPS_STACK),
    ("dex", "dex"),
    ("spartakus", "spartakus"),
    ("aws-alb-ingress-controller", APPS_STACK),
    ("istio-ingress", "istio-ingress"),
];

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read deployment configuration"))]
    ReadConfig { source: yaml::Error },

    #[snafu(display("deployment configuration {path:?} does not exist"))]
    MissingConfig { path: PathBuf },

    #[snafu(display(
        "cannot set parameter of application {app_name:?}: the configuration uses stacks but has no appDir"
    ))]
    MissingAppDir { app_name: String },

    #[snafu(display("failed to set parameter {param_name:?} of application {app_name:?}"))]
    SetConfigMapParameter {
        source: config_map::Error,
        app_name: String,
        param_name: String,
    },
}

/// A `name`/`value` pair.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct NameValue {
    pub name: String,

    #[serde(default)]
    pub value: String,
}

impl NameValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Turns a parameter list into a lookup map. Later entries override earlier ones.
pub fn parameter_map(parameters: &[NameValue]) -> BTreeMap<&str, &str> {
    parameters
        .iter()
        .map(|nv| (nv.name.as_str(), nv.value.as_str()))
        .collect()
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub name: String,

    /// Applied in this order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<NameValue>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct ConfigMetadata {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Directory the stacks are laid out in, see [`KUSTOMIZE_DIR`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,

    #[serde(default)]
    pub applications: Vec<Application>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: DeploymentSpec,
}

impl DeploymentConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        yaml::read_from_file(path)
            .context(ReadConfigSnafu)?
            .context(MissingConfigSnafu { path })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn project(&self) -> &str {
        &self.spec.project
    }

    pub fn application(&self, name: &str) -> Option<&Application> {
        self.spec.applications.iter().find(|app| app.name == name)
    }

    pub fn get_application_parameter(&self, app_name: &str, param_name: &str) -> Option<&str> {
        self.application(app_name)?
            .parameters
            .iter()
            .find(|p| p.name == param_name)
            .map(|p| p.value.as_str())
    }

    /// Whether the applications are collected into stacks, which is the case once one of them is
    /// the [`APPS_STACK`].
    pub fn uses_stacks(&self) -> bool {
        self.application(APPS_STACK).is_some()
    }

    /// Directory below `appDir/kustomize` that holds the fragment of `app_name`.
    ///
    /// Applications without a known stack are assumed to live in a directory of their own name.
    pub fn stack_dir(app_name: &str) -> &str {
        APP_TO_STACK
            .iter()
            .find(|(app, _)| *app == app_name)
            .map_or_else(
                || {
                    warn!(
                        application = app_name,
                        "no stack directory known, using the application name"
                    );
                    app_name
                },
                |(_, stack)| *stack,
            )
    }

    /// Sets a parameter of the application named `app_name`.
    ///
    /// With stacks the parameter is written to the config map patch of the application inside its
    /// stack directory, see [`config_map::set_parameter_in_config_map`]. Otherwise the parameter
    /// list of the application in this configuration is updated, see
    /// [`DeploymentConfig::set_application_parameter_in_spec`].
    pub fn set_application_parameter(
        &mut self,
        app_name: &str,
        param_name: &str,
        value: &str,
    ) -> Result<()> {
        if !self.uses_stacks() {
            self.set_application_parameter_in_spec(app_name, param_name, value);
            return Ok(());
        }

        let app_dir = self
            .spec
            .app_dir
            .as_deref()
            .context(MissingAppDirSnafu { app_name })?;
        ensure!(!app_dir.as_os_str().is_empty(), MissingAppDirSnafu { app_name });

        let target_dir = app_dir.join(KUSTOMIZE_DIR).join(Self::stack_dir(app_name));
        info!(
            application = app_name,
            parameter = param_name,
            dir = %target_dir.display(),
            "setting parameter in stack config map"
        );

        config_map::set_parameter_in_config_map(&target_dir, app_name, param_name, value).context(
            SetConfigMapParameterSnafu {
                app_name,
                param_name,
            },
        )
    }

    /// Sets a parameter in the parameter list of the application named `app_name`, adding it if
    /// needed.
    ///
    /// Returns `false` (and changes nothing) if there is no such application.
    pub fn set_application_parameter_in_spec(
        &mut self,
        app_name: &str,
        param_name: &str,
        value: &str,
    ) -> bool {
        let Some(app) = self
            .spec
            .applications
            .iter_mut()
            .find(|app| app.name == app_name)
        else {
            warn!(application = app_name, "application not found");
            return false;
        };

        match app.parameters.iter_mut().find(|p| p.name == param_name) {
            Some(parameter) => value.clone_into(&mut parameter.value),
            None => app.parameters.push(NameValue::new(param_name, value)),
        }

        true
    }
}
