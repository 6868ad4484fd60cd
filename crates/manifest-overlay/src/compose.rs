//! Composes the fragment of a component: locate, rewrite parameters, fold, aggregate, write.

use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument};

use crate::{
    aggregate,
    config::{DeploymentConfig, NameValue, parameter_map},
    kustomization::Kustomization,
    ledger::DedupLedger,
    locator::{self, Layer, Located},
    merge, params, writer,
};

const NAMESPACE_PARAMETER: &str = "namespace";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to locate the fragments of component {component_dir:?}"))]
    Locate {
        source: locator::Error,
        component_dir: PathBuf,
    },

    #[snafu(display("failed to rewrite the parameters of component {component_dir:?}"))]
    RewriteParams {
        source: params::Error,
        component_dir: PathBuf,
    },

    #[snafu(display("failed to merge fragment in {layer_dir:?}"))]
    MergeLayer {
        source: merge::Error,
        layer_dir: PathBuf,
    },

    #[snafu(display("failed to aggregate the JSON patches of component {component_dir:?}"))]
    AggregatePatches {
        source: aggregate::Error,
        component_dir: PathBuf,
    },

    #[snafu(display("failed to write the fragment of component {component_dir:?}"))]
    WriteFragment {
        source: writer::Error,
        component_dir: PathBuf,
    },

    #[snafu(display("failed to generate application {application:?}"))]
    GenerateApplication {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        application: String,
    },
}

/// Result of [`generate_kustomization_file`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The composed fragment was written to this path.
    Composed(PathBuf),

    /// The component has no base, its own fragment was left alone.
    Final,
}

/// Folds `base` and then every layer of `overlays`, in order, into a fresh fragment rooted at
/// `component_dir`.
///
/// A non-empty `namespace` parameter replaces the folded namespace. Otherwise an empty namespace
/// is taken from `config`.
pub fn merge_kustomizations(
    config: &DeploymentConfig,
    component_dir: &Path,
    base: &Layer,
    overlays: &[Layer],
    parameters: &[NameValue],
) -> Result<Kustomization> {
    let mut composed = Kustomization::new();
    let mut ledger = DedupLedger::new();

    for layer in std::iter::once(base).chain(overlays) {
        debug!(layer = %layer.dir.display(), "merging layer");
        merge::merge_into(
            &mut composed,
            component_dir,
            &layer.kustomization,
            &layer.dir,
            &mut ledger,
        )
        .context(MergeLayerSnafu {
            layer_dir: &layer.dir,
        })?;
    }

    match parameter_map(parameters).get(NAMESPACE_PARAMETER) {
        Some(namespace) if !namespace.is_empty() => (*namespace).clone_into(&mut composed.namespace),
        _ if composed.namespace.is_empty() => config.namespace().clone_into(&mut composed.namespace),
        _ => {}
    }

    Ok(composed)
}

/// Composes `component_dir/kustomization.yaml` from its base and the requested `overlays`.
///
/// Parameter files of the base and of every located overlay are rewritten first. A component
/// without a base is left untouched.
#[instrument(skip(config, component_dir, parameters), fields(component = %component_dir.display()))]
pub fn generate_kustomization_file(
    config: &DeploymentConfig,
    component_dir: &Path,
    overlays: &[String],
    parameters: &[NameValue],
) -> Result<Outcome> {
    let (base, overlays) = match locator::locate(component_dir, overlays)
        .context(LocateSnafu { component_dir })?
    {
        Located::Final(_) => {
            info!("component has no base, keeping its fragment");
            return Ok(Outcome::Final);
        }
        Located::Layered { base, overlays } => (base, overlays),
    };

    let overrides = parameter_map(parameters);
    for layer in std::iter::once(&base).chain(&overlays) {
        params::rewrite_param_file(&layer.dir, &overrides, config)
            .context(RewriteParamsSnafu { component_dir })?;
    }

    let mut composed = merge_kustomizations(config, component_dir, &base, &overlays, parameters)?;
    aggregate::aggregate_json_patches(component_dir, &mut composed)
        .context(AggregatePatchesSnafu { component_dir })?;

    let path = writer::write_kustomization(component_dir, &composed)
        .context(WriteFragmentSnafu { component_dir })?;
    info!(path = %path.display(), "wrote composed fragment");

    Ok(Outcome::Composed(path))
}

/// Composes every application of `config`, found in `root/<name>`, one after the other.
///
/// Stops at the first application that fails.
pub fn generate_applications(config: &DeploymentConfig, root: &Path) -> Result<Vec<Outcome>> {
    config
        .spec
        .applications
        .iter()
        .map(|app| {
            generate_kustomization_file(config, &root.join(&app.name), &app.overlays, &app.parameters)
                .context(GenerateApplicationSnafu {
                    application: &app.name,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::config::ConfigMetadata;

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            metadata: ConfigMetadata {
                name: "my-kubeflow".to_owned(),
                namespace: "kubeflow".to_owned(),
            },
            ..Default::default()
        }
    }

    fn layer(dir: &str, yaml: &str) -> Layer {
        Layer {
            dir: Path::new("/component").join(dir),
            kustomization: serde_yaml::from_str(yaml).expect("test YAML is valid"),
        }
    }

    #[rstest]
    #[case::filled_from_config("bases: []", &[], "kubeflow")]
    #[case::folded_value_kept("bases: []\nnamespace: istio-system", &[], "istio-system")]
    #[case::parameter_overrides("bases: []\nnamespace: istio-system", &[("namespace", "custom")], "custom")]
    #[case::empty_parameter_ignored("bases: []", &[("namespace", "")], "kubeflow")]
    fn namespace_resolution(
        #[case] overlay: &str,
        #[case] parameters: &[(&str, &str)],
        #[case] expected: &str,
    ) {
        let parameters: Vec<_> = parameters
            .iter()
            .map(|(name, value)| NameValue::new(*name, *value))
            .collect();

        let composed = merge_kustomizations(
            &config(),
            Path::new("/component"),
            &layer("base", "resources: [a.yaml]"),
            &[layer("overlays/istio", overlay)],
            &parameters,
        )
        .expect("layers can be merged");

        assert_eq!(composed.namespace, expected);
    }

    #[test]
    fn base_is_merged_before_overlays() {
        let composed = merge_kustomizations(
            &config(),
            Path::new("/component"),
            &layer("base", "resources: [a.yaml]"),
            &[
                layer("overlays/application", "bases: [../../base]\nresources: [app.yaml]"),
                layer("overlays/istio", "bases: [../../base]\nresources: [vs.yaml]"),
            ],
            &[],
        )
        .expect("layers can be merged");

        assert_eq!(composed.bases, Some(vec!["base".to_owned()]));
        assert_eq!(
            composed.resources,
            vec!["overlays/application/app.yaml", "overlays/istio/vs.yaml"]
        );
    }

    #[test]
    fn failing_application_is_named() {
        let root = tempfile::tempdir().expect("temporary directory can be created");
        let mut config = config();
        config.spec.applications.push(crate::config::Application {
            name: "missing-app".to_owned(),
            ..Default::default()
        });

        let err = generate_applications(&config, root.path()).expect_err("application is missing");

        assert!(
            matches!(err, Error::GenerateApplication { ref application, .. } if application == "missing-app")
        );
    }
}
