//! Folds one child fragment into an accumulating parent fragment.
//!
//! Every [`FieldCategory`] is handled by exactly one policy function, registered in [`POLICIES`].
//! The policies never touch the filesystem, they only rewrite the paths they see so that the
//! result can be loaded from the component root.
//!
//! | Category | Policy |
//! |---|---|
//! | `namePrefix`, `nameSuffix`, `namespace`, `generatorOptions` | first non-empty value wins |
//! | `commonLabels`, `commonAnnotations` | last value per key wins |
//! | `bases`, `resources`, `configurations`, `patchesStrategicMerge` | once per rewritten path |
//! | `images`, `vars` (by name), `crds` | first entry per identity wins, duplicates are logged |
//! | `configMapGenerator`, `secretGenerator` | `create` once per name, everything else appended |
//! | `patchesJson6902` | always appended, grouped later by [`crate::aggregate`] |

use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use crate::{
    kustomization::{Behavior, Generator, KUSTOMIZATION_FILE, Kustomization, PatchJson6902},
    ledger::{DedupLedger, FieldCategory},
};

mod path;

pub use path::rebase_path;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to rewrite {category} entry {value:?} of {fragment_file:?}"))]
    RebasePath {
        source: path::Error,
        category: FieldCategory,
        value: String,
        fragment_file: PathBuf,
    },

    #[snafu(display(
        "field {field:?} of {fragment_file:?} has no merge policy, refusing to drop it"
    ))]
    UnsupportedField { field: String, fragment_file: PathBuf },
}

type Policy = fn(&mut MergeContext<'_>, &Kustomization) -> Result<()>;

/// Merge order of the fields of a child fragment.
const POLICIES: &[(FieldCategory, Policy)] = &[
    (FieldCategory::Bases, merge_bases),
    (FieldCategory::NamePrefix, merge_name_prefix),
    (FieldCategory::NameSuffix, merge_name_suffix),
    (FieldCategory::Namespace, merge_namespace),
    (FieldCategory::CommonLabels, merge_common_labels),
    (FieldCategory::CommonAnnotations, merge_common_annotations),
    (FieldCategory::GeneratorOptions, merge_generator_options),
    (FieldCategory::Resources, merge_resources),
    (FieldCategory::Images, merge_images),
    (FieldCategory::Crds, merge_crds),
    (FieldCategory::ConfigMapGenerator, merge_config_map_generator),
    (FieldCategory::SecretGenerator, merge_secret_generator),
    (FieldCategory::Vars, merge_vars),
    (FieldCategory::PatchesStrategicMerge, merge_patches_strategic_merge),
    (FieldCategory::PatchesJson6902, merge_patches_json6902),
    (FieldCategory::Configurations, merge_configurations),
];

struct MergeContext<'a> {
    parent: &'a mut Kustomization,
    ledger: &'a mut DedupLedger,
    root: &'a Path,
    child_dir: &'a Path,
    fragment_file: PathBuf,
}

impl MergeContext<'_> {
    fn rebase(&self, category: FieldCategory, value: &str) -> Result<String> {
        rebase_path(self.root, self.child_dir, value).with_context(|_| RebasePathSnafu {
            category,
            value,
            fragment_file: &self.fragment_file,
        })
    }

    /// Rewrites every path of `values` and returns the ones not seen before, in input order.
    fn unseen_paths(&mut self, category: FieldCategory, values: &[String]) -> Result<Vec<String>> {
        let mut accepted = Vec::new();

        for value in values {
            let rebased = self.rebase(category, value)?;
            if self.ledger.mark(category, rebased.as_str()) {
                accepted.push(rebased);
            }
        }

        Ok(accepted)
    }

    /// Returns the entries whose identity was not seen before. Later duplicates are dropped with
    /// a warning: the first entry for an identity is the one that survives.
    fn first_per_identity<T: Clone>(
        &mut self,
        category: FieldCategory,
        entries: &[T],
        identity: impl Fn(&T) -> &str,
    ) -> Vec<T> {
        let mut accepted = Vec::new();

        for entry in entries {
            let key = identity(entry);
            if self.ledger.mark(category, key) {
                accepted.push(entry.clone());
            } else {
                warn!(
                    %category,
                    identity = key,
                    fragment = %self.fragment_file.display(),
                    "ignoring duplicate entry"
                );
            }
        }

        accepted
    }

    /// Applies the behavior of each generator and rewrites its file sources.
    fn generators<G: Generator>(&mut self, category: FieldCategory, entries: &[G]) -> Result<Vec<G>> {
        let mut accepted = Vec::new();

        for entry in entries {
            let name = entry.generator_args().name.clone();
            let first_sighting = self.ledger.mark(category, name.as_str());

            match entry.generator_args().behavior {
                Behavior::Create if !first_sighting => {
                    debug!(%category, %name, "generator with create behavior already defined");
                    continue;
                }
                Behavior::Create | Behavior::Merge | Behavior::Replace | Behavior::Unspecified => {}
            }

            let mut entry = entry.clone();
            self.rebase_generator_sources(category, &mut entry)?;
            accepted.push(entry);
        }

        Ok(accepted)
    }

    fn rebase_generator_sources<G: Generator>(
        &self,
        category: FieldCategory,
        generator: &mut G,
    ) -> Result<()> {
        let args = generator.generator_args_mut();

        args.env = args
            .env
            .as_deref()
            .map(|env| self.rebase(category, env))
            .transpose()?;

        args.envs = args
            .envs
            .iter()
            .map(|env| self.rebase(category, env))
            .collect::<Result<_>>()?;

        args.files = args
            .files
            .iter()
            .map(|file| match file.split_once('=') {
                Some((key, path)) => Ok(format!("{key}={}", self.rebase(category, path)?)),
                None => self.rebase(category, file),
            })
            .collect::<Result<_>>()?;

        Ok(())
    }
}

/// Folds `child`, read from `child_dir`, into `parent`.
///
/// All paths of `child` are rewritten to be relative to `root`, the directory `parent` will
/// eventually be written to. `ledger` must be shared by all children folded into the same
/// `parent` and by nothing else.
///
/// A child without a `bases` key is consumed as a whole: its own directory becomes a base of the
/// parent and none of its other fields are folded.
///
/// On error `parent` may be partially updated and should be discarded.
pub fn merge_into(
    parent: &mut Kustomization,
    root: &Path,
    child: &Kustomization,
    child_dir: &Path,
    ledger: &mut DedupLedger,
) -> Result<()> {
    let fragment_file = child_dir.join(KUSTOMIZATION_FILE);

    if let Some(field) = child.unsupported_fields().into_iter().next() {
        return UnsupportedFieldSnafu {
            field,
            fragment_file,
        }
        .fail();
    }

    let mut context = MergeContext {
        parent,
        ledger,
        root,
        child_dir,
        fragment_file,
    };

    if child.bases.is_none() {
        let base = context.rebase(FieldCategory::Bases, ".")?;
        debug!(%base, "fragment has no bases, adding its directory as a base");

        if context.ledger.mark(FieldCategory::Bases, base.as_str()) {
            context.parent.bases.get_or_insert_with(Vec::new).push(base);
        }
        return Ok(());
    }

    for (category, policy) in POLICIES {
        debug!(%category, fragment = %context.fragment_file.display(), "folding field");
        policy(&mut context, child)?;
    }

    Ok(())
}

fn merge_bases(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    let category = FieldCategory::Bases;

    for value in child.bases.iter().flatten() {
        let base = context.rebase(category, value)?;

        if context.ledger.mark(category, base.as_str()) {
            context.parent.bases.get_or_insert_with(Vec::new).push(base);
        } else {
            // The child builds on a base we already have, so it must never be added as an
            // implicit base itself.
            let own_dir = context.rebase(category, ".")?;
            context.ledger.mark(category, own_dir);
        }
    }

    Ok(())
}

fn first_non_empty(parent: &mut String, child: &str) {
    if parent.is_empty() && !child.is_empty() {
        *parent = child.to_owned();
    }
}

fn merge_name_prefix(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    first_non_empty(&mut context.parent.name_prefix, &child.name_prefix);
    Ok(())
}

fn merge_name_suffix(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    first_non_empty(&mut context.parent.name_suffix, &child.name_suffix);
    Ok(())
}

fn merge_namespace(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    first_non_empty(&mut context.parent.namespace, &child.namespace);
    Ok(())
}

fn merge_common_labels(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    for (key, value) in &child.common_labels {
        context
            .parent
            .common_labels
            .insert(key.clone(), value.clone());
        context.ledger.mark(FieldCategory::CommonLabels, key.as_str());
    }
    Ok(())
}

fn merge_common_annotations(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    for (key, value) in &child.common_annotations {
        context
            .parent
            .common_annotations
            .insert(key.clone(), value.clone());
        context
            .ledger
            .mark(FieldCategory::CommonAnnotations, key.as_str());
    }
    Ok(())
}

fn merge_generator_options(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    if context.parent.generator_options.is_none() {
        context
            .parent
            .generator_options
            .clone_from(&child.generator_options);
    }
    Ok(())
}

fn merge_resources(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    let accepted = context.unseen_paths(FieldCategory::Resources, &child.resources)?;
    context.parent.resources.extend(accepted);
    Ok(())
}

fn merge_configurations(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    let accepted = context.unseen_paths(FieldCategory::Configurations, &child.configurations)?;
    context.parent.configurations.extend(accepted);
    Ok(())
}

fn merge_patches_strategic_merge(
    context: &mut MergeContext<'_>,
    child: &Kustomization,
) -> Result<()> {
    let accepted = context.unseen_paths(
        FieldCategory::PatchesStrategicMerge,
        &child.patches_strategic_merge,
    )?;
    context.parent.patches_strategic_merge.extend(accepted);
    Ok(())
}

fn merge_images(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    let accepted = context.first_per_identity(FieldCategory::Images, &child.images, |image| {
        image.name.as_str()
    });
    context.parent.images.extend(accepted);
    Ok(())
}

fn merge_crds(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    let accepted = context.first_per_identity(FieldCategory::Crds, &child.crds, String::as_str);
    context.parent.crds.extend(accepted);
    Ok(())
}

fn merge_vars(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    let accepted =
        context.first_per_identity(FieldCategory::Vars, &child.vars, |var| var.name.as_str());
    context.parent.vars.extend(accepted);
    Ok(())
}

fn merge_config_map_generator(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    let accepted =
        context.generators(FieldCategory::ConfigMapGenerator, &child.config_map_generator)?;
    context.parent.config_map_generator.extend(accepted);
    Ok(())
}

fn merge_secret_generator(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    let accepted = context.generators(FieldCategory::SecretGenerator, &child.secret_generator)?;
    context.parent.secret_generator.extend(accepted);
    Ok(())
}

fn merge_patches_json6902(context: &mut MergeContext<'_>, child: &Kustomization) -> Result<()> {
    for patch in &child.patches_json6902 {
        let path = context.rebase(FieldCategory::PatchesJson6902, &patch.path)?;
        context.parent.patches_json6902.push(PatchJson6902 {
            path,
            ..patch.clone()
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::kustomization::{ConfigMapArgs, GeneratorArgs, Image};

    const ROOT: &str = "/manifests/pytorch-operator";

    fn fragment(yaml: &str) -> Kustomization {
        serde_yaml::from_str(yaml).expect("test YAML is valid")
    }

    fn dir(relative: &str) -> PathBuf {
        Path::new(ROOT).join(relative)
    }

    /// Merges `children` (directory relative to [`ROOT`], fragment) into a fresh parent.
    fn merge_all(children: &[(&str, &Kustomization)]) -> Result<Kustomization> {
        let mut parent = Kustomization::new();
        let mut ledger = DedupLedger::new();

        for (child_dir, child) in children {
            merge_into(&mut parent, Path::new(ROOT), child, &dir(child_dir), &mut ledger)?;
        }

        Ok(parent)
    }

    fn config_map(name: &str, behavior: Behavior) -> ConfigMapArgs {
        ConfigMapArgs {
            generator_args: GeneratorArgs {
                name: name.to_owned(),
                behavior,
                ..Default::default()
            },
        }
    }

    #[test]
    fn base_without_bases_becomes_implicit_base() {
        let base = fragment(indoc! {"
            resources:
            - deployment.yaml
            - service.yaml
            namePrefix: ignored-
        "});

        let merged = merge_all(&[("base", &base)]).expect("merge succeeds");

        assert_eq!(merged.bases, Some(vec!["base".to_owned()]));
        assert!(merged.resources.is_empty());
        assert!(merged.name_prefix.is_empty());
    }

    #[test]
    fn overlay_paths_are_rebased_onto_root() {
        let base = fragment("resources: [deployment.yaml]");
        let overlay = fragment(indoc! {"
            bases:
            - ../../base
            resources:
            - foo.yaml
            configurations:
            - params.yaml
            patchesStrategicMerge:
            - ./patches/deployment.yaml
        "});

        let merged = merge_all(&[("base", &base), ("overlays/prod", &overlay)])
            .expect("merge succeeds");

        assert_eq!(merged.bases, Some(vec!["base".to_owned()]));
        assert_eq!(merged.resources, vec!["overlays/prod/foo.yaml"]);
        assert_eq!(merged.configurations, vec!["overlays/prod/params.yaml"]);
        assert_eq!(
            merged.patches_strategic_merge,
            vec!["overlays/prod/patches/deployment.yaml"]
        );
    }

    #[test]
    fn paths_are_appended_once() {
        let first = fragment(indoc! {"
            bases: [../../base]
            resources: [../shared/rbac.yaml, a.yaml]
        "});
        let second = fragment(indoc! {"
            bases: [../../base]
            resources: [../shared/rbac.yaml]
        "});

        let merged = merge_all(&[("overlays/one", &first), ("overlays/two", &second)])
            .expect("merge succeeds");

        assert_eq!(
            merged.resources,
            vec!["overlays/shared/rbac.yaml", "overlays/one/a.yaml"]
        );
        assert_eq!(merged.bases, Some(vec!["base".to_owned()]));
    }

    #[test]
    fn overlay_on_known_base_is_never_added_implicitly() {
        let overlay = fragment("bases: [../../base]");
        let mut parent = Kustomization::new();
        let mut ledger = DedupLedger::new();
        ledger.mark(FieldCategory::Bases, "base");

        merge_into(
            &mut parent,
            Path::new(ROOT),
            &overlay,
            &dir("overlays/application"),
            &mut ledger,
        )
        .expect("merge succeeds");

        assert!(ledger.contains(FieldCategory::Bases, "overlays/application"));
        assert_eq!(parent.bases, None);
    }

    #[test]
    fn images_first_entry_wins() {
        let first = fragment(indoc! {"
            bases: []
            images:
            - name: pytorch-operator
              newTag: v1
        "});
        let second = fragment(indoc! {"
            bases: []
            images:
            - name: pytorch-operator
              newTag: v2
            - name: sidecar
              newTag: latest
        "});

        let merged = merge_all(&[("overlays/a", &first), ("overlays/b", &second)])
            .expect("merge succeeds");

        assert_eq!(
            merged.images,
            vec![
                Image {
                    name: "pytorch-operator".to_owned(),
                    new_tag: Some("v1".to_owned()),
                    ..Default::default()
                },
                Image {
                    name: "sidecar".to_owned(),
                    new_tag: Some("latest".to_owned()),
                    ..Default::default()
                },
            ]
        );
    }

    #[test]
    fn crds_and_vars_are_deduplicated() {
        let first = fragment(indoc! {"
            bases: []
            crds: [crd.yaml]
            vars:
            - name: namespace
              objref: {kind: Service, name: svc, apiVersion: v1}
        "});
        let second = fragment(indoc! {"
            bases: []
            crds: [crd.yaml, other-crd.yaml]
            vars:
            - name: namespace
              objref: {kind: Deployment, name: web, apiVersion: apps/v1}
        "});

        let merged = merge_all(&[("overlays/a", &first), ("overlays/b", &second)])
            .expect("merge succeeds");

        assert_eq!(merged.crds, vec!["crd.yaml", "other-crd.yaml"]);
        assert_eq!(merged.vars.len(), 1);
        assert_eq!(merged.vars[0].objref.kind, "Service");
    }

    #[test]
    fn common_maps_last_value_wins() {
        let base = fragment(indoc! {"
            bases: []
            commonLabels:
              env: dev
            commonAnnotations:
              owner: platform
        "});
        let overlay = fragment(indoc! {"
            bases: []
            commonLabels:
              env: staging
              team: ml
        "});

        let merged =
            merge_all(&[("base", &base), ("overlays/staging", &overlay)]).expect("merge succeeds");

        assert_eq!(
            merged.common_labels,
            BTreeMap::from([
                ("env".to_owned(), "staging".to_owned()),
                ("team".to_owned(), "ml".to_owned()),
            ])
        );
        assert_eq!(merged.common_annotations["owner"], "platform");
    }

    #[test]
    fn singletons_first_non_empty_wins() {
        let first = fragment("{bases: [], namespace: kubeflow}");
        let second = fragment(indoc! {"
            bases: []
            namePrefix: kf-
            nameSuffix: -v1
            namespace: other
            generatorOptions:
              disableNameSuffixHash: true
        "});
        let third = fragment(indoc! {"
            bases: []
            namePrefix: late-
            generatorOptions:
              labels:
                ignored: 'true'
        "});

        let merged = merge_all(&[("a", &first), ("b", &second), ("c", &third)])
            .expect("merge succeeds");

        assert_eq!(merged.namespace, "kubeflow");
        assert_eq!(merged.name_prefix, "kf-");
        assert_eq!(merged.name_suffix, "-v1");
        let options = merged.generator_options.expect("options are set");
        assert!(options.disable_name_suffix_hash);
        assert!(options.labels.is_empty());
    }

    #[rstest]
    #[case(Behavior::Create, Behavior::Merge, 2)]
    #[case(Behavior::Create, Behavior::Create, 1)]
    #[case(Behavior::Create, Behavior::Replace, 2)]
    #[case(Behavior::Unspecified, Behavior::Unspecified, 2)]
    #[case(Behavior::Merge, Behavior::Create, 1)]
    fn generator_behavior(
        #[case] first: Behavior,
        #[case] second: Behavior,
        #[case] expected: usize,
    ) {
        let base = Kustomization {
            bases: Some(Vec::new()),
            config_map_generator: vec![config_map("app-config", first)],
            ..Default::default()
        };
        let overlay = Kustomization {
            bases: Some(Vec::new()),
            config_map_generator: vec![config_map("app-config", second)],
            ..Default::default()
        };

        let merged =
            merge_all(&[("base", &base), ("overlays/x", &overlay)]).expect("merge succeeds");

        assert_eq!(merged.config_map_generator.len(), expected);
    }

    #[test]
    fn generator_sources_are_rebased() {
        let overlay = fragment(indoc! {"
            bases: [../../base]
            configMapGenerator:
            - name: app-config
              env: params.env
              files:
              - config.json
              - custom=../../base/settings.ini
              literals:
              - mode=prod
            secretGenerator:
            - name: app-secret
              behavior: create
              envs:
              - secrets.env
              type: Opaque
        "});

        let merged = merge_all(&[("overlays/prod", &overlay)]).expect("merge succeeds");

        let args = &merged.config_map_generator[0].generator_args;
        assert_eq!(args.env.as_deref(), Some("overlays/prod/params.env"));
        assert_eq!(
            args.files,
            vec!["overlays/prod/config.json", "custom=base/settings.ini"]
        );
        assert_eq!(args.literals, vec!["mode=prod"]);

        let secret = &merged.secret_generator[0];
        assert_eq!(secret.generator_args.envs, vec!["overlays/prod/secrets.env"]);
        assert_eq!(secret.secret_type.as_deref(), Some("Opaque"));
    }

    #[test]
    fn json_patches_are_always_appended() {
        let overlay = fragment(indoc! {"
            bases: [../../base]
            patchesJson6902:
            - target: {group: apps, version: v1, kind: Deployment, name: web}
              path: patch.yaml
            - target: {group: apps, version: v1, kind: Deployment, name: web}
              path: patch.yaml
        "});

        let merged = merge_all(&[("overlays/prod", &overlay)]).expect("merge succeeds");

        assert_eq!(merged.patches_json6902.len(), 2);
        assert_eq!(merged.patches_json6902[0].path, "overlays/prod/patch.yaml");
        assert_eq!(merged.patches_json6902[1].target.name, "web");
    }

    #[test]
    fn unsupported_field_fails_fast() {
        let overlay = fragment(indoc! {"
            bases: [../../base]
            helmCharts:
            - name: minecraft
        "});

        let err = merge_all(&[("overlays/prod", &overlay)]).expect_err("field is unsupported");

        assert!(matches!(err, Error::UnsupportedField { ref field, .. } if field == "helmCharts"));
        assert!(err.to_string().contains("overlays/prod/kustomization.yaml"));
    }

    #[rstest]
    #[case::generator_options("generatorOptions: {immutable: true}", "generatorOptions.immutable")]
    #[case::generator(
        "configMapGenerator: [{name: app, literals: [a=b], options: {disableNameSuffixHash: true}}]",
        "configMapGenerator[0].options"
    )]
    #[case::patch_target(
        "patchesJson6902: [{target: {kind: Service, name: svc, labelSelector: app=x}, path: p.yaml}]",
        "patchesJson6902[0].target.labelSelector"
    )]
    fn nested_unsupported_field_fails_fast(#[case] fields: &str, #[case] expected: &str) {
        let overlay = fragment(&format!("bases: [../../base]\n{fields}"));
        let mut parent = Kustomization::new();

        let err = merge_into(
            &mut parent,
            Path::new(ROOT),
            &overlay,
            &dir("overlays/prod"),
            &mut DedupLedger::new(),
        )
        .expect_err("nested field is unsupported");

        assert!(matches!(err, Error::UnsupportedField { ref field, .. } if field == expected));
        assert!(err.to_string().contains("overlays/prod/kustomization.yaml"));
        assert_eq!(parent, Kustomization::new());
    }

    #[test]
    fn path_outside_root_fails_fast() {
        let overlay = fragment(indoc! {"
            bases: [../../base]
            resources:
            - ../../../elsewhere/resource.yaml
        "});

        let err = merge_all(&[("overlays/prod", &overlay)]).expect_err("path escapes the root");

        assert!(matches!(
            err,
            Error::RebasePath {
                category: FieldCategory::Resources,
                ..
            }
        ));
    }

    #[test]
    fn merge_is_deterministic() {
        let base = fragment("resources: [deployment.yaml]");
        let overlay = fragment(indoc! {"
            bases: [../../base]
            commonLabels: {b: '2', a: '1'}
            images: [{name: x, newTag: '1'}]
            resources: [extra.yaml]
        "});
        let children = [("base", &base), ("overlays/prod", &overlay)];

        let first = merge_all(&children).expect("merge succeeds");
        let second = merge_all(&children).expect("merge succeeds");

        assert_eq!(
            serde_yaml::to_string(&first).expect("serializes"),
            serde_yaml::to_string(&second).expect("serializes")
        );
    }
}
