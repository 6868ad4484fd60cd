//! Finds the base and the requested overlays of a component directory.

use std::path::{Path, PathBuf};

use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, warn};

use crate::kustomization::{self, KUSTOMIZATION_FILE, Kustomization, load_kustomization};

pub const BASE_DIR: &str = "base";
pub const OVERLAYS_DIR: &str = "overlays";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to load fragment of component {component_dir:?}"))]
    LoadFragment {
        source: kustomization::Error,
        component_dir: PathBuf,
    },

    #[snafu(display(
        "component {component_dir:?} has neither a base fragment nor a {KUSTOMIZATION_FILE} of its own"
    ))]
    MissingFragment { component_dir: PathBuf },

    #[snafu(display("overlay {overlay:?} of component {component_dir:?} has no {KUSTOMIZATION_FILE}"))]
    MissingOverlayFragment {
        overlay: String,
        component_dir: PathBuf,
    },
}

/// A fragment together with the directory it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layer {
    pub dir: PathBuf,
    pub kustomization: Kustomization,
}

/// What [`locate`] found in a component directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Located {
    /// There is no separable base, the component's own fragment is used as is.
    Final(Kustomization),

    /// The base and the overlays that exist, in the requested order.
    Layered { base: Layer, overlays: Vec<Layer> },
}

/// Resolves `component_dir/base` and `component_dir/overlays/<name>` for each name in `overlays`.
///
/// Requested overlays that don't exist are skipped. Overlays are only looked up if the component
/// has a base.
pub fn locate(component_dir: &Path, overlays: &[String]) -> Result<Located> {
    let base_dir = component_dir.join(BASE_DIR);

    let Some(base) = load(component_dir, &base_dir)? else {
        debug!(
            component = %component_dir.display(),
            "component has no base, using its fragment as is"
        );

        return match load(component_dir, component_dir)? {
            Some(kustomization) => Ok(Located::Final(kustomization)),
            None => MissingFragmentSnafu { component_dir }.fail(),
        };
    };

    let mut layers = Vec::with_capacity(overlays.len());
    for overlay in overlays {
        let overlay_dir = component_dir.join(OVERLAYS_DIR).join(overlay);

        if !overlay_dir.is_dir() {
            warn!(
                component = %component_dir.display(),
                %overlay,
                "overlay does not exist, skipping it"
            );
            continue;
        }

        let kustomization = load(component_dir, &overlay_dir)?.with_context(|| {
            MissingOverlayFragmentSnafu {
                overlay,
                component_dir,
            }
        })?;

        layers.push(Layer {
            dir: overlay_dir,
            kustomization,
        });
    }

    Ok(Located::Layered {
        base: Layer {
            dir: base_dir,
            kustomization: base,
        },
        overlays: layers,
    })
}

fn load(component_dir: &Path, dir: &Path) -> Result<Option<Kustomization>> {
    load_kustomization(dir).context(LoadFragmentSnafu { component_dir })
}
