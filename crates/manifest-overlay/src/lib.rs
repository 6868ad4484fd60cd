//! Composes declarative configuration fragments (`kustomization.yaml`) of a component from its
//! base and an ordered list of named overlays into one deterministic, de-duplicated fragment whose
//! paths all resolve from the component directory.
//!
//! The entry points are [`compose::generate_kustomization_file`] for a single component and
//! [`compose::generate_applications`] for every application of a [`config::DeploymentConfig`].
//! Parameters reach the composed result through the `params.env` files of the fragments
//! ([`params`]) or through a config map patch ([`config_map`]).

pub mod aggregate;
pub mod compose;
pub mod config;
pub mod config_map;
pub mod kustomization;
pub mod ledger;
pub mod locator;
pub mod logging;
pub mod merge;
pub mod params;
pub mod stack;
pub mod writer;
