//! Rewrites the `name=value` lines of a fragment's parameter file.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::config::DeploymentConfig;

/// File name of the parameter file inside a fragment directory.
pub const PARAM_FILE: &str = "params.env";

const GENERATE_NAME: &str = "generateName";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read parameter file {path:?}"))]
    ReadParamFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to write parameter file {path:?}"))]
    WriteParamFile {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Rewrites `dir/params.env` in place, see [`rewrite_params`].
///
/// Returns `false` if `dir` has no parameter file, which is not an error.
pub fn rewrite_param_file(
    dir: &Path,
    overrides: &BTreeMap<&str, &str>,
    config: &DeploymentConfig,
) -> Result<bool> {
    let path = dir.join(PARAM_FILE);

    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "no parameter file");
            return Ok(false);
        }
        Err(err) => return Err(err).context(ReadParamFileSnafu { path }),
    };

    let rewritten = rewrite_params(&contents, overrides, config);
    std::fs::write(&path, rewritten).context(WriteParamFileSnafu { path: &path })?;

    info!(path = %path.display(), "updated parameter file");
    Ok(true)
}

/// Rewrites each `name=value` line of `contents`.
///
/// - A non-empty value for `name` in `overrides` replaces the current value. An empty
///   `generateName` gets the override plus a random 8 character hex suffix instead.
/// - Otherwise an empty `appName`, `namespace` or `project` is filled from `config`.
/// - Every other line is kept as is. Line order is preserved, every line ends with `\n`.
pub fn rewrite_params(
    contents: &str,
    overrides: &BTreeMap<&str, &str>,
    config: &DeploymentConfig,
) -> String {
    let mut rewritten = String::with_capacity(contents.len());

    for line in contents.lines() {
        let (name, current) = line.split_once('=').unwrap_or((line, ""));

        let value = match overrides.get(name) {
            Some(value) if !value.is_empty() => {
                if name == GENERATE_NAME && current.is_empty() {
                    Some(format!("{value}{:08x}", rand::random::<u32>()))
                } else {
                    Some((*value).to_owned())
                }
            }
            _ if current.is_empty() => fallback(name, config).map(ToOwned::to_owned),
            _ => None,
        };

        match value {
            Some(value) => {
                rewritten.push_str(name);
                rewritten.push('=');
                rewritten.push_str(&value);
            }
            None => rewritten.push_str(line),
        }
        rewritten.push('\n');
    }

    rewritten
}

fn fallback<'a>(name: &str, config: &'a DeploymentConfig) -> Option<&'a str> {
    match name {
        "appName" => Some(config.name()),
        "namespace" => Some(config.namespace()),
        "project" => Some(config.project()),
        _ => None,
    }
}
