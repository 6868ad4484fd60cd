use std::path::{Component, Path, PathBuf};

use snafu::{OptionExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("path {path:?} is not located below the component root {root:?}"))]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[snafu(display("path {path:?} is not valid UTF-8"))]
    NonUtf8 { path: PathBuf },
}

/// Resolves `.` and `..` components without touching the filesystem.
///
/// Leading `..` of a relative path are kept, `..` directly below the filesystem root is dropped.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::ParentDir | Component::CurDir) | None => {
                    normalized.push(Component::ParentDir);
                }
            },
            other => normalized.push(other),
        }
    }

    normalized
}

/// Rewrites `value`, which is relative to `dir`, so that it is relative to `root` instead.
///
/// The result always uses `/` as separator. A value pointing at `root` itself becomes `.`.
pub fn rebase_path(root: &Path, dir: &Path, value: &str) -> Result<String, Error> {
    let root = normalize(root);
    let joined = normalize(&dir.join(value));

    let relative = joined.strip_prefix(&root).ok().context(OutsideRootSnafu {
        path: joined.clone(),
        root: root.clone(),
    })?;

    let mut segments = Vec::new();
    for component in relative.components() {
        let segment = component
            .as_os_str()
            .to_str()
            .context(NonUtf8Snafu { path: &joined })?;
        segments.push(segment);
    }

    if segments.is_empty() {
        return Ok(".".to_owned());
    }

    Ok(segments.join("/"))
}
