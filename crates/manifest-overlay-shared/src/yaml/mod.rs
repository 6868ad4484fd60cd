//! Utility functions for processing data in the YAML file format
use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Represents every error which can be encountered during YAML (de)serialization.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to deserialize YAML from {path:?}"))]
    DeserializeYaml {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to write YAML document separator"))]
    WriteDocumentSeparator { source: std::io::Error },

    #[snafu(display("failed to write YAML to file {path:?}"))]
    WriteToFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to read YAML from file {path:?}"))]
    ReadFromFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse bytes as valid UTF-8 string"))]
    ParseUtf8Bytes { source: std::string::FromUtf8Error },
}

/// Provides configurable options during YAML serialization.
///
/// The default implementation [`SerializeOptions::default()`] produces plain documents, which is
/// what most consumers of the written files expect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Adds leading triple dashes (`---`) to the output string.
    pub explicit_document: bool,

    /// Serialize enum variants as YAML maps using the variant name as the key.
    pub singleton_map: bool,
}

/// Serializes the given data structure and writes it to a [`Writer`](Write).
pub fn serialize<T, W>(value: &T, mut writer: W, options: SerializeOptions) -> Result<()>
where
    T: serde::Serialize,
    W: Write,
{
    if options.explicit_document {
        writer
            .write_all(b"---\n")
            .context(WriteDocumentSeparatorSnafu)?;
    }

    let mut serializer = serde_yaml::Serializer::new(writer);

    if options.singleton_map {
        serde_yaml::with::singleton_map_recursive::serialize(value, &mut serializer)
            .context(SerializeYamlSnafu)?;
    } else {
        value
            .serialize(&mut serializer)
            .context(SerializeYamlSnafu)?;
    }

    Ok(())
}

/// Serializes the given data structure into an owned [`String`].
pub fn to_string<T>(value: &T, options: SerializeOptions) -> Result<String>
where
    T: serde::Serialize,
{
    let mut buffer = Vec::new();
    serialize(value, &mut buffer, options)?;

    String::from_utf8(buffer).context(ParseUtf8BytesSnafu)
}

/// Serializes `value` and overwrites the file at `path` with the result.
///
/// The file is written in one go, a partially serialized document never ends up on disk.
pub fn write_to_file<T, P>(path: P, value: &T, options: SerializeOptions) -> Result<()>
where
    T: serde::Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let contents = to_string(value, options)?;

    std::fs::write(path, contents).context(WriteToFileSnafu { path })
}

/// Reads and deserializes the file at `path`.
///
/// Returns [`None`] if the file does not exist, every other I/O error is propagated.
pub fn read_from_file<T, P>(path: P) -> Result<Option<T>>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context(ReadFromFileSnafu { path }),
    };

    serde_yaml::from_str(&contents)
        .map(Some)
        .context(DeserializeYamlSnafu { path })
}
