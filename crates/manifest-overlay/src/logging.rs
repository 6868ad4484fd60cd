use std::{
    io::{Sink, sink},
    path::PathBuf,
};

use snafu::{ResultExt, Snafu};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{
        MakeWriter,
        writer::{EitherWriter, MakeWriterExt as _},
    },
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    InstallSubscriber { source: TryInitError },
}

/// Initializes `tracing` logging with options from the environment variable given in `env`,
/// for example `MANIFEST_OVERLAY_LOG=debug`. Without it the maximum log level is INFO.
///
/// Log output is copied to a file as well if `{env}_DIRECTORY` names a directory. The file is
/// rotated regularly.
///
/// Fails if a global subscriber is already installed.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let filter = EnvFilter::try_from_env(env)
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender = file_appender_directory
        .as_deref()
        .map(|directory| {
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(directory)
                .context(InitFileAppenderSnafu { directory })
        })
        .transpose()?;

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr.and(OptionalMakeWriter::from(file_appender)));
    Registry::default()
        .with(filter)
        .with(fmt)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // Only possible once the subscriber is in place
    match file_appender_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}

/// Like [`EitherWriter`] but implements [`MakeWriter`] instead of [`std::io::Write`].
enum EitherMakeWriter<A, B> {
    A(A),
    B(B),
}

impl<'a, A, B> MakeWriter<'a> for EitherMakeWriter<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = EitherWriter<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer()),
            Self::B(b) => EitherWriter::B(b.make_writer()),
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer_for(meta)),
            Self::B(b) => EitherWriter::B(b.make_writer_for(meta)),
        }
    }
}

type OptionalMakeWriter<T> = EitherMakeWriter<T, fn() -> Sink>;

impl<T> From<Option<T>> for OptionalMakeWriter<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(t) => Self::A(t),
            None => Self::B(sink),
        }
    }
}
