use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogConfig, LogFormat, LogOutput};

fn filter(config: &LogConfig) -> EnvFilter {
    // RUST_LOG directives take precedence over LOG_LEVEL.
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy()
}

fn writer(output: LogOutput) -> BoxMakeWriter {
    match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
    }
}

pub fn init(config: &LogConfig) {
    let base_layer = fmt::layer()
        .with_target(true)
        .with_writer(writer(config.output));

    let log_layer = match config.format {
        LogFormat::Json => base_layer.json().with_filter(filter(config)).boxed(),
        LogFormat::Logfmt => base_layer
            .with_ansi(false)
            .with_filter(filter(config))
            .boxed(),
    };

    tracing_subscriber::registry().with(log_layer).init();
}
