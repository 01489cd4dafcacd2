//! Tracing subscriber setup from the `logging` config section.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use vidlisync_core::config::LoggingConfig;

/// Build the filter. `RUST_LOG` wins over the config file; `--verbose`
/// raises the base level to debug.
pub fn build_env_filter(config: &LoggingConfig, verbose: bool) -> anyhow::Result<EnvFilter> {
    if std::env::var("RUST_LOG").is_ok() {
        return Ok(EnvFilter::from_default_env());
    }

    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };

    let directives = std::iter::once(level.to_string())
        .chain(config.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",");

    Ok(EnvFilter::try_new(&directives)?)
}

pub fn init(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = build_env_filter(config, verbose)?;
    let writer = match config.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    match config.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_from_config() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: Some("warn".into()),
            filters: vec!["vidlisync_gateway=debug".into()],
            ..Default::default()
        };
        let filter = build_env_filter(&config, false).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("warn"));
        assert!(rendered.contains("vidlisync_gateway=debug"));
    }

    #[test]
    fn test_verbose_overrides_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: Some("error".into()),
            ..Default::default()
        };
        let filter = build_env_filter(&config, true).unwrap();
        assert!(filter.to_string().contains("debug"));
    }

    #[test]
    fn test_invalid_directive_is_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            filters: vec!["vidlisync=notalevel".into()],
            ..Default::default()
        };
        assert!(build_env_filter(&config, false).is_err());
    }
}
