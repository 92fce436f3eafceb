use std::env;

const DEFAULT_COLLECTOR: &str = "http://localhost:4317";

/// Static agent settings.
///
/// Values are passed to the agent as read. The only normalisation is
/// dropping blank entries from the ignore list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether instrumentation is enabled at all.
    pub monitor: bool,
    /// Application name reported as `service.name`.
    pub name: String,
    /// Collector endpoint the agent exports to.
    pub collector: String,
    /// Request path prefixes that are never instrumented.
    pub ignore: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            monitor: false,
            name: env!("CARGO_PKG_NAME").to_string(),
            collector: DEFAULT_COLLECTOR.to_string(),
            ignore: Vec::new(),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// | variable | field |
    /// |----------|-------|
    /// | `SCOUT_MONITOR` | `monitor` |
    /// | `SCOUT_NAME`, `SERVICE_NAME` | `name` |
    /// | `SCOUT_COLLECTOR`, `OTEL_EXPORTER_OTLP_ENDPOINT` | `collector` |
    /// | `SCOUT_IGNORE` | `ignore`, comma separated |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Config {
            monitor: lookup("SCOUT_MONITOR")
                .map(|value| parse_bool(&value))
                .unwrap_or(defaults.monitor),
            name: lookup("SCOUT_NAME")
                .or_else(|| lookup("SERVICE_NAME"))
                .unwrap_or(defaults.name),
            collector: lookup("SCOUT_COLLECTOR")
                .or_else(|| lookup("OTEL_EXPORTER_OTLP_ENDPOINT"))
                .unwrap_or(defaults.collector),
            ignore: lookup("SCOUT_IGNORE")
                .map(|value| parse_list(&value))
                .unwrap_or_default(),
        }
    }

    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_collector(mut self, collector: impl Into<String>) -> Self {
        self.collector = collector.into();
        self
    }

    pub fn with_ignore<I, P>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.ignore = prefixes
            .into_iter()
            .map(Into::into)
            .filter(|prefix| !prefix.is_empty())
            .collect();
        self
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}
