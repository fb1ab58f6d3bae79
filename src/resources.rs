use std::time::Duration;

/// Which deployment this process is, read once from `APP_ENV`. Anything that
/// isn't explicitly production is treated as local.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn current() -> Self {
        match std::env::var("APP_ENV").as_deref() {
            Ok("production") => Self::Production,
            _ => Self::Local,
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Resolved connection settings for a shared document store.
#[derive(Clone, Debug)]
pub struct DocumentStoreConfig {
    pub uri: String,
    /// Building indexes on startup is only safe where the dataset is small;
    /// never in production.
    pub auto_index: bool,
}

impl DocumentStoreConfig {
    pub fn new(uri: impl Into<String>, env: Environment) -> Self {
        Self {
            uri: uri.into(),
            auto_index: env.is_local(),
        }
    }
}

/// Resolved connection settings for a key-value cache server.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub uri: String,
    /// Passed through to the driver's dial options.
    pub connect_timeout: Option<Duration>,
}

impl CacheConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connect_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_store_auto_indexes_only_outside_production() {
        assert!(DocumentStoreConfig::new("mongodb://localhost", Environment::Local).auto_index);
        assert!(
            !DocumentStoreConfig::new("mongodb://db.internal", Environment::Production).auto_index
        );
    }
}
