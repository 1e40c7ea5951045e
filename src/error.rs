use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read config file {path}"))]
    ConfigRead {
        path: String,
        #[snafu(source)]
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse config file {path}"))]
    ConfigParse {
        path: String,
        #[snafu(source)]
        source: serde_yaml::Error,
    },

    #[snafu(display("Invalid environment override"))]
    ConfigEnv {
        #[snafu(source)]
        source: envy::Error,
    },

    #[snafu(display("Invalid configuration: {message}"))]
    InvalidConfig { message: String },

    #[snafu(display("Failed to connect to {backend} backend"))]
    BackendConnect {
        backend: &'static str,
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Error returned from database"))]
    Sqlx {
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Message is not well-formed JSON"))]
    MalformedPayload {
        #[snafu(source)]
        source: serde_json::Error,
    },

    #[snafu(display("Failed to encode document {collection}/{id}"))]
    Serialize {
        collection: String,
        id: String,
        #[snafu(source)]
        source: serde_json::Error,
    },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Sqlx { source }
    }
}

impl From<envy::Error> for Error {
    fn from(source: envy::Error) -> Self {
        Self::ConfigEnv { source }
    }
}

impl Error {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn backend_connect(backend: &'static str, source: sqlx::Error) -> Self {
        Self::BackendConnect { backend, source }
    }

    pub fn malformed(source: serde_json::Error) -> Self {
        Self::MalformedPayload { source }
    }

    /// Startup failures abort the process; everything else is contained to
    /// the message that caused it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigRead { .. }
                | Self::ConfigParse { .. }
                | Self::ConfigEnv { .. }
                | Self::InvalidConfig { .. }
                | Self::BackendConnect { .. }
        )
    }
}
