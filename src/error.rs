use thiserror::Error;

/// Failure of a command run on a resource's destination server.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to start remote session to {server}: {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote command on {server} exited with code {exit_code}: {message}")]
    CommandFailed {
        server: String,
        command: String,
        exit_code: i32,
        message: String,
    },

    #[error("remote session to {server} failed: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a metrics query against the on-host metrics agent.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Unauthorized, please check your metrics token or restart the metrics agent to set a new token.")]
    Unauthorized,

    #[error("{0}")]
    Agent(String),

    #[error("{metric} history of container '{container}' unavailable: {source}")]
    Remote {
        container: String,
        metric: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("could not decode metrics response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Violation of the resource lifecycle ordering.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("database '{uuid}' must be deleted before it can be permanently deleted")]
    NotSoftDeleted { uuid: String },

    #[error("database '{uuid}' not found")]
    NotFound { uuid: String },

    #[error("{operation} failed for database '{uuid}': {source}")]
    Remote {
        operation: &'static str,
        uuid: String,
        #[source]
        source: RemoteError,
    },
}
