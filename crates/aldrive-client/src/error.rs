use aldrive_core::model::JobHandle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to launch '{program}': {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{scheduler} rejected job '{name}': {detail}")]
    Submission {
        scheduler: &'static str,
        name: String,
        detail: String,
    },

    #[error("Failed to parse {scheduler} job ID from output: {output:?}")]
    JobIdParse {
        scheduler: &'static str,
        output: String,
    },

    #[error("Could not query status of job {handle}: {detail}")]
    TransientPoll { handle: JobHandle, detail: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
