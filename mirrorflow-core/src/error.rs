use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Stream Creation Error - {0}")]
    StreamCreation(String),

    #[error("Source Error - {0}")]
    Source(String),

    #[error("Sink Error - {0}")]
    Sink(String),

    #[error("Channel Error - {0}")]
    Channel(String),

    #[error("Metrics Error - {0}")]
    Metrics(String),
}

impl From<mirrorflow_kafka::Error> for Error {
    fn from(value: mirrorflow_kafka::Error) -> Self {
        match value {
            mirrorflow_kafka::Error::Kafka(e) => Error::Source(e),
            mirrorflow_kafka::Error::Connection { server, error } => Error::Source(format!(
                "Failed to connect to Kafka server: {server} - {error}"
            )),
            mirrorflow_kafka::Error::Other(e) => Error::Source(e),
        }
    }
}
