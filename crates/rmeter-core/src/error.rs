use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum RmeterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("config invalid: {0:?}")]
    Validation(Vec<String>),

    #[error("attacker setup failed: {0}")]
    AttackerSetup(String),

    #[error("unknown attacker: {0}")]
    UnknownAttacker(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("node is busy: {0}")]
    NodeBusy(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Serialize for RmeterError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
