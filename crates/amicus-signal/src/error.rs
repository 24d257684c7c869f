/// Errors produced by the Signal adapter.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("signal-cli JSON-RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("signal-cli JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed JSON-RPC response: {0}")]
    MalformedResponse(String),

    #[error("no Signal account configured")]
    NoAccount,
}
