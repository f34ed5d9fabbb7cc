use super::*;

/// Protocol-level failures that surface to the miner as JSON-RPC errors.
/// Codes follow the host node's RPC error space, which is what the
/// original protocol speakers expect.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StratumError {
    #[snafu(display("Parse error"))]
    Parse,

    #[snafu(display("Top-level object parse error"))]
    NotAnObject,

    #[snafu(display("{message}"))]
    InvalidParams { message: String },

    #[snafu(display(
        "Stratum client not authorized. Use mining.authorize first, with a payout address as the username."
    ))]
    Unauthorized,

    #[snafu(display("Method '{method}' not found"))]
    MethodNotFound { method: String },

    #[snafu(display("Node is not connected!"))]
    NotConnected,

    #[snafu(display("Node is downloading blocks..."))]
    InitialDownload,

    #[snafu(display("Out of memory"))]
    OutOfMemory,

    #[snafu(display("{message}"))]
    Internal { message: String },
}

impl StratumError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse | Self::NotAnObject => -32700,
            Self::InvalidParams { .. } => -8,
            Self::Unauthorized => -32600,
            Self::MethodNotFound { .. } => -32601,
            Self::NotConnected => -9,
            Self::InitialDownload => -10,
            Self::OutOfMemory => -7,
            Self::Internal { .. } => -32603,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        Self::Internal {
            message: message.to_string(),
        }
    }
}

/// The `error` member of a reply: `{"code": …, "message": …}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl From<&StratumError> for JsonRpcError {
    fn from(error: &StratumError) -> Self {
        JsonRpcError {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(StratumError::Parse.code(), -32700);
        assert_eq!(StratumError::invalid_params("x").code(), -8);
        assert_eq!(StratumError::Unauthorized.code(), -32600);
        assert_eq!(
            StratumError::MethodNotFound {
                method: "mining.foo".into()
            }
            .code(),
            -32601
        );
        assert_eq!(StratumError::internal("boom").code(), -32603);
    }

    #[test]
    fn wire_shape() {
        let error = JsonRpcError::from(&StratumError::MethodNotFound {
            method: "mining.foo".into(),
        });
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"code": -32601, "message": "Method 'mining.foo' not found"})
        );
    }

    #[test]
    fn messages() {
        assert_eq!(
            StratumError::invalid_params("extranonce2 is wrong length").to_string(),
            "extranonce2 is wrong length"
        );
        assert_eq!(StratumError::NotConnected.to_string(), "Node is not connected!");
    }
}
