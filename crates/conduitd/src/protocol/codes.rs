//! Stable wire error codes.
//!
//! Codes are part of the public protocol and are never renumbered.

/// Client-visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The envelope was malformed.
    InvalidRequest,
    /// No handler is registered for the method.
    MethodNotFound,
    /// Parameters failed schema validation.
    InvalidParams,
    /// The handler failed or panicked.
    HandlerExecution,
    /// The call exceeded its queue wait or execution budget.
    Timeout,
    /// The global queue is full.
    ServerBusy,
    /// The call was cancelled before it ran.
    Cancelled,
}

impl ErrorCode {
    /// Numeric code carried on the wire.
    pub const fn code(self) -> i64 {
        match self {
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::HandlerExecution => -32000,
            Self::Timeout => -32001,
            Self::ServerBusy => -32002,
            Self::Cancelled => -32003,
        }
    }

    /// Canonical message paired with the code.
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::HandlerExecution => "Handler execution failed",
            Self::Timeout => "Request timed out",
            Self::ServerBusy => "Server busy",
            Self::Cancelled => "Request cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ErrorCode::InvalidRequest, -32600)]
    #[case(ErrorCode::MethodNotFound, -32601)]
    #[case(ErrorCode::InvalidParams, -32602)]
    #[case(ErrorCode::HandlerExecution, -32000)]
    #[case(ErrorCode::Timeout, -32001)]
    #[case(ErrorCode::ServerBusy, -32002)]
    #[case(ErrorCode::Cancelled, -32003)]
    fn codes_are_stable(#[case] code: ErrorCode, #[case] expected: i64) {
        assert_eq!(code.code(), expected);
    }
}
