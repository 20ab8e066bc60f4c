use std::fmt;

/// Fatal pipeline-invariant violations. These never reach
/// `ProxyContext::error_feature` — they indicate the surrounding pipeline did
/// not run the stages it was supposed to, not a destination failure.
#[derive(Debug)]
pub enum CoreError {
    /// `ProxyContext::available_destinations` was `None` when the Forwarder ran.
    MisconfiguredPipeline(String),
    /// An active-probe batch named a policy that isn't registered.
    UnknownPolicy(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::MisconfiguredPipeline(msg) => {
                write!(f, "misconfigured pipeline: {}", msg)
            }
            CoreError::UnknownPolicy(name) => write!(f, "unknown policy: {}", name),
        }
    }
}

impl std::error::Error for CoreError {}

/// Discriminated forward-path failure, mirrors the HTTP client's result
/// contract from spec §4.1 step 6 / §6. `None` is represented by the
/// absence of a `ForwarderErrorFeature`, not a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderError {
    NoAvailableDestinations,
    Request,
    RequestTimedOut,
    RequestCanceled,
    RequestBodyClient,
    RequestBodyDestination,
    ResponseBodyClient,
    ResponseBodyDestination,
    UpgradeRequestDestination,
    UpgradeResponseDestination,
}

impl fmt::Display for ForwarderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ForwarderError::NoAvailableDestinations => "no available destinations",
            ForwarderError::Request => "request error",
            ForwarderError::RequestTimedOut => "request timed out",
            ForwarderError::RequestCanceled => "request canceled",
            ForwarderError::RequestBodyClient => "request body error (client)",
            ForwarderError::RequestBodyDestination => "request body error (destination)",
            ForwarderError::ResponseBodyClient => "response body error (client)",
            ForwarderError::ResponseBodyDestination => "response body error (destination)",
            ForwarderError::UpgradeRequestDestination => "upgrade request error (destination)",
            ForwarderError::UpgradeResponseDestination => "upgrade response error (destination)",
        };
        write!(f, "{}", s)
    }
}

impl std::error::Error for ForwarderError {}

/// What the Forwarder writes into `ProxyContext::error_feature` on failure.
/// `cause` carries the underlying transport error for logging, kept
/// type-erased since the HTTP client's own error type is out of scope here.
#[derive(Debug)]
pub struct ForwarderErrorFeature {
    pub error: ForwarderError,
    pub cause: Option<String>,
}

impl ForwarderErrorFeature {
    pub fn new(error: ForwarderError) -> Self {
        Self { error, cause: None }
    }

    pub fn with_cause(error: ForwarderError, cause: impl Into<String>) -> Self {
        Self {
            error,
            cause: Some(cause.into()),
        }
    }

    /// Whether this error kind counts as a destination failure, per spec
    /// §4.2's enumerated list. `RequestCanceled` and the `*Client` variants
    /// are deliberately excluded — ambiguous or client-attributed.
    pub fn is_destination_failure(&self) -> bool {
        matches!(
            self.error,
            ForwarderError::Request
                | ForwarderError::RequestTimedOut
                | ForwarderError::RequestBodyDestination
                | ForwarderError::ResponseBodyDestination
                | ForwarderError::UpgradeRequestDestination
                | ForwarderError::UpgradeResponseDestination
        )
    }
}
