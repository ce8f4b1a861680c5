use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a node participating in cluster coordination.
///
/// Ordering is used by the election layer (lowest healthy id wins), so the
/// derive order matters here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remote invocation failure carried across the node boundary as data.
///
/// Live error values cannot cross process boundaries, so the cause is
/// captured as a kind tag plus a human readable message before transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFault {
    pub kind: String,
    pub message: String,
}

impl RemoteFault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteFault {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteFault {}

/// The final outcome of one remote invocation.
///
/// A closed union rather than two independently settable fields: an
/// envelope either succeeded with a value (possibly `()` for void
/// invocations) or failed with a recorded cause, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseOutcome<T> {
    Success(T),
    Failure(RemoteFault),
}

/// Correlates one remote node's reply to a cluster coordination invocation.
///
/// The envelope carries the outcome instead of raising it: the caller
/// inspects `result()` / `fault()` explicitly. `outcome == None` means no
/// outcome has been recorded yet, which is distinct from a successful void
/// reply (`Success(())`).
///
/// Envelopes are populated by the single thread executing the remote call
/// and treated as immutable after hand-off; a serialize/deserialize round
/// trip preserves full equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeResponse<T> {
    sender: NodeId,
    outcome: Option<ResponseOutcome<T>>,
}

impl<T> NodeResponse<T> {
    /// An envelope awaiting its outcome.
    pub fn pending(sender: NodeId) -> Self {
        NodeResponse {
            sender,
            outcome: None,
        }
    }

    /// An envelope constructed with its final successful outcome.
    pub fn success(sender: NodeId, value: T) -> Self {
        NodeResponse {
            sender,
            outcome: Some(ResponseOutcome::Success(value)),
        }
    }

    /// An envelope constructed with its final recorded failure.
    pub fn failure(sender: NodeId, fault: RemoteFault) -> Self {
        NodeResponse {
            sender,
            outcome: Some(ResponseOutcome::Failure(fault)),
        }
    }

    /// Record a successful outcome. Last write wins; never raises.
    pub fn complete_ok(&mut self, value: T) {
        self.outcome = Some(ResponseOutcome::Success(value));
    }

    /// Record a failure outcome. Last write wins; never raises.
    pub fn complete_err(&mut self, fault: RemoteFault) {
        self.outcome = Some(ResponseOutcome::Failure(fault));
    }

    pub fn sender(&self) -> &NodeId {
        &self.sender
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn result(&self) -> Option<&T> {
        match &self.outcome {
            Some(ResponseOutcome::Success(value)) => Some(value),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<&RemoteFault> {
        match &self.outcome {
            Some(ResponseOutcome::Failure(fault)) => Some(fault),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<&ResponseOutcome<T>> {
        self.outcome.as_ref()
    }
}
