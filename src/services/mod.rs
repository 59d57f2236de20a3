//! Services module
//!
//! Credential pooling, retry with backoff, and the rotation that combines
//! them around an external operation.

pub mod credential_pool;
pub mod operation;
pub mod retry;
pub mod rotation;

pub use credential_pool::{
    Credential, CredentialKind, CredentialLease, CredentialPool, CredentialSource, PoolConfig,
    PoolStats, ReleasePolicy,
};
pub use operation::{CommandOperation, ExternalOperation, FnOperation, OperationError, OperationOutput};
pub use retry::{
    FailureClass, FailureClassifier, InvokeError, InvokeOutcome, RetryExecutor, RetryPolicy,
    TextClassifier,
};
pub use rotation::{RotatingInvoker, RotationOutcome};
