//! Error classification policy
//!
//! One rule table decides, for every failed remote call, whether the engine
//! retries, gives up, or treats the failure as a local bug. Call sites never
//! inspect error codes themselves.

use crate::error::RemoteError;

/// Outcome of classifying a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Transient; absorbed by the retry loop until the budget runs out
    Retryable,
    /// This attempt is wrong; the engine does not rewrite requests, so terminal
    NonRetryable,
    /// Validation/permission/programming error; never worth retrying
    Fatal,
    /// The resource no longer exists. Only produced on
    /// [`ErrorPath::DeleteConfirmation`], where it signals success.
    Absent,
}

/// Where the failing call was made. Unknown codes default differently per path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPath {
    /// Mutations; unknown codes are retried
    Write,
    /// Idempotent reads and status queries; unknown codes are retried
    Read,
    /// Pre-flight validation calls made by the provider layer before a
    /// mutation (parameter or quota checks); unknown codes are not retried.
    /// The reconciler itself never issues these; see [`Reconciler::classifier`](crate::Reconciler::classifier).
    Validation,
    /// Confirming a delete; not-found means done
    DeleteConfirmation,
}

/// Match rule for an error code.
///
/// Parsed from `"Code"` (exact), `"Namespace.*"` (the bare namespace or any
/// dotted sub-code) or `"*.Suffix"` (last dotted segment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodePattern {
    Exact(String),
    Namespace(String),
    Suffix(String),
}

impl CodePattern {
    pub fn parse(pattern: &str) -> Self {
        if let Some(ns) = pattern.strip_suffix(".*") {
            CodePattern::Namespace(ns.to_string())
        } else if let Some(suffix) = pattern.strip_prefix("*.") {
            CodePattern::Suffix(suffix.to_string())
        } else {
            CodePattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, code: &str) -> bool {
        match self {
            CodePattern::Exact(c) => code == c,
            CodePattern::Namespace(ns) => {
                code == ns
                    || code
                        .strip_prefix(ns.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }
            CodePattern::Suffix(suffix) => code
                .rsplit_once('.')
                .is_some_and(|(_, last)| last == suffix),
        }
    }
}

impl From<&str> for CodePattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

const RETRYABLE_CODES: &[&str] = &[
    "RequestLimitExceeded.*",
    "InternalError.*",
    "ResourceInUse.*",
    "ResourceBusy.*",
    "FailedOperation.OperationInProgress",
    "TradeUnknownError",
    "ClientError.NetworkError",
    "ClientError.HttpStatusCodeError",
    "ServiceUnavailable",
];

const FATAL_CODES: &[&str] = &[
    "InvalidParameter.*",
    "InvalidParameterValue.*",
    "MissingParameter.*",
    "UnknownParameter.*",
    "AuthFailure.*",
    "UnauthorizedOperation.*",
    "UnsupportedOperation.*",
    "InvalidAction",
];

const NOT_FOUND_CODES: &[&str] = &["ResourceNotFound.*", "*.NotFound"];

/// Rule table mapping remote error codes to a [`Classification`].
///
/// Built once, then shared read-only (typically behind an `Arc`). Rules are
/// consulted in order: not-found, fatal, retryable, then the path default.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    not_found: Vec<CodePattern>,
    fatal: Vec<CodePattern>,
    retryable: Vec<CodePattern>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let parse = |codes: &[&str]| -> Vec<CodePattern> {
            codes.iter().map(|c| CodePattern::parse(c)).collect()
        };
        Self {
            not_found: parse(NOT_FOUND_CODES),
            fatal: parse(FATAL_CODES),
            retryable: parse(RETRYABLE_CODES),
        }
    }
}

impl ErrorClassifier {
    /// A table with no rules; every code falls through to the path default.
    pub fn empty() -> Self {
        Self {
            not_found: Vec::new(),
            fatal: Vec::new(),
            retryable: Vec::new(),
        }
    }

    /// Start from the default table and extend it.
    pub fn builder() -> ClassifierBuilder {
        ClassifierBuilder {
            inner: Self::default(),
        }
    }

    pub fn is_not_found(&self, err: &RemoteError) -> bool {
        self.not_found.iter().any(|p| p.matches(&err.code))
    }

    pub fn classify(&self, err: &RemoteError, path: ErrorPath) -> Classification {
        if self.is_not_found(err) {
            return match path {
                ErrorPath::DeleteConfirmation => Classification::Absent,
                _ => Classification::NonRetryable,
            };
        }
        if self.fatal.iter().any(|p| p.matches(&err.code)) {
            return Classification::Fatal;
        }
        if self.retryable.iter().any(|p| p.matches(&err.code)) {
            return Classification::Retryable;
        }
        match path {
            ErrorPath::Write | ErrorPath::Read | ErrorPath::DeleteConfirmation => {
                Classification::Retryable
            }
            ErrorPath::Validation => Classification::NonRetryable,
        }
    }
}

/// Builder that extends a classifier's rule table
#[derive(Debug, Clone)]
pub struct ClassifierBuilder {
    inner: ErrorClassifier,
}

impl ClassifierBuilder {
    pub fn retryable(mut self, pattern: impl Into<CodePattern>) -> Self {
        self.inner.retryable.push(pattern.into());
        self
    }

    pub fn fatal(mut self, pattern: impl Into<CodePattern>) -> Self {
        self.inner.fatal.push(pattern.into());
        self
    }

    pub fn not_found(mut self, pattern: impl Into<CodePattern>) -> Self {
        self.inner.not_found.push(pattern.into());
        self
    }

    pub fn build(self) -> ErrorClassifier {
        self.inner
    }
}
