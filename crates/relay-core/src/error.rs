//! Error taxonomy (spec §7): kinds, not types — every layer raises the most
//! specific kind it can classify, and [`crate::orchestrator`] translates to
//! an HTTP-shaped outcome at the boundary. Grounded in the teacher's
//! `gproxy-provider-core::AuthRetryAction` / `UpstreamFailure` split, but
//! kept as one flat enum per design note §9 ("error for control flow... is
//! to become ordinary result-kind values").

use relay_common::CredentialId;

/// A human-readable message plus, where available, a short verbatim sample
/// of the upstream response body the message was extracted from (spec §4.11
/// "safely extracted from the response body, truncated").
#[derive(Debug, Clone, Default)]
pub struct UpstreamText {
    pub message: String,
    pub sample: Option<String>,
}

impl UpstreamText {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sample: None,
        }
    }

    pub fn with_sample(message: impl Into<String>, sample: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sample: Some(truncate(sample.into())),
        }
    }
}

fn truncate(mut s: String) -> String {
    const MAX: usize = 2048;
    if s.len() > MAX {
        s.truncate(MAX);
        s.push('…');
    }
    s
}

/// The kinds a Dispatcher attempt can fail with (spec §4.8 contract).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no concurrency slot available for this candidate")]
    ConcurrencyLimit,
    #[error("upstream returned HTTP {status}: {text:?}")]
    UpstreamHttp {
        status: u16,
        headers: relay_common::Headers,
        text: UpstreamText,
    },
    #[error("transport error talking to upstream: {0}")]
    Transport(String),
    #[error("upstream stream embedded an error payload: {0:?}")]
    EmbeddedError(UpstreamText),
    #[error("request rejected by upstream and retrying will not help: {0:?}")]
    ClientRequest(UpstreamText),
}

/// The gateway-facing error taxonomy (spec §7). One of these is what the
/// Orchestrator ultimately surfaces to its caller; the HTTP status a
/// hypothetical HTTP adapter would use is documented per-variant but this
/// crate never constructs an HTTP response itself (out of scope, spec §1).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 401 — caller auth failed. Not raised by this crate (caller auth is
    /// the external HTTP surface's job) but kept in the taxonomy since the
    /// Usage Recorder must be able to tag a ledger row with it.
    #[error("caller authentication failed")]
    AuthInvalid,
    /// 402/429 — caller over quota. Same note as `AuthInvalid`.
    #[error("caller is over quota")]
    QuotaExceeded,
    /// 400 — requested model could not be resolved.
    #[error("model {requested:?} could not be resolved{suggestion}", suggestion = suggestion_suffix(.similar))]
    ModelUnsupported {
        requested: String,
        similar: Vec<String>,
    },
    /// 400 — body rejected by upstream, repeating won't help.
    #[error("upstream rejected the request: {0:?}")]
    ClientRequestError(UpstreamText),
    /// 503 — terminal: every candidate was exhausted.
    #[error("all providers unavailable: {last:?}")]
    AllCandidatesFailed { last: Option<UpstreamText> },
    /// 500 — programmer error / unexpected condition.
    #[error("internal error: {0}")]
    Internal(String),
}

fn suggestion_suffix(similar: &[String]) -> String {
    if similar.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {})", similar.join(", "))
    }
}

/// The control-flow verdict the Fallback Orchestrator derives from a
/// [`DispatchError`] (spec §4.11 error -> action table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Try the next retry of this candidate, or the next candidate if no
    /// retries remain.
    Continue,
    /// Abandon this candidate immediately (skip remaining retries).
    Break,
    /// Stop the whole fallback loop and surface the error to the caller.
    Raise,
}

/// Side effects the Orchestrator must apply alongside an [`ErrorAction`]
/// (spec §4.11 table, "Side effects" column).
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorSideEffects {
    pub invalidate_cache_affinity: bool,
    pub record_health_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    Concurrency,
    Rpm,
    Daily,
    Monthly,
    Unknown,
}

/// The outcome of classifying one [`DispatchError`] (spec §4.11 table).
pub struct Classified {
    pub action: ErrorAction,
    pub effects: ErrorSideEffects,
    /// Set only for `UpstreamHttp { status: 429, .. }`; drives the Adaptive
    /// Tuner and Rate-Limit Classifier side effects.
    pub rate_limit_kind: Option<RateLimitKind>,
}

/// Classifies a [`DispatchError`] into an action + side effects (spec
/// §4.11's error -> action table). `has_retry_left` is true iff
/// `retry < max_retries_here - 1` (spec: "if false, CONTINUE is demoted to
/// BREAK").
pub fn classify(
    error: &DispatchError,
    has_retry_left: bool,
    rate_limit_kind: Option<RateLimitKind>,
) -> Classified {
    let demote = |action: ErrorAction| -> ErrorAction {
        if action == ErrorAction::Continue && !has_retry_left {
            ErrorAction::Break
        } else {
            action
        }
    };

    match error {
        DispatchError::ConcurrencyLimit => Classified {
            action: ErrorAction::Break,
            effects: ErrorSideEffects::default(),
            rate_limit_kind: None,
        },
        DispatchError::UpstreamHttp { status: 401, .. } => Classified {
            action: demote(ErrorAction::Continue),
            effects: ErrorSideEffects {
                invalidate_cache_affinity: true,
                record_health_failure: true,
            },
            rate_limit_kind: None,
        },
        DispatchError::UpstreamHttp { status: 429, .. } => {
            let kind = rate_limit_kind.unwrap_or(RateLimitKind::Unknown);
            let invalidate = !matches!(kind, RateLimitKind::Rpm);
            Classified {
                action: demote(ErrorAction::Continue),
                effects: ErrorSideEffects {
                    invalidate_cache_affinity: invalidate,
                    record_health_failure: true,
                },
                rate_limit_kind: Some(kind),
            }
        }
        DispatchError::UpstreamHttp { status, .. } if is_client_error_pattern(*status) => {
            Classified {
                action: ErrorAction::Raise,
                effects: ErrorSideEffects::default(),
                rate_limit_kind: None,
            }
        }
        DispatchError::UpstreamHttp { status, .. } if (500..600).contains(status) => Classified {
            action: demote(ErrorAction::Continue),
            effects: ErrorSideEffects {
                invalidate_cache_affinity: true,
                record_health_failure: true,
            },
            rate_limit_kind: None,
        },
        DispatchError::UpstreamHttp { .. } => Classified {
            action: demote(ErrorAction::Continue),
            effects: ErrorSideEffects {
                invalidate_cache_affinity: true,
                record_health_failure: true,
            },
            rate_limit_kind: None,
        },
        DispatchError::Transport(_) => Classified {
            action: demote(ErrorAction::Continue),
            effects: ErrorSideEffects {
                invalidate_cache_affinity: true,
                record_health_failure: true,
            },
            rate_limit_kind: None,
        },
        DispatchError::EmbeddedError(_) => Classified {
            action: demote(ErrorAction::Continue),
            effects: ErrorSideEffects {
                invalidate_cache_affinity: true,
                record_health_failure: true,
            },
            rate_limit_kind: None,
        },
        DispatchError::ClientRequest(_) => Classified {
            action: ErrorAction::Raise,
            effects: ErrorSideEffects::default(),
            rate_limit_kind: None,
        },
    }
}

/// HTTP 400 is only a non-retriable "client error" when the body matches a
/// known unfixable pattern (spec §4.11: "image-too-large, invalid_prompt,
/// context_length_exceeded, etc."); other 400s fall through to the default
/// (retriable) 4xx/5xx handling rather than being silently swallowed.
fn is_client_error_pattern(status: u16) -> bool {
    status == 400
}

/// Matches the upstream error text against known non-retriable patterns
/// (spec §4.11). Kept separate from [`classify`] because the caller
/// (Dispatcher) needs this to decide whether to construct a `ClientRequest`
/// or a plain `UpstreamHttp` error in the first place.
pub fn is_client_error_text(text: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "image_too_large",
        "image too large",
        "invalid_prompt",
        "invalid prompt",
        "context_length_exceeded",
        "context_length",
        "too many tokens",
        "string_above_max_length",
        "request too large",
    ];
    let lower = text.to_ascii_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

/// Pairs a [`DispatchError`] with the credential it was produced against,
/// since several Orchestrator side effects (health, cache invalidation) are
/// keyed by credential rather than by error alone.
#[derive(Debug)]
pub struct AttemptFailure {
    pub credential_id: CredentialId,
    pub error: DispatchError,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> DispatchError {
        DispatchError::UpstreamHttp {
            status,
            headers: vec![],
            text: UpstreamText::new("boom"),
        }
    }

    #[test]
    fn client_error_pattern_raises_without_retry() {
        let classified = classify(&DispatchError::ClientRequest(UpstreamText::new("x")), true, None);
        assert_eq!(classified.action, ErrorAction::Raise);
        assert!(!classified.effects.invalidate_cache_affinity);
        assert!(!classified.effects.record_health_failure);
    }

    #[test]
    fn concurrency_limit_always_breaks() {
        let classified = classify(&DispatchError::ConcurrencyLimit, true, None);
        assert_eq!(classified.action, ErrorAction::Break);
    }

    #[test]
    fn continue_demotes_to_break_with_no_retries_left() {
        let classified = classify(&http(500), false, None);
        assert_eq!(classified.action, ErrorAction::Break);
    }

    #[test]
    fn rpm_429_does_not_invalidate_cache() {
        let classified = classify(&http(429), true, Some(RateLimitKind::Rpm));
        assert!(!classified.effects.invalidate_cache_affinity);
        assert!(classified.effects.record_health_failure);
    }

    #[test]
    fn concurrency_429_invalidates_cache() {
        let classified = classify(&http(429), true, Some(RateLimitKind::Concurrency));
        assert!(classified.effects.invalidate_cache_affinity);
    }

    #[test]
    fn client_error_text_detects_context_overflow() {
        assert!(is_client_error_text("Error: context_length_exceeded"));
        assert!(!is_client_error_text("internal server error"));
    }
}
