//! Connection-failure classification
//!
//! Start failures are sorted into configuration errors (fail fast, no
//! backoff) and transient connectivity errors (retryable, counted against
//! the unreachable threshold). Typed signals in the cause chain are checked
//! first; message fragments are the classifier of last resort.

use corral_core::Error;
use regex::Regex;
use std::sync::LazyLock;

const CONFIGURATION_FRAGMENTS: &[&str] = &[
    "certificate",
    "x509",
    "tls handshake",
    "certificate expired",
    "certificate not valid",
];

const CONNECTIVITY_FRAGMENTS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "no such host",
    "network unreachable",
    "host unreachable",
    "no route to host",
    "dial tcp",
    "dial unix",
    "i/o timeout",
    "eof",
    "connection closed",
    "context deadline exceeded",
    "context canceled",
];

const SERVER_ERROR_PHRASES: &[&str] = &[
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "http version not supported",
    "variant also negotiates",
];

static STATUS_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"status[ :]+(\d{3})").expect("hard-coded pattern compiles"));

/// Whether the error points at a certificate/TLS misconfiguration.
///
/// Configuration errors are non-transient: the server stays `Failed` with
/// no failure-counter increment and no scheduled retry.
pub fn is_configuration_error(error: &Error) -> bool {
    let text = chain_text(error);
    CONFIGURATION_FRAGMENTS
        .iter()
        .any(|fragment| text.contains(fragment))
}

/// Whether the error looks like a transient connectivity failure.
///
/// Checked in order: a typed timeout or OS-level network error anywhere in
/// the cause chain, then well-known connectivity fragments, then HTTP
/// 500–511 signaled numerically (`status 503`) or by descriptive phrase.
pub fn is_transient_error(error: &Error) -> bool {
    if matches!(error, Error::Timeout(_)) {
        return true;
    }

    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if is_network_io_kind(io.kind()) {
                return true;
            }
        }
        current = e.source();
    }

    let text = chain_text(error);
    if CONNECTIVITY_FRAGMENTS
        .iter()
        .any(|fragment| text.contains(fragment))
    {
        return true;
    }
    if SERVER_ERROR_PHRASES
        .iter()
        .any(|phrase| text.contains(phrase))
    {
        return true;
    }
    has_server_error_status(&text)
}

fn is_network_io_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::NetworkDown
    )
}

fn has_server_error_status(text: &str) -> bool {
    STATUS_CODE.captures_iter(text).any(|caps| {
        caps[1]
            .parse::<u16>()
            .map(|code| (500..=511).contains(&code))
            .unwrap_or(false)
    })
}

/// Lower-cased concatenation of every message in the cause chain.
fn chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = String::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = current {
        if !text.is_empty() {
            text.push_str(": ");
        }
        text.push_str(&e.to_string());
        current = e.source();
    }
    text.to_lowercase()
}
