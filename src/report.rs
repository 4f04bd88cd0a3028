use crate::consent::Consent;
use crate::ring_buffer::RingBuffer;
use crate::webhook::{WebhookTransport, MESSAGE_LIMIT};
use std::collections::TryReserveError;

/// What happened to a crash report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The user has not consented; nothing was sent.
    Disabled,
    Sent,
    /// The transport failed. Not fatal: the crash is already in the log.
    TransportFailed,
}

impl ReportOutcome {
    pub fn delivered(self) -> bool {
        self == ReportOutcome::Sent
    }
}

#[derive(Debug)]
pub enum ReportError {
    /// Cannot allocate the buffer for the linearized tail.
    Alloc(TryReserveError),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Alloc(e) => write!(f, "cannot allocate crash report buffer: {e}"),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Alloc(e) => Some(e),
        }
    }
}

/// Sends the retained output tail of a crashed run, if allowed.
pub struct CrashReporter<'a, T: WebhookTransport + ?Sized> {
    transport: &'a T,
}

impl<'a, T: WebhookTransport + ?Sized> CrashReporter<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// Only call this for a run classified as crashed.
    pub fn report<C: Consent + ?Sized>(
        &self,
        tail: &RingBuffer,
        consent: &C,
    ) -> Result<ReportOutcome, ReportError> {
        if !consent.consent_allowed() {
            tracing::info!("crash reports are disabled, not sending a report");
            return Ok(ReportOutcome::Disabled);
        }

        let bytes = tail.linearize().map_err(ReportError::Alloc)?;
        // Output is arbitrary bytes; the tail may also start mid-character.
        let text = String::from_utf8_lossy(&bytes);
        let message = most_recent(&text, MESSAGE_LIMIT);

        tracing::info!(bytes = message.len(), "sending crash report");
        match self.transport.send(message) {
            Ok(()) => {
                tracing::info!("crash report sent");
                Ok(ReportOutcome::Sent)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "cannot send crash report, please attach the log file to an issue"
                );
                Ok(ReportOutcome::TransportFailed)
            }
        }
    }
}

/// The last `limit` bytes of `text`, cut forward to a character boundary.
///
/// Lossy decoding turns each invalid byte into a three-byte replacement
/// character, so the decoded tail can be larger than the raw one.
fn most_recent(text: &str, limit: usize) -> &str {
    let mut start = text.len().saturating_sub(limit);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::webhook::TransportError;
    use std::cell::{Cell, RefCell};

    /// Transport that records messages instead of sending them.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub sent: RefCell<Vec<String>>,
        pub fail: bool,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    impl WebhookTransport for RecordingTransport {
        fn send(&self, message: &str) -> Result<(), TransportError> {
            self.sent.borrow_mut().push(message.to_string());
            if self.fail {
                Err(TransportError::NotConfigured)
            } else {
                Ok(())
            }
        }
    }

    /// Counts how often consent was asked for.
    struct CountingConsent {
        allowed: bool,
        asked: Cell<u32>,
    }

    impl Consent for CountingConsent {
        fn consent_allowed(&self) -> bool {
            self.asked.set(self.asked.get() + 1);
            self.allowed
        }
    }

    fn ring(capacity: usize, data: &[u8]) -> RingBuffer {
        let mut ring = RingBuffer::new(capacity);
        data.iter().for_each(|&b| ring.push(b));
        ring
    }

    #[test]
    fn test_report_sends_tail_with_consent() {
        let transport = RecordingTransport::default();
        let outcome = CrashReporter::new(&transport)
            .report(&ring(64, b"panicked at main.rs\n"), &true)
            .unwrap();

        assert_eq!(outcome, ReportOutcome::Sent);
        assert!(outcome.delivered());
        assert_eq!(*transport.sent.borrow(), vec!["panicked at main.rs\n"]);
    }

    #[test]
    fn test_report_without_consent_skips_transport() {
        let transport = RecordingTransport::default();
        let consent = CountingConsent {
            allowed: false,
            asked: Cell::new(0),
        };
        let outcome = CrashReporter::new(&transport)
            .report(&ring(64, b"output"), &consent)
            .unwrap();

        assert_eq!(outcome, ReportOutcome::Disabled);
        assert!(!outcome.delivered());
        assert_eq!(consent.asked.get(), 1);
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_report_sends_only_most_recent_bytes() {
        let transport = RecordingTransport::default();
        CrashReporter::new(&transport)
            .report(&ring(5, b"0123456789"), &true)
            .unwrap();
        assert_eq!(*transport.sent.borrow(), vec!["56789"]);
    }

    #[test]
    fn test_transport_failure_is_not_an_error() {
        let transport = RecordingTransport::failing();
        let outcome = CrashReporter::new(&transport)
            .report(&ring(16, b"x"), &true)
            .unwrap();
        assert_eq!(outcome, ReportOutcome::TransportFailed);
        assert_eq!(transport.sent.borrow().len(), 1);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let transport = RecordingTransport::default();
        CrashReporter::new(&transport)
            .report(&ring(16, b"ok\xffok"), &true)
            .unwrap();
        assert_eq!(*transport.sent.borrow(), vec!["ok\u{fffd}ok"]);
    }

    #[test]
    fn test_invalid_utf8_tail_fits_message_limit() {
        let transport = RecordingTransport::default();
        let outcome = CrashReporter::new(&transport)
            .report(&ring(MESSAGE_LIMIT, &[0xff; MESSAGE_LIMIT]), &true)
            .unwrap();

        assert_eq!(outcome, ReportOutcome::Sent);
        let sent = transport.sent.borrow();
        assert!(sent[0].len() <= MESSAGE_LIMIT);
        // 666 replacement characters of 3 bytes each.
        assert_eq!(sent[0], "\u{fffd}".repeat(MESSAGE_LIMIT / 3));
    }

    #[test]
    fn test_most_recent_keeps_whole_characters() {
        assert_eq!(most_recent("abcdef", 3), "def");
        assert_eq!(most_recent("ab", 3), "ab");
        // "é" is two bytes; cutting inside it drops the whole character.
        assert_eq!(most_recent("aéb", 2), "b");
        assert_eq!(most_recent("aéb", 3), "éb");
    }

    #[test]
    fn test_empty_tail_sends_empty_message() {
        let transport = RecordingTransport::default();
        CrashReporter::new(&transport)
            .report(&RingBuffer::new(16), &true)
            .unwrap();
        assert_eq!(*transport.sent.borrow(), vec![""]);
    }
}
