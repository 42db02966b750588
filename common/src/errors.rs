/// How a failed delivery is settled with the broker.
///
/// Every worker classifies its job errors into one of these kinds at the
/// handler boundary; the consume loop maps the kind onto the
/// ack/nack/error-queue discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The body failed JSON parsing or schema validation. The original body
    /// is dead-lettered and the delivery nacked without requeue.
    Malformed,
    /// A permanent application-level rejection (checksum mismatch, failed
    /// decryption, constraint violation). Dead-letter, nack without requeue,
    /// and the file row goes to ERROR where applicable.
    Policy,
    /// An environmental hiccup (storage, database, broker). The delivery is
    /// left unsettled so the broker redelivers it after the visibility
    /// window.
    Transient,
    /// Another worker already advanced the file past this stage. The
    /// delivery is acked and nothing is republished.
    Conflict,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::Policy => write!(f, "policy"),
            Self::Transient => write!(f, "transient"),
            Self::Conflict => write!(f, "conflict"),
        }
    }
}
