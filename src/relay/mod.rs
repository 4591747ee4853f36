// SMTP filtering relay.
//
// Mail clients submit to the relay instead of their real SMTP server. Each
// message is scored through the analysis boundary; harmful mail is refused
// with a permanent 550, everything else is forwarded through the outbound
// transport. If the analysis itself fails, the message goes through anyway
// (fail-open) and the audit log records an "Unknown" verdict.

pub mod boundary;
pub mod pipeline;
pub mod session;

pub use boundary::{AnalysisBoundary, BoundaryError, HttpBoundary, LocalBoundary};
pub use pipeline::{Disposition, Envelope, Outcome, RelayPipeline, RelaySettings, SmtpReply};
pub use session::{run_relay, serve, SessionSettings};
