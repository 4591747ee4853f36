// Unit tests for the SMTP relay.
//
// The pipeline is driven with a stub analysis boundary and a stub outbound
// transport, so every branch of the state machine (reject, forward,
// fail-open, forward failure, log failure) runs without a network. The last
// section speaks real SMTP to the session loop over a loopback socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use harmguard::db::models::{EmailAttemptLog, UNKNOWN};
use harmguard::email::transport::{MailTransport, OutboundMail, TransportError};
use harmguard::relay::{
    serve, AnalysisBoundary, BoundaryError, Envelope, HttpBoundary, Outcome, RelayPipeline,
    RelaySettings, SessionSettings,
};
use harmguard::scoring::category::{Category, CategoryScores};
use harmguard::scoring::fusion::ToxicVerdict;
use harmguard::scoring::threat::ThreatLevel;

// ============================================================
// Stubs
// ============================================================

enum Analysis {
    Verdict(ToxicVerdict),
    Fail,
    Hang,
}

struct StubBoundary {
    analysis: Analysis,
    fail_logging: bool,
    analyzed: Mutex<Vec<String>>,
    logged: Mutex<Vec<EmailAttemptLog>>,
}

impl StubBoundary {
    fn new(analysis: Analysis) -> Arc<Self> {
        Arc::new(Self {
            analysis,
            fail_logging: false,
            analyzed: Mutex::new(Vec::new()),
            logged: Mutex::new(Vec::new()),
        })
    }

    fn failing_logs(analysis: Analysis) -> Arc<Self> {
        Arc::new(Self {
            analysis,
            fail_logging: true,
            analyzed: Mutex::new(Vec::new()),
            logged: Mutex::new(Vec::new()),
        })
    }

    fn logged(&self) -> Vec<EmailAttemptLog> {
        self.logged.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisBoundary for StubBoundary {
    async fn quick_analyze(&self, content: &str) -> Result<ToxicVerdict, BoundaryError> {
        self.analyzed.lock().unwrap().push(content.to_string());
        match &self.analysis {
            Analysis::Verdict(v) => Ok(v.clone()),
            Analysis::Fail => Err(BoundaryError::Transport("connection refused".to_string())),
            Analysis::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(BoundaryError::Transport("unreachable".to_string()))
            }
        }
    }

    async fn log_attempt(&self, attempt: &EmailAttemptLog) -> Result<i64, BoundaryError> {
        if self.fail_logging {
            return Err(BoundaryError::Transport("database locked".to_string()));
        }
        let mut logged = self.logged.lock().unwrap();
        logged.push(attempt.clone());
        Ok(logged.len() as i64)
    }
}

struct StubTransport {
    fail: bool,
    sent: Mutex<Vec<OutboundMail>>,
}

impl StubTransport {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<OutboundMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for StubTransport {
    async fn send(&self, mail: &OutboundMail) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Send("upstream refused".to_string()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

fn verdict(level_score: f64, harm: Option<Category>) -> ToxicVerdict {
    let scores: CategoryScores = harm.map(|c| (c, level_score)).into_iter().collect();
    ToxicVerdict::from_parts(scores, level_score)
}

fn settings() -> RelaySettings {
    RelaySettings {
        analyze_timeout: Duration::from_millis(200),
        forward_timeout: Duration::from_millis(200),
        log_timeout: Duration::from_millis(200),
    }
}

fn envelope(subject: &str, body: &str) -> Envelope {
    Envelope {
        mail_from: "alice@example.com".to_string(),
        rcpt_to: vec!["bob@example.com".to_string()],
        data: format!("Subject: {subject}\r\nFrom: alice@example.com\r\n\r\n{body}\r\n")
            .into_bytes(),
    }
}

// ============================================================
// Pipeline state machine
// ============================================================

#[tokio::test]
async fn medium_verdict_is_rejected_and_not_forwarded() {
    let boundary = StubBoundary::new(Analysis::Verdict(verdict(0.55, Some(Category::Cyberbullying))));
    let transport = StubTransport::ok();
    let pipeline = RelayPipeline::new(boundary.clone(), transport.clone(), settings());

    let disposition = pipeline.process(&envelope("hey", "you stupid loser")).await;

    assert_eq!(disposition.reply.code, 550);
    assert_eq!(disposition.outcome, Outcome::Rejected);
    assert!(transport.sent().is_empty());
    assert!(disposition.audit.was_blocked);
    assert_eq!(disposition.audit.threat_level, "Medium");
    assert_eq!(disposition.audit.primary_harm_type, "cyberbullying");

    pipeline.record(&disposition.audit).await;
    let logged = boundary.logged();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].was_blocked);
}

#[tokio::test]
async fn high_verdict_is_rejected() {
    let boundary = StubBoundary::new(Analysis::Verdict(verdict(0.95, Some(Category::Threats))));
    let transport = StubTransport::ok();
    let pipeline = RelayPipeline::new(boundary, transport.clone(), settings());

    let disposition = pipeline.process(&envelope("hey", "I will kill you")).await;
    assert_eq!(disposition.reply.code, 550);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn low_verdict_is_forwarded() {
    let boundary = StubBoundary::new(Analysis::Verdict(verdict(0.05, None)));
    let transport = StubTransport::ok();
    let pipeline = RelayPipeline::new(boundary.clone(), transport.clone(), settings());

    let disposition = pipeline.process(&envelope("Lunch", "Hello, how are you?")).await;

    assert_eq!(disposition.reply.code, 250);
    assert_eq!(disposition.reply.text, "Message accepted for delivery");
    assert_eq!(disposition.outcome, Outcome::Forwarded { degraded: false });
    assert!(!disposition.audit.was_blocked);
    assert_eq!(disposition.audit.threat_level, "Low");
    assert_eq!(disposition.audit.primary_harm_type, "None");

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Lunch");
    assert_eq!(sent[0].to, vec!["bob@example.com".to_string()]);
    assert!(sent[0].body.contains("Hello, how are you?"));
}

#[tokio::test]
async fn analyzed_content_is_composed_from_envelope_and_message() {
    let boundary = StubBoundary::new(Analysis::Verdict(verdict(0.0, None)));
    let pipeline = RelayPipeline::new(boundary.clone(), StubTransport::ok(), settings());

    pipeline.process(&envelope("Plans", "see you at noon")).await;

    let analyzed = boundary.analyzed.lock().unwrap().clone();
    assert_eq!(analyzed.len(), 1);
    assert!(analyzed[0].starts_with(
        "From: alice@example.com\nTo: bob@example.com\nSubject: Plans\n\n"
    ));
    assert!(analyzed[0].contains("see you at noon"));
}

#[tokio::test]
async fn analysis_failure_fails_open() {
    let boundary = StubBoundary::new(Analysis::Fail);
    let transport = StubTransport::ok();
    let pipeline = RelayPipeline::new(boundary.clone(), transport.clone(), settings());

    let disposition = pipeline.process(&envelope("hey", "anything")).await;

    assert_eq!(disposition.reply.code, 250);
    assert!(disposition.reply.text.contains("analysis error"));
    assert_eq!(disposition.outcome, Outcome::Forwarded { degraded: true });
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(disposition.audit.threat_level, UNKNOWN);
    assert_eq!(disposition.audit.primary_harm_type, UNKNOWN);
    assert_eq!(disposition.audit.toxic_score, None);
    assert!(!disposition.audit.was_blocked);
}

#[tokio::test]
async fn analysis_timeout_fails_open() {
    let boundary = StubBoundary::new(Analysis::Hang);
    let transport = StubTransport::ok();
    let pipeline = RelayPipeline::new(boundary, transport.clone(), settings());

    let disposition = pipeline.process(&envelope("hey", "anything")).await;

    assert_eq!(disposition.outcome, Outcome::Forwarded { degraded: true });
    assert_eq!(disposition.audit.threat_level, UNKNOWN);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn forward_failure_is_transient_and_not_a_block() {
    let boundary = StubBoundary::new(Analysis::Verdict(verdict(0.1, None)));
    let pipeline = RelayPipeline::new(boundary, StubTransport::failing(), settings());

    let disposition = pipeline.process(&envelope("hey", "hello")).await;

    assert_eq!(disposition.reply.code, 554);
    assert!(disposition.reply.text.starts_with("Transaction failed:"));
    assert_eq!(disposition.outcome, Outcome::ForwardFailed { degraded: false });
    assert!(!disposition.audit.was_blocked);
    assert_eq!(disposition.audit.threat_level, "Low");
}

#[tokio::test]
async fn log_failure_does_not_change_the_reply() {
    let boundary = StubBoundary::failing_logs(Analysis::Verdict(verdict(0.8, Some(Category::Threats))));
    let pipeline = RelayPipeline::new(boundary.clone(), StubTransport::ok(), settings());

    let disposition = pipeline.process(&envelope("hey", "threat")).await;
    assert_eq!(disposition.reply.code, 550);

    // Must return without panicking or retrying
    pipeline.record(&disposition.audit).await;
    assert!(boundary.logged().is_empty());
    assert_eq!(disposition.reply.code, 550);
}

#[tokio::test]
async fn unparseable_data_is_analyzed_as_raw_body() {
    let boundary = StubBoundary::new(Analysis::Verdict(verdict(0.0, None)));
    let pipeline = RelayPipeline::new(boundary.clone(), StubTransport::ok(), settings());

    let disposition = pipeline
        .process(&Envelope {
            mail_from: "alice@example.com".to_string(),
            rcpt_to: vec!["bob@example.com".to_string()],
            data: b"just some words with no headers".to_vec(),
        })
        .await;

    assert_eq!(disposition.reply.code, 250);
    let analyzed = boundary.analyzed.lock().unwrap().clone();
    assert!(analyzed[0].contains("just some words"));
}

#[tokio::test]
async fn unreachable_analysis_api_fails_open_over_http() {
    // Reserve a port, then free it so nothing is listening there
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let boundary = HttpBoundary::new(&format!("http://{addr}/api"), Duration::from_secs(2)).unwrap();

    let err = boundary.quick_analyze("hello").await.unwrap_err();
    assert!(matches!(err, BoundaryError::Transport(_)), "got {err:?}");

    let transport = StubTransport::ok();
    let pipeline = RelayPipeline::new(
        Arc::new(boundary),
        transport.clone(),
        RelaySettings {
            analyze_timeout: Duration::from_secs(3),
            ..settings()
        },
    );
    let disposition = pipeline.process(&envelope("hey", "I will hurt you")).await;

    assert_eq!(
        disposition.reply.to_string(),
        "250 Message accepted for delivery (analysis error)"
    );
    assert_eq!(disposition.outcome, Outcome::Forwarded { degraded: true });
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(disposition.audit.threat_level, UNKNOWN);
    assert_eq!(disposition.audit.toxic_score, None);

    // The log call hits the same dead endpoint and is swallowed
    pipeline.record(&disposition.audit).await;
}

#[test]
fn verdict_helper_levels() {
    assert_eq!(verdict(0.55, None).threat_level, ThreatLevel::Medium);
    assert_eq!(verdict(0.05, None).threat_level, ThreatLevel::Low);
}

// ============================================================
// SMTP session over loopback
// ============================================================

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Read one (possibly multi-line) reply and return its final line.
    async fn reply(&mut self) -> String {
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            let line = line.trim_end().to_string();
            if line.len() < 4 || line.as_bytes()[3] == b' ' {
                return line;
            }
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.reply().await
    }
}

async fn start_relay(boundary: Arc<StubBoundary>, transport: Arc<StubTransport>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let pipeline = Arc::new(RelayPipeline::new(boundary, transport, settings()));
    tokio::spawn(serve(listener, pipeline, SessionSettings::default()));
    addr
}

async fn wait_for_log(boundary: &StubBoundary) -> Vec<EmailAttemptLog> {
    for _ in 0..50 {
        let logged = boundary.logged();
        if !logged.is_empty() {
            return logged;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    boundary.logged()
}

#[tokio::test]
async fn smtp_session_rejects_harmful_message() {
    let boundary = StubBoundary::new(Analysis::Verdict(verdict(0.6, Some(Category::HateSpeech))));
    let transport = StubTransport::ok();
    let addr = start_relay(boundary.clone(), transport.clone()).await;
    let mut client = Client::connect(addr).await;

    assert!(client.reply().await.starts_with("220 "));
    assert!(client.command("EHLO client.test").await.starts_with("250 "));
    assert!(client.command("MAIL FROM:<alice@example.com>").await.starts_with("250"));
    assert!(client.command("RCPT TO:<bob@example.com>").await.starts_with("250"));
    assert!(client.command("DATA").await.starts_with("354"));
    client.send("Subject: hello").await;
    client.send("").await;
    client.send("..leading dot line").await;
    let reply = client.command(".").await;
    assert!(reply.starts_with("550 "), "got {reply}");
    assert!(client.command("QUIT").await.starts_with("221"));

    assert!(transport.sent().is_empty());
    let logged = wait_for_log(&boundary).await;
    assert_eq!(logged.len(), 1);
    assert!(logged[0].was_blocked);
    assert_eq!(logged[0].sender, "alice@example.com");
    assert_eq!(logged[0].recipient, "bob@example.com");
    assert_eq!(logged[0].subject, "hello");

    let analyzed = boundary.analyzed.lock().unwrap().clone();
    assert!(analyzed[0].contains(".leading dot line"));
    assert!(!analyzed[0].contains("..leading"));
}

#[tokio::test]
async fn smtp_session_forwards_clean_message() {
    let boundary = StubBoundary::new(Analysis::Verdict(verdict(0.0, None)));
    let transport = StubTransport::ok();
    let addr = start_relay(boundary.clone(), transport.clone()).await;
    let mut client = Client::connect(addr).await;

    client.reply().await;
    client.command("HELO client.test").await;
    client.command("MAIL FROM:<alice@example.com>").await;
    client.command("RCPT TO:<bob@example.com>").await;
    client.command("RCPT TO:<carol@example.com>").await;
    client.command("DATA").await;
    client.send("Subject: Lunch").await;
    client.send("").await;
    client.send("Hello, how are you?").await;
    let reply = client.command(".").await;
    assert!(reply.starts_with("250 "), "got {reply}");
    client.command("QUIT").await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.len(), 2);

    let logged = wait_for_log(&boundary).await;
    assert_eq!(logged[0].recipient, "bob@example.com, carol@example.com");
    assert!(!logged[0].was_blocked);
}

#[tokio::test]
async fn smtp_session_enforces_command_order() {
    let addr = start_relay(
        StubBoundary::new(Analysis::Verdict(verdict(0.0, None))),
        StubTransport::ok(),
    )
    .await;
    let mut client = Client::connect(addr).await;

    client.reply().await;
    assert!(client.command("MAIL FROM:<a@example.com>").await.starts_with("503"));
    client.command("EHLO client.test").await;
    assert!(client.command("DATA").await.starts_with("503"));
    assert!(client.command("RCPT TO:<b@example.com>").await.starts_with("503"));
    assert!(client.command("FROB").await.starts_with("500"));
    assert!(client.command("NOOP").await.starts_with("250"));
    assert!(client.command("RSET").await.starts_with("250"));
    assert!(client.command("QUIT").await.starts_with("221"));
}

#[tokio::test]
async fn smtp_session_overlong_body_line_cannot_end_data_early() {
    let boundary = StubBoundary::new(Analysis::Verdict(verdict(0.0, None)));
    let transport = StubTransport::ok();
    let addr = start_relay(boundary.clone(), transport.clone()).await;
    let mut client = Client::connect(addr).await;

    client.reply().await;
    client.command("EHLO client.test").await;
    client.command("MAIL FROM:<alice@example.com>").await;
    client.command("RCPT TO:<bob@example.com>").await;
    assert!(client.command("DATA").await.starts_with("354"));
    client.send("Subject: padding").await;
    client.send("").await;
    client.send(&format!("{}.", "x".repeat(1000))).await;
    client.send("MAIL FROM:<smuggled@evil.test>").await;
    client.send("tail of the message").await;

    // The first reply the client sees is the end-of-DATA verdict
    let reply = client.command(".").await;
    assert!(reply.starts_with("500 "), "got {reply}");
    assert!(client.command("NOOP").await.starts_with("250"));

    assert!(transport.sent().is_empty());
    assert!(boundary.analyzed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn smtp_session_rejects_overlong_command_and_recovers() {
    let addr = start_relay(
        StubBoundary::new(Analysis::Verdict(verdict(0.0, None))),
        StubTransport::ok(),
    )
    .await;
    let mut client = Client::connect(addr).await;

    client.reply().await;
    let long = format!("EHLO {}", "a".repeat(2000));
    assert!(client.command(&long).await.starts_with("500 Line too long"));
    assert!(client.command("EHLO client.test").await.starts_with("250 "));
    assert!(client.command("QUIT").await.starts_with("221"));
}
