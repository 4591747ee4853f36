// SMTP server loop for the relay.
//
// Speaks enough of RFC 5321 for a mail client or MTA to hand us a message:
// HELO/EHLO, MAIL FROM, RCPT TO, DATA, RSET, NOOP, VRFY, QUIT. Each
// connection runs in its own task; the only thing sessions share is the
// RelayPipeline behind an Arc.
//
// The reply to DATA is written before the audit log is stored, and the log
// write runs in its own task so it can't hold up the client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::pipeline::{Envelope, RelayPipeline, SmtpReply};

/// Longest command or text line accepted, CRLF included (RFC 5321 text line limit).
const MAX_LINE_BYTES: usize = 1000;
const MAX_RECIPIENTS: usize = 100;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Name announced in the greeting and HELO replies.
    pub hostname: String,
    /// Close the connection after this long without a line from the client.
    pub idle_timeout: Duration,
    /// Largest DATA payload accepted.
    pub max_message_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            hostname: "harmguard".to_string(),
            idle_timeout: Duration::from_secs(300),
            max_message_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Bind and serve until the process exits.
pub async fn run_relay(
    pipeline: Arc<RelayPipeline>,
    settings: SessionSettings,
    bind: &str,
    port: u16,
) -> Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("harmguard SMTP relay listening on {addr}");
    serve(listener, pipeline, settings).await
}

/// Accept connections on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    pipeline: Arc<RelayPipeline>,
    settings: SessionSettings,
) -> Result<()> {
    let settings = Arc::new(settings);
    loop {
        let (stream, peer) = listener.accept().await?;
        let pipeline = Arc::clone(&pipeline);
        let settings = Arc::clone(&settings);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, pipeline, settings).await {
                warn!(%peer, error = %e, "SMTP session ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    pipeline: Arc<RelayPipeline>,
    settings: Arc<SessionSettings>,
) -> Result<()> {
    debug!(%peer, "SMTP connection opened");
    let (reader, writer) = stream.into_split();
    let mut session = Session::new(BufReader::new(reader), writer, pipeline, settings);
    session.run().await?;
    debug!(%peer, "SMTP connection closed");
    Ok(())
}

/// Per-transaction envelope state.
#[derive(Debug, Default)]
struct Transaction {
    mail_from: Option<String>,
    rcpt_to: Vec<String>,
}

/// Result of reading one line from the client.
#[derive(Debug, PartialEq)]
enum ReadOutcome {
    Line(Vec<u8>),
    /// Longer than MAX_LINE_BYTES; everything up to the newline was discarded.
    TooLong,
    Eof,
    Idle,
}

/// One SMTP conversation over any async reader/writer pair.
pub struct Session<R, W> {
    reader: R,
    writer: W,
    pipeline: Arc<RelayPipeline>,
    settings: Arc<SessionSettings>,
    greeted: bool,
    transaction: Transaction,
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: R,
        writer: W,
        pipeline: Arc<RelayPipeline>,
        settings: Arc<SessionSettings>,
    ) -> Self {
        Self {
            reader,
            writer,
            pipeline,
            settings,
            greeted: false,
            transaction: Transaction::default(),
        }
    }

    async fn reply(&mut self, reply: &SmtpReply) -> Result<()> {
        self.writer
            .write_all(format!("{reply}\r\n").as_bytes())
            .await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<ReadOutcome> {
        match timeout(self.settings.idle_timeout, read_capped_line(&mut self.reader)).await {
            Err(_) => Ok(ReadOutcome::Idle),
            Ok(result) => Ok(result?),
        }
    }

    async fn idle_bye(&mut self) -> Result<()> {
        let bye = SmtpReply::new(
            421,
            format!("{} Timeout, closing connection", self.settings.hostname),
        );
        self.reply(&bye).await
    }

    /// Drive the conversation until QUIT, EOF, or idle timeout.
    pub async fn run(&mut self) -> Result<()> {
        let greeting = SmtpReply::new(220, format!("{} ESMTP ready", self.settings.hostname));
        self.reply(&greeting).await?;

        loop {
            let line = match self.read_line().await? {
                ReadOutcome::Line(line) => line,
                ReadOutcome::TooLong => {
                    self.reply(&SmtpReply::new(500, "Line too long")).await?;
                    continue;
                }
                ReadOutcome::Eof => return Ok(()),
                ReadOutcome::Idle => return self.idle_bye().await,
            };

            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            let (verb, arg) = match line.split_once(' ') {
                Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
                None => (line.to_ascii_uppercase(), ""),
            };

            match verb.as_str() {
                "HELO" | "EHLO" => self.hello(&verb, arg).await?,
                "MAIL" => self.mail(arg).await?,
                "RCPT" => self.rcpt(arg).await?,
                "DATA" => self.data().await?,
                "RSET" => {
                    self.transaction = Transaction::default();
                    self.reply(&SmtpReply::new(250, "OK")).await?;
                }
                "NOOP" => self.reply(&SmtpReply::new(250, "OK")).await?,
                "VRFY" => {
                    self.reply(&SmtpReply::new(252, "Cannot VRFY user, but will accept message"))
                        .await?
                }
                "QUIT" => {
                    self.reply(&SmtpReply::new(221, "Bye")).await?;
                    return Ok(());
                }
                _ => {
                    self.reply(&SmtpReply::new(500, "Command not recognized"))
                        .await?
                }
            }
        }
    }

    async fn hello(&mut self, verb: &str, domain: &str) -> Result<()> {
        if domain.is_empty() {
            return self
                .reply(&SmtpReply::new(501, format!("Syntax: {verb} hostname")))
                .await;
        }

        self.greeted = true;
        self.transaction = Transaction::default();

        if verb == "EHLO" {
            let extensions = format!(
                "250-{}\r\n250-SIZE {}\r\n250-8BITMIME\r\n250 HELP\r\n",
                self.settings.hostname, self.settings.max_message_bytes
            );
            self.writer.write_all(extensions.as_bytes()).await?;
            self.writer.flush().await?;
            Ok(())
        } else {
            let hostname = self.settings.hostname.clone();
            self.reply(&SmtpReply::new(250, hostname)).await
        }
    }

    async fn mail(&mut self, arg: &str) -> Result<()> {
        if !self.greeted {
            return self
                .reply(&SmtpReply::new(503, "Error: send HELO/EHLO first"))
                .await;
        }
        if self.transaction.mail_from.is_some() {
            return self
                .reply(&SmtpReply::new(503, "Error: nested MAIL command"))
                .await;
        }

        match parse_path(arg, "FROM:") {
            // The null sender <> is allowed for bounces
            Some(address) => {
                self.transaction.mail_from = Some(address);
                self.reply(&SmtpReply::new(250, "OK")).await
            }
            None => {
                self.reply(&SmtpReply::new(501, "Syntax: MAIL FROM:<address>"))
                    .await
            }
        }
    }

    async fn rcpt(&mut self, arg: &str) -> Result<()> {
        if self.transaction.mail_from.is_none() {
            return self
                .reply(&SmtpReply::new(503, "Error: need MAIL command"))
                .await;
        }
        if self.transaction.rcpt_to.len() >= MAX_RECIPIENTS {
            return self
                .reply(&SmtpReply::new(452, "Too many recipients"))
                .await;
        }

        match parse_path(arg, "TO:").filter(|a| !a.is_empty()) {
            Some(address) => {
                self.transaction.rcpt_to.push(address);
                self.reply(&SmtpReply::new(250, "OK")).await
            }
            None => {
                self.reply(&SmtpReply::new(501, "Syntax: RCPT TO:<address>"))
                    .await
            }
        }
    }

    async fn data(&mut self) -> Result<()> {
        if self.transaction.rcpt_to.is_empty() {
            return self
                .reply(&SmtpReply::new(503, "Error: need RCPT command"))
                .await;
        }

        self.reply(&SmtpReply::new(354, "End data with <CR><LF>.<CR><LF>"))
            .await?;

        let mut data = Vec::new();
        let mut oversized = false;
        let mut long_line = false;
        loop {
            let line = match self.read_line().await? {
                ReadOutcome::Line(line) => line,
                ReadOutcome::TooLong => {
                    long_line = true;
                    continue;
                }
                // Client went away mid-message: nothing to reply to
                ReadOutcome::Eof => return Ok(()),
                ReadOutcome::Idle => return self.idle_bye().await,
            };

            if line == b".\r\n" || line == b".\n" {
                break;
            }

            // Dot-unstuffing
            let content = if line.starts_with(b"..") {
                &line[1..]
            } else {
                &line[..]
            };

            if data.len() + content.len() > self.settings.max_message_bytes {
                oversized = true;
            }
            if !oversized {
                data.extend_from_slice(content);
            }
        }

        let transaction = std::mem::take(&mut self.transaction);

        if oversized {
            return self
                .reply(&SmtpReply::new(552, "Message exceeds maximum size"))
                .await;
        }
        if long_line {
            return self.reply(&SmtpReply::new(500, "Line too long")).await;
        }

        let envelope = Envelope {
            mail_from: transaction.mail_from.unwrap_or_default(),
            rcpt_to: transaction.rcpt_to,
            data,
        };

        let disposition = self.pipeline.process(&envelope).await;
        self.reply(&disposition.reply).await?;

        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            pipeline.record(&disposition.audit).await;
        });

        Ok(())
    }
}

/// Read through the next `\n`, keeping at most MAX_LINE_BYTES.
///
/// A longer line is consumed to its end and reported as `TooLong`, so the
/// bytes after the cap are never mistaken for the start of a new line.
async fn read_capped_line<R>(reader: &mut R) -> std::io::Result<ReadOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut too_long = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (too_long, line.is_empty()) {
                (true, _) => ReadOutcome::TooLong,
                (false, true) => ReadOutcome::Eof,
                (false, false) => ReadOutcome::Line(line),
            });
        }

        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        if !too_long {
            if line.len() + used > MAX_LINE_BYTES {
                too_long = true;
                line.clear();
            } else {
                line.extend_from_slice(&available[..used]);
            }
        }
        reader.consume(used);

        if complete {
            return Ok(if too_long {
                ReadOutcome::TooLong
            } else {
                ReadOutcome::Line(line)
            });
        }
    }
}

/// Extract the address from `FROM:<a@b> SIZE=1` / `TO:<a@b>`.
/// Returns an empty string for the null path `<>`.
pub fn parse_path(arg: &str, prefix: &str) -> Option<String> {
    let head = arg.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = arg[prefix.len()..].trim_start();

    if let Some(inner) = rest.strip_prefix('<') {
        let end = inner.find('>')?;
        return Some(inner[..end].trim().to_string());
    }

    // Some clients omit the brackets
    let address = rest.split_whitespace().next()?;
    Some(address.to_string())
}
