//! Script playback.
//!
//! [`ScriptPlayer`] walks a script line by line, sends each directive, reads a
//! response for queries and writes one transcript line per directive:
//!
//! ```text
//! 0000001: *RST
//! 0000002: *IDN?  --> Acme,Model1,SN123
//! 0000003: MEAS:VOLT?  --> Timeout
//! ```
//!
//! [`run_script`] wraps a whole run: open the script, open and configure the
//! session, play, release.

use crate::config::{ErrorPolicy, PlayerConfig};
use crate::directive::Directive;
use crate::error::{PlayerError, PlayerResult, TransportError};
use crate::reader::{MessageReader, ReadOutcome};
use crate::session::Session;
use crate::transport::Backend;
use crate::writer::MessageWriter;
use std::borrow::Cow;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Script lines seen, blank lines included.
    pub lines: u64,
    /// Directives sent.
    pub writes: u64,
    /// Queries among the directives sent.
    pub queries: u64,
    /// Queries that produced a response.
    pub responses: u64,
    /// Queries that got no answer within the timeout.
    pub timeouts: u64,
    /// Write or read failures other than timeouts.
    pub transport_errors: u64,
}

/// Plays directives against one open session.
pub struct ScriptPlayer<'s, W> {
    session: &'s mut Session,
    writer: MessageWriter,
    reader: MessageReader,
    policy: ErrorPolicy,
    transcript: W,
    summary: RunSummary,
}

impl<'s, W: Write> ScriptPlayer<'s, W> {
    /// Player over a configured `session`, writing the transcript to `transcript`.
    pub fn new(session: &'s mut Session, policy: ErrorPolicy, transcript: W) -> Self {
        let reader = MessageReader::for_session(session);
        Self {
            session,
            writer: MessageWriter::new(),
            reader,
            policy,
            transcript,
            summary: RunSummary::default(),
        }
    }

    /// Play every line of `script`.
    ///
    /// # Errors
    /// - [`PlayerError::Io`] if the script or transcript cannot be read or written
    /// - [`PlayerError::Write`] / [`PlayerError::Read`] under [`ErrorPolicy::Abort`]
    /// Bytes that are not valid UTF-8 are replaced and the line is still played.
    pub async fn play<R>(&mut self, mut script: R) -> PlayerResult<RunSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut raw = Vec::new();
        let mut line = 0u64;
        loop {
            raw.clear();
            if script.read_until(b'\n', &mut raw).await? == 0 {
                break;
            }
            if raw.last() == Some(&b'\n') {
                raw.pop();
            }
            line += 1;

            let text = String::from_utf8_lossy(&raw);
            if let Cow::Owned(_) = text {
                warn!(seq = line, "line is not valid UTF-8; invalid bytes replaced");
            }
            self.play_directive(&Directive::new(line, text)).await?;
        }
        self.transcript.flush()?;
        Ok(self.summary)
    }

    /// Send one directive and, for a query, read its response.
    pub async fn play_directive(&mut self, directive: &Directive) -> PlayerResult<()> {
        self.summary.lines += 1;
        let seq = directive.line;

        if directive.is_blank() {
            debug!(seq, "blank line skipped");
            writeln!(self.transcript, "{}", directive.label())?;
            return Ok(());
        }

        if let Err(source) = self.writer.write(self.session, &directive.text).await {
            return self.transport_failure(directive, PlayerError::Write { line: seq, source });
        }
        self.summary.writes += 1;

        if !directive.is_query() {
            info!(seq, directive = %directive.text, "directive sent");
            writeln!(self.transcript, "{}", directive.label())?;
            return Ok(());
        }
        self.summary.queries += 1;

        match self.reader.read(self.session).await {
            Ok(ReadOutcome::Complete(response)) => {
                self.summary.responses += 1;
                let text = response.trimmed();
                info!(
                    seq,
                    directive = %directive.text,
                    bytes = response.as_bytes().len(),
                    chunks = response.chunks(),
                    response = %text,
                    "query answered"
                );
                writeln!(self.transcript, "{}  --> {}", directive.label(), text)?;
            }
            Ok(ReadOutcome::TimedOut) => {
                self.summary.timeouts += 1;
                warn!(seq, directive = %directive.text, "Timeout");
                writeln!(self.transcript, "{}  --> Timeout", directive.label())?;
            }
            Err(source) => {
                return self.transport_failure(directive, PlayerError::Read { line: seq, source });
            }
        }
        Ok(())
    }

    /// Counters so far.
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Give back the transcript sink.
    pub fn into_transcript(self) -> W {
        self.transcript
    }

    fn transport_failure(&mut self, directive: &Directive, err: PlayerError) -> PlayerResult<()> {
        let status = err.transport_error().map(TransportError::status_code);
        error!(
            seq = directive.line,
            directive = %directive.text,
            status = ?status,
            error = %err,
            "transport failure"
        );
        match self.policy {
            ErrorPolicy::Abort => Err(err),
            ErrorPolicy::Continue => {
                self.summary.transport_errors += 1;
                let cause = err
                    .transport_error()
                    .map_or_else(|| err.to_string(), ToString::to_string);
                writeln!(self.transcript, "{}  --> Error: {}", directive.label(), cause)?;
                Ok(())
            }
        }
    }
}

/// Open a script for playback.
///
/// # Errors
/// [`PlayerError::FileNotFound`] if `path` does not exist or is not a regular file.
pub async fn open_script(path: &Path) -> PlayerResult<File> {
    let not_found = || PlayerError::FileNotFound(path.to_path_buf());
    let file = File::open(path).await.map_err(|err| match err.kind() {
        ErrorKind::NotFound => not_found(),
        _ => PlayerError::Io(err),
    })?;
    if !file.metadata().await?.is_file() {
        return Err(not_found());
    }
    Ok(file)
}

/// Run `script` against the instrument described by `config`.
///
/// The script is opened before any transport call, so a missing file never touches
/// the instrument. The session is released on every path.
///
/// # Errors
/// Any [`PlayerError`]. Under [`ErrorPolicy::Continue`] a run that logged transport
/// failures ends with [`PlayerError::PlaybackErrors`].
pub async fn run_script<W: Write>(
    config: &PlayerConfig,
    script: &Path,
    backend: Box<dyn Backend>,
    transcript: W,
) -> PlayerResult<RunSummary> {
    let file = open_script(script).await?;

    let span = info_span!("run", script = %script.display(), resource = %config.transport.resource);
    async move {
        let mut session = Session::open(backend, config.transport.resource.clone()).await?;
        session.configure(config.transport.session_settings())?;

        let summary = {
            let mut player =
                ScriptPlayer::new(&mut session, config.playback.on_transport_error, transcript);
            player.play(BufReader::new(file)).await?
        };

        if let Err(err) = session.close() {
            warn!(error = %err, "failed to release instrument session");
        }

        info!(
            lines = summary.lines,
            writes = summary.writes,
            queries = summary.queries,
            responses = summary.responses,
            timeouts = summary.timeouts,
            transport_errors = summary.transport_errors,
            "playback finished"
        );

        if summary.transport_errors > 0 {
            return Err(PlayerError::PlaybackErrors(summary.transport_errors));
        }
        Ok(summary)
    }
    .instrument(span)
    .await
}
