//! Log setup with secret redaction
//!
//! Everything written by the fmt layer passes through [`RedactingWriter`], so
//! tokens that end up in error messages never reach the terminal.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
pub struct RedactionPatterns {
    slack_token: Regex,
    telegram_url: Regex,
    telegram_token: Regex,
    bearer: Regex,
    json_secret: Regex,
    form_secret: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            slack_token: Regex::new(r"xox[abposr]-[A-Za-z0-9-]+")?,
            telegram_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            telegram_token: Regex::new(r"[0-9]{8,10}:[A-Za-z0-9_-]{35}")?,
            bearer: Regex::new(r"(Bearer\s+)[A-Za-z0-9\-._~+/]+=*")?,
            json_secret: Regex::new(
                r#""(access_token|refresh_token|password|2fa-code)"\s*:\s*"[^"]*""#,
            )?,
            form_secret: Regex::new(r"\b(access_token|refresh_token|password)=[^\s&]+")?,
        })
    }

    /// Mask every secret found in `input`.
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .telegram_url
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .telegram_token
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .slack_token
            .replace_all(&output, "[SLACK_TOKEN]")
            .to_string();
        output = self.bearer.replace_all(&output, "${1}[MASKED]").to_string();
        output = self
            .json_secret
            .replace_all(&output, r#""$1":"[MASKED]""#)
            .to_string();
        output = self
            .form_secret
            .replace_all(&output, "$1=[MASKED]")
            .to_string();
        output
    }
}

/// Writer that redacts before forwarding to `inner`
pub struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text may be shorter or longer.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` wrapping every writer in a [`RedactingWriter`]
pub struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    /// Wrap writers produced by `make_inner`.
    pub const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `DEBUG_MODE=true` switches to debug
/// output and the default keeps HTTP internals quiet.
pub fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "doorbell_relay=info,hyper=warn,h2=error,reqwest=warn,tokio=warn,tower=warn,teloxide=warn",
            )
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}
