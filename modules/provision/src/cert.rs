use regex::Regex;
use std::sync::OnceLock;

/// What a certificate request actually did, read from the tool's text output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertOutcome {
    Issued,
    RateLimited,
    Failed(String),
    /// Exit status 0 but neither a success nor a failure message.
    Unknown,
}

impl CertOutcome {
    pub fn is_issued(&self) -> bool {
        matches!(self, CertOutcome::Issued)
    }
}

fn success_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)certificate installation was successful|certificate (has been )?(issued|installed)( successfully)?")
            .expect("valid regex")
    })
}

fn rate_limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)too many (certificates|failed authorizations|requests)|ratelimited|rate limit").expect("valid regex")
    })
}

fn failure_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(error|failed|failure|unauthorized|invalid response|timeout during connect)\b").expect("valid regex")
    })
}

/// Translate the certificate command's status and output into a [`CertOutcome`].
///
/// The tool has been seen to exit 0 after a failed challenge and non-zero
/// after installing a certificate, so the text decides whenever it is explicit.
pub fn classify_certificate_output(status: i32, output: &str) -> CertOutcome {
    if rate_limit_re().is_match(output) {
        return CertOutcome::RateLimited;
    }
    let failure_line = output.lines().find(|l| failure_re().is_match(l)).map(|l| l.trim().to_string());
    if success_re().is_match(output) && failure_line.is_none() {
        return CertOutcome::Issued;
    }
    if let Some(line) = failure_line {
        return CertOutcome::Failed(line);
    }
    if status == 0 {
        CertOutcome::Unknown
    } else {
        CertOutcome::Failed(format!("exit status {status}"))
    }
}
