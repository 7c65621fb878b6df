use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::SyntaxResult;
use crate::config::LanguageProfile;
use crate::process::bounded::run_bounded;

/// Parses stdin with `ast.parse`; exit 1 plus a one-line diagnostic on failure.
const PARSE_CHECK_SCRIPT: &str = r#"import ast, sys
source = sys.stdin.buffer.read()
try:
    ast.parse(source, filename="<snippet>")
except SyntaxError as e:
    sys.stderr.write("%s: %s (line %s)" % (type(e).__name__, e.msg, e.lineno))
    sys.exit(1)
except ValueError as e:
    sys.stderr.write("ValueError: %s" % e)
    sys.exit(1)
"#;

/// Checks a snippet against the language grammar without running it.
#[derive(Debug, Clone)]
pub struct SyntaxValidator {
    language: LanguageProfile,
    timeout: Duration,
}

impl SyntaxValidator {
    pub fn new(language: LanguageProfile, timeout: Duration) -> Self {
        Self { language, timeout }
    }

    /// Never fails: checker faults become an invalid result with a diagnostic.
    pub async fn validate(&self, code: &str) -> SyntaxResult {
        if code.trim().is_empty() {
            return SyntaxResult::invalid("empty snippet");
        }

        let mut cmd = Command::new(&self.language.interpreter);
        cmd.args(&self.language.interpreter_args)
            .arg("-c")
            .arg(PARSE_CHECK_SCRIPT);

        match run_bounded(cmd, Some(code.as_bytes()), self.timeout).await {
            Ok(out) if out.success() => SyntaxResult::valid(),
            Ok(out) if out.timed_out => {
                warn!(
                    "Syntax check exceeded {:.1}s",
                    self.timeout.as_secs_f64()
                );
                SyntaxResult::invalid("syntax check timed out")
            }
            Ok(out) => {
                let message = out.stderr.trim();
                debug!("Snippet rejected by parser: {}", message);
                SyntaxResult::invalid(if message.is_empty() {
                    "syntax error".to_string()
                } else {
                    message.to_string()
                })
            }
            Err(e) => {
                warn!("Syntax check unavailable ({}): {}", e.kind(), e);
                SyntaxResult::invalid(format!("syntax check unavailable: {}", e))
            }
        }
    }
}
