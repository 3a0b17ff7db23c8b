//! Subprocess worker implementation
//!
//! Runs an agent CLI in headless mode, piping the prompt to its stdin and
//! parsing `--output-format stream-json` output line by line. Token counts
//! and the continuation session id come from the structured result envelope
//! when present; otherwise the output is scanned for token-count-like text,
//! and as a last resort output tokens are estimated from character count.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ChunkSink, TokenUsage, Worker, WorkerOutcome};
use crate::agent::{AgentProfile, Verbosity};
use crate::{Error, Result};

/// Worker that shells out to an agent CLI binary
pub struct CliWorker {
    /// Program plus leading arguments, split from the configured command line
    command: Vec<String>,
    /// Model used when the profile carries no model or tier hint
    default_model: String,
    /// Skip the CLI's permission prompts (needed for unattended runs)
    skip_permissions: bool,
}

/// Structured fields from the final result envelope
#[derive(Debug, Default)]
struct ResultEnvelope {
    success: bool,
    result: Option<String>,
    usage: Option<TokenUsage>,
    session_id: Option<String>,
}

/// One parsed line of worker output
#[derive(Debug)]
enum OutputLine {
    /// Assistant text content
    Text(String),
    /// Final result envelope
    Result(ResultEnvelope),
    /// Stream-level error
    Error(String),
}

impl CliWorker {
    /// Create a worker from a configured command line, e.g. `"claude"` or
    /// `"~/bin/claude --settings strict.json"`.
    pub fn new(
        command_line: &str,
        default_model: impl Into<String>,
        skip_permissions: bool,
    ) -> Result<Self> {
        let expanded = shellexpand::tilde(command_line).into_owned();
        let command = shell_words::split(&expanded)
            .map_err(|e| Error::Config(format!("invalid worker command: {}", e)))?;
        if command.is_empty() {
            return Err(Error::Config("worker command is empty".to_string()));
        }

        Ok(Self {
            command,
            default_model: default_model.into(),
            skip_permissions,
        })
    }

    /// Build CLI arguments for one invocation
    fn build_args(&self, profile: &AgentProfile, model: &str, resume: Option<&str>) -> Vec<String> {
        let mut args = vec![];

        // Print mode, prompt arrives on stdin
        args.push("-p".to_string());

        // Structured streaming output
        args.push("--output-format".to_string());
        args.push("stream-json".to_string());

        args.push("--model".to_string());
        args.push(model.to_string());

        // A resumed session already carries the system context
        if resume.is_none() {
            args.push("--append-system-prompt".to_string());
            args.push(system_prompt(profile));
        }

        if !profile.capabilities.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(profile.capabilities.join(","));
        }

        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        if let Some(session_id) = resume {
            args.push("--resume".to_string());
            args.push(session_id.to_string());
        }

        args
    }

    /// Parse a single stream-json line
    fn parse_output_line(&self, line: &str) -> Option<OutputLine> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let json: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!("Skipping non-JSON output line: {} - {}", e, line);
                return None;
            }
        };

        match json.get("type").and_then(|t| t.as_str())? {
            // Full assistant message with content blocks
            "assistant" => {
                let blocks = json.get("message").and_then(|m| m.get("content"))?;
                let mut text = String::new();
                for block in blocks.as_array()? {
                    if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                        if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                            text.push_str(t);
                        }
                    }
                }
                if text.is_empty() {
                    None
                } else {
                    Some(OutputLine::Text(text))
                }
            }

            // Streaming text delta
            "content_block_delta" => {
                let text = json
                    .get("delta")
                    .and_then(|d| d.get("text"))
                    .and_then(|t| t.as_str())?;
                Some(OutputLine::Text(text.to_string()))
            }

            // Final envelope: carries the success flag, exact token counts,
            // cost, and the continuation session id
            "result" => {
                let is_error = json
                    .get("is_error")
                    .and_then(|e| e.as_bool())
                    .unwrap_or(false);

                let usage = json.get("usage").map(|u| {
                    let input = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    let output = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    let mut usage = TokenUsage::new(input, output);
                    usage.cost = json.get("total_cost_usd").and_then(|c| c.as_f64());
                    usage
                });

                Some(OutputLine::Result(ResultEnvelope {
                    success: !is_error,
                    result: json
                        .get("result")
                        .and_then(|r| r.as_str())
                        .map(|s| s.to_string()),
                    usage,
                    session_id: json
                        .get("session_id")
                        .and_then(|s| s.as_str())
                        .map(|s| s.to_string()),
                }))
            }

            "error" => {
                let msg = json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .or_else(|| json.get("message").and_then(|m| m.as_str()))
                    .unwrap_or("unknown worker error");
                Some(OutputLine::Error(msg.to_string()))
            }

            other => {
                debug!("Ignoring message type: {}", other);
                None
            }
        }
    }
}

#[async_trait]
impl Worker for CliWorker {
    fn name(&self) -> &str {
        "cli"
    }

    async fn invoke(
        &self,
        profile: &AgentProfile,
        prompt: &str,
        resume: Option<&str>,
        on_chunk: ChunkSink<'_>,
        cancel: CancellationToken,
    ) -> Result<WorkerOutcome> {
        let model = profile.resolved_model(&self.default_model).to_string();
        let args = self.build_args(profile, &model, resume);
        debug!("Running: {} {:?}", self.command[0], args);

        let mut command = Command::new(&self.command[0]);
        command
            .args(&self.command[1..])
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(max) = profile.max_output_tokens {
            command.env("CLAUDE_CODE_MAX_OUTPUT_TOKENS", max.to_string());
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Worker(format!("failed to spawn worker: {}", e)))?;

        // Pipe the prompt to the worker and close its stdin so it runs
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Worker("failed to open worker stdin".to_string()))?;
        stdin.write_all(prompt.as_bytes()).await?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Worker("failed to capture worker stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Worker("failed to capture worker stderr".to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        let mut output = String::new();
        let mut envelope: Option<ResultEnvelope> = None;
        let mut stream_error: Option<String> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Worker invocation cancelled, killing subprocess");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(WorkerOutcome {
                        success: false,
                        output,
                        error: Some("invocation cancelled".to_string()),
                        ..Default::default()
                    });
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match self.parse_output_line(&line) {
                        Some(OutputLine::Text(text)) => {
                            on_chunk(&text);
                            output.push_str(&text);
                        }
                        Some(OutputLine::Result(env)) => envelope = Some(env),
                        Some(OutputLine::Error(e)) => stream_error = Some(e),
                        None => {}
                    },
                    Ok(None) => break,
                    Err(e) => {
                        stream_error = Some(format!("failed reading worker output: {}", e));
                        break;
                    }
                }
            }
        }

        let mut stderr_text = String::new();
        let _ = stderr.read_to_string(&mut stderr_text).await;
        let status = child.wait().await?;
        if !status.success() {
            warn!("Worker exited with status: {}", status);
        }

        let mut outcome = WorkerOutcome {
            exit_code: status.code(),
            ..Default::default()
        };

        match envelope {
            Some(env) => {
                outcome.success = env.success && status.success();
                outcome.usage = env.usage;
                outcome.session_id = env.session_id;
                if output.is_empty() {
                    if let Some(result) = env.result {
                        output = result;
                    }
                }
            }
            None => {
                outcome.success = status.success() && stream_error.is_none();
            }
        }

        if !outcome.success {
            outcome.error = stream_error.or_else(|| {
                let stderr_text = stderr_text.trim();
                if stderr_text.is_empty() {
                    Some(format!("worker exited with status {}", status))
                } else {
                    Some(stderr_text.to_string())
                }
            });
        }

        if outcome.usage.is_none() {
            outcome.usage =
                Some(scan_usage(&output).unwrap_or_else(|| estimate_usage(prompt, &output)));
        }

        outcome.output = output;
        Ok(outcome)
    }
}

/// Scan free text for token-count-like substrings, e.g. "1,234 input tokens".
fn scan_usage(text: &str) -> Option<TokenUsage> {
    static INPUT_RE: OnceLock<regex::Regex> = OnceLock::new();
    static OUTPUT_RE: OnceLock<regex::Regex> = OnceLock::new();

    let input_re = INPUT_RE.get_or_init(|| {
        regex::Regex::new(r"(?i)([0-9][0-9,]*)\s*(?:input|prompt)\s+tokens").unwrap()
    });
    let output_re = OUTPUT_RE.get_or_init(|| {
        regex::Regex::new(r"(?i)([0-9][0-9,]*)\s*(?:output|completion)\s+tokens").unwrap()
    });

    let input = capture_count(input_re, text)?;
    let output = capture_count(output_re, text)?;
    Some(TokenUsage::new(input, output))
}

fn capture_count(re: &regex::Regex, text: &str) -> Option<u64> {
    let raw = re.captures(text)?.get(1)?.as_str().replace(',', "");
    raw.parse().ok()
}

/// Last-resort estimate: roughly four characters per token.
fn estimate_usage(prompt: &str, output: &str) -> TokenUsage {
    TokenUsage::new(
        (prompt.chars().count() / 4) as u64,
        (output.chars().count() / 4) as u64,
    )
}

fn system_prompt(profile: &AgentProfile) -> String {
    let mut prompt = profile.instructions.clone();
    match profile.verbosity {
        Some(Verbosity::Terse) => prompt.push_str("\nKeep responses brief."),
        Some(Verbosity::Verbose) => prompt.push_str("\nExplain your reasoning in full."),
        Some(Verbosity::Normal) | None => {}
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentRegistry, AgentRole};

    fn test_worker() -> CliWorker {
        CliWorker::new("claude", "sonnet", false).unwrap()
    }

    fn scout_profile() -> AgentProfile {
        AgentRegistry::builtin()
            .get(AgentRole::Scout)
            .unwrap()
            .clone()
    }

    #[test]
    fn test_parse_assistant_message() {
        let worker = test_worker();
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"},{"type":"text","text":" world"}]}}"#;
        match worker.parse_output_line(line) {
            Some(OutputLine::Text(text)) => assert_eq!(text, "Hello world"),
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_parse_content_delta() {
        let worker = test_worker();
        let line = r#"{"type":"content_block_delta","delta":{"text":"chunk"}}"#;
        assert!(matches!(
            worker.parse_output_line(line),
            Some(OutputLine::Text(t)) if t == "chunk"
        ));
    }

    #[test]
    fn test_parse_result_envelope() {
        let worker = test_worker();
        let line = r#"{"type":"result","is_error":false,"result":"done","session_id":"sess-1","total_cost_usd":0.003,"usage":{"input_tokens":42,"output_tokens":7}}"#;
        match worker.parse_output_line(line) {
            Some(OutputLine::Result(env)) => {
                assert!(env.success);
                assert_eq!(env.result.as_deref(), Some("done"));
                assert_eq!(env.session_id.as_deref(), Some("sess-1"));
                let usage = env.usage.unwrap();
                assert_eq!(usage.input_tokens, 42);
                assert_eq!(usage.output_tokens, 7);
                assert_eq!(usage.cost, Some(0.003));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_parse_skips_noise() {
        let worker = test_worker();
        assert!(worker.parse_output_line("").is_none());
        assert!(worker.parse_output_line("not json").is_none());
        assert!(worker
            .parse_output_line(r#"{"type":"system","subtype":"init"}"#)
            .is_none());
    }

    #[test]
    fn test_scan_usage_from_free_text() {
        let usage = scan_usage("Done. Used 1,200 input tokens and 340 output tokens.").unwrap();
        assert_eq!(usage.input_tokens, 1200);
        assert_eq!(usage.output_tokens, 340);

        assert!(scan_usage("no counts here").is_none());
    }

    #[test]
    fn test_estimate_usage_from_chars() {
        let usage = estimate_usage("abcdefgh", "abcd");
        assert_eq!(usage.input_tokens, 2);
        assert_eq!(usage.output_tokens, 1);
    }

    #[test]
    fn test_build_args_resume_and_permissions() {
        let worker = CliWorker::new("claude", "sonnet", true).unwrap();
        let profile = scout_profile();

        let args = worker.build_args(&profile, "sonnet", Some("sess-9"));
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        let resume_idx = args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(args[resume_idx + 1], "sess-9");
        // Resumed sessions do not re-send the system prompt
        assert!(!args.contains(&"--append-system-prompt".to_string()));

        let args = worker.build_args(&profile, "sonnet", None);
        assert!(!args.contains(&"--resume".to_string()));
        assert!(args.contains(&"--append-system-prompt".to_string()));
    }

    #[test]
    fn test_command_line_split() {
        let worker = CliWorker::new("claude --settings strict.json", "sonnet", false).unwrap();
        assert_eq!(worker.command[0], "claude");
        assert_eq!(worker.command[1], "--settings");

        assert!(CliWorker::new("", "sonnet", false).is_err());
    }

    /// Worker whose "CLI" is a shell script; the extra CLI flags land in the
    /// script's positional parameters and are ignored.
    #[cfg(unix)]
    fn script_worker(script: &str) -> CliWorker {
        CliWorker {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            default_model: "sonnet".to_string(),
            skip_permissions: false,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_invoke_subprocess_round_trip() {
        tokio_test::block_on(async {
            let line = r#"{"type":"result","is_error":false,"result":"hi","session_id":"s1","usage":{"input_tokens":3,"output_tokens":2}}"#;
            let worker = script_worker(&format!("cat > /dev/null; echo '{}'", line));

            let mut chunks: Vec<String> = Vec::new();
            let outcome = worker
                .invoke(
                    &scout_profile(),
                    "the prompt",
                    None,
                    &mut |c: &str| chunks.push(c.to_string()),
                    CancellationToken::new(),
                )
                .await
                .unwrap();

            assert!(outcome.success);
            assert_eq!(outcome.output, "hi");
            assert_eq!(outcome.exit_code, Some(0));
            assert_eq!(outcome.session_id.as_deref(), Some("s1"));
            let usage = outcome.usage.unwrap();
            assert_eq!(usage.input_tokens, 3);
            assert_eq!(usage.output_tokens, 2);
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_invoke_nonzero_exit_is_failure_with_estimated_usage() {
        tokio_test::block_on(async {
            let worker = script_worker("cat > /dev/null; echo not-json; exit 3");

            let outcome = worker
                .invoke(
                    &scout_profile(),
                    "12345678",
                    None,
                    &mut |_c: &str| {},
                    CancellationToken::new(),
                )
                .await
                .unwrap();

            assert!(!outcome.success);
            assert_eq!(outcome.exit_code, Some(3));
            assert!(outcome.error.is_some());
            // No envelope and no scannable counts: estimated from chars
            assert_eq!(outcome.usage.unwrap().input_tokens, 2);
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_invoke_cancelled_before_completion() {
        tokio_test::block_on(async {
            let worker = script_worker("sleep 5");
            let cancel = CancellationToken::new();
            cancel.cancel();

            let outcome = worker
                .invoke(
                    &scout_profile(),
                    "p",
                    None,
                    &mut |_c: &str| {},
                    cancel,
                )
                .await
                .unwrap();

            assert!(!outcome.success);
            assert_eq!(outcome.error.as_deref(), Some("invocation cancelled"));
        });
    }
}
