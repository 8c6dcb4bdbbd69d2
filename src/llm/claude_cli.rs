use super::{CompletionRequest, LlmError, TextGenerator};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

const TIMEOUT_SECS: u64 = 60;

/// Response wrapper from `claude --output-format json`
#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    result: String,
}

/// Runs the local `claude` CLI in print mode. The CLI has no knobs for
/// temperature or output length, so those request fields are ignored.
pub struct ClaudeCliGenerator {
    model: String,
}

impl ClaudeCliGenerator {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

fn build_prompt(request: &CompletionRequest) -> String {
    if request.system.is_empty() {
        request.prompt.clone()
    } else {
        format!("{}\n\n{}", request.system, request.prompt)
    }
}

fn parse_output(stdout: &str) -> Result<String, LlmError> {
    let wrapper: ClaudeResponse = serde_json::from_str(stdout)
        .map_err(|e| LlmError::Process(format!("Failed to parse claude response wrapper: {}", e)))?;
    let text = wrapper.result.trim();
    if text.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text.to_string())
}

#[async_trait]
impl TextGenerator for ClaudeCliGenerator {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let prompt = build_prompt(request);

        // Prompt goes over stdin; email content must never reach tool use
        let mut child = Command::new("claude")
            .args([
                "-p",
                "-",
                "--output-format",
                "json",
                "--model",
                self.model.as_str(),
                "--disallowedTools",
                "Bash,Edit,Write,WebFetch,WebSearch",
                "--no-session-persistence",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LlmError::Process(format!("Failed to spawn claude CLI: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| LlmError::Process(format!("Failed to write prompt: {}", e)))?;
        }

        let output = timeout(Duration::from_secs(TIMEOUT_SECS), child.wait_with_output())
            .await
            .map_err(|_| LlmError::Timeout(TIMEOUT_SECS))?
            .map_err(|e| LlmError::Process(format!("Failed to run claude CLI: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmError::Process(format!("claude CLI failed: {}", stderr.trim())));
        }

        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_unwraps_result() {
        let stdout = r#"{"type":"result","result":"  {\"score\": 7}\n","session_id":"x"}"#;
        assert_eq!(parse_output(stdout).unwrap(), r#"{"score": 7}"#);
    }

    #[test]
    fn test_parse_output_rejects_empty_and_garbage() {
        assert!(matches!(parse_output(r#"{"result": "  "}"#), Err(LlmError::EmptyResponse)));
        assert!(matches!(parse_output("oops"), Err(LlmError::Process(_))));
    }

    #[test]
    fn test_system_prompt_is_prepended() {
        let request = CompletionRequest::new("Be brief.", "Hello");
        assert_eq!(build_prompt(&request), "Be brief.\n\nHello");
        assert_eq!(build_prompt(&CompletionRequest::new("", "Hello")), "Hello");
    }
}
