//! Interactive conversation over the files admitted by an ingestion run.
//!
//! The loop reads lines from a channel fed by [`spawn_stdin_reader`] and
//! writes prompts and replies to any [`Write`]. Replies come from a
//! [`ChatBackend`], which [`GeminiClient`](crate::upload::GeminiClient)
//! implements over `generateContent`.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use gemini_context_core::contract::{Handle, RemoteError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const PRIMING_MESSAGE: &str =
    "I have uploaded some files. Please use them as context for our conversation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

/// One part of a turn, in the service's wire shape (`{"text": ..}` or `{"fileData": ..}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    FileData(FileData),
}

impl From<&Handle> for Part {
    fn from(handle: &Handle) -> Self {
        Part::FileData(FileData {
            mime_type: handle.mime_type.clone(),
            file_uri: handle.uri.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model(text: String) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text)],
        }
    }
}

/// Something that answers a conversation.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Reply to `contents`, whose last element is the user's new turn.
    async fn generate(&self, contents: &[Turn]) -> Result<String, RemoteError>;
}

/// Forward stdin lines into a channel from a dedicated thread.
///
/// Reading stdin blocks, so it stays off the runtime; the thread is detached
/// and ends with the process.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read from stdin");
                    break;
                }
            }
        }
    });
    rx
}

/// Run the conversation until `exit` or end of input. Returns the number of
/// answered turns.
///
/// With `keep_history` every request carries the whole exchange so far;
/// otherwise each question is sent on its own, with the files attached.
pub async fn converse<B, W>(
    backend: &B,
    files: &[Handle],
    keep_history: bool,
    input: &mut mpsc::Receiver<String>,
    out: &mut W,
) -> std::io::Result<usize>
where
    B: ChatBackend + ?Sized,
    W: Write,
{
    let mut context: Vec<Part> = files.iter().map(Part::from).collect();
    let mut history: Vec<Turn> = Vec::new();

    if !context.is_empty() {
        let mut parts = vec![Part::Text(PRIMING_MESSAGE.to_string())];
        parts.extend(context.iter().cloned());
        let priming = Turn::user(parts);
        match backend.generate(std::slice::from_ref(&priming)).await {
            Ok(reply) => {
                info!(files = files.len(), "Primed conversation with uploaded files");
                writeln!(out, "AI: {reply}")?;
                if keep_history {
                    history.push(priming);
                    history.push(Turn::model(reply));
                }
            }
            Err(e) => {
                warn!(error = %e, "Priming message failed, continuing without file context");
                writeln!(out, "An error occurred while sending the files: {e}")?;
                context.clear();
            }
        }
    }

    let mut answered = 0;
    loop {
        write!(out, "You: ")?;
        out.flush()?;
        let Some(line) = input.recv().await else {
            writeln!(out)?;
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        let turn = if keep_history {
            Turn::user(vec![Part::Text(question.to_string())])
        } else {
            let mut parts = context.clone();
            parts.push(Part::Text(question.to_string()));
            Turn::user(parts)
        };

        let result = if keep_history {
            history.push(turn);
            let result = backend.generate(&history).await;
            if result.is_err() {
                history.pop();
            }
            result
        } else {
            backend.generate(std::slice::from_ref(&turn)).await
        };

        match result {
            Ok(reply) => {
                writeln!(out, "AI: {reply}")?;
                if keep_history {
                    history.push(Turn::model(reply));
                }
                answered += 1;
            }
            Err(e) => {
                warn!(error = %e, "Conversation turn failed");
                writeln!(out, "An error occurred: {e}")?;
            }
        }
    }
    info!(turns = answered, "Conversation ended");
    Ok(answered)
}
