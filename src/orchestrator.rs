//! The turn loop: persist every turn, answer direct commands synchronously,
//! and keep re-querying the model while it addresses the tool dialog.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::{
    append_transcript, is_command, parse_command, preview, CommandError, Dialog, Envelope, LlmClient, LlmError,
    LlmMessage, Registry, Role, TranscriptEntry, UNKNOWN_USER,
};

pub(crate) const DEFAULT_MAX_HOPS: usize = 8;

#[derive(Debug, Error)]
pub(crate) enum OrchestratorError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("language model call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("conversation store failed: {0}")]
    Store(String),
    #[error("could not encode turn: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("model kept requesting tools after {0} hops")]
    HopLimit(usize),
}

/// Compact JSON text of any serializable result. Strings come back quoted.
pub(crate) fn stringify<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

pub(crate) struct Orchestrator {
    bot_name: String,
    registry: Arc<Registry>,
    llm: Arc<dyn LlmClient>,
    max_hops: usize,
    transcript_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub(crate) fn new(bot_name: &str, registry: Arc<Registry>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            bot_name: bot_name.to_string(),
            registry,
            llm,
            max_hops: DEFAULT_MAX_HOPS,
            transcript_dir: None,
        }
    }

    pub(crate) fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub(crate) fn with_transcript_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.transcript_dir = dir;
        self
    }

    pub(crate) fn bot_name(&self) -> &str {
        &self.bot_name
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn handle_text(&self, channel: &str, user: &str, text: &str) -> Result<String, OrchestratorError> {
        self.handle_message(channel, user, Role::Human, Dialog::Open, text)
    }

    pub(crate) fn handle_message(
        &self,
        channel: &str,
        user: &str,
        role: Role,
        dialog: Dialog,
        text: &str,
    ) -> Result<String, OrchestratorError> {
        let user = if user.trim().is_empty() { UNKNOWN_USER } else { user };
        let mut current = Envelope::new(role, user, dialog, text);
        let mut history = self.append(channel, &current)?;
        let mut first_iteration = true;
        let mut model_calls = 0usize;

        loop {
            if is_command(&current.text) {
                let command = parse_command(&current.text)?;
                let result = self.registry.dispatch(&command);
                let reply_text = stringify(&result)?;
                tracing::debug!(
                    %channel,
                    capability = %command.capability,
                    action = %command.action,
                    reply = %preview(&reply_text, 60),
                    "command answered"
                );
                let reply = Envelope::new(Role::Human, &command.capability, current.dialog, &reply_text);
                history = self.append(channel, &reply)?;
                if first_iteration {
                    return Ok(reply_text);
                }
                current = reply;
                continue;
            }

            if current.role == Role::Model && current.dialog == Dialog::Open {
                tracing::info!(%channel, bot = %self.bot_name, model_calls, "turn complete");
                return Ok(current.text);
            }

            if model_calls > self.max_hops {
                tracing::warn!(%channel, bot = %self.bot_name, max_hops = self.max_hops, "tool hop limit reached");
                return Err(OrchestratorError::HopLimit(self.max_hops));
            }
            model_calls += 1;
            let response = self.llm.chat(&history)?;
            current = Envelope::decode(&response.message.content, Role::Model);
            tracing::debug!(
                %channel,
                bot = %self.bot_name,
                dialog = %current.dialog,
                text = %preview(&current.text, 60),
                "model replied"
            );
            history = self.append(channel, &current)?;
            first_iteration = false;
        }
    }

    /// Appends through the `conversation` capability and returns the channel's
    /// full history.
    fn append(&self, channel: &str, envelope: &Envelope) -> Result<Vec<LlmMessage>, OrchestratorError> {
        let payload = json!({
            "channel_id": channel,
            "message": envelope.as_llm_message(),
        });
        let command = format!("/conversation/add_message/{}", stringify(&payload)?);
        let reply = self.registry.route(&command)?;
        let history = match reply {
            Value::Array(_) => serde_json::from_value::<Vec<LlmMessage>>(reply)
                .map_err(|e| OrchestratorError::Store(format!("malformed history: {e}")))?,
            other => {
                return Err(OrchestratorError::Store(match other {
                    Value::String(s) => s,
                    v => v.to_string(),
                }));
            }
        };
        if let Some(dir) = &self.transcript_dir {
            if let Err(err) = append_transcript(dir, &TranscriptEntry::new(channel, envelope)) {
                tracing::warn!(dir = %dir.display(), error = %err, "transcript append failed");
            }
        }
        Ok(history)
    }
}
