//! Inbound batches: where descriptors come from before they reach the coordinator

use serde::Deserialize;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// One queued task descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundBatch {
    messages: Vec<InboundMessage>,
}

#[derive(Deserialize)]
struct SqsEvent {
    #[serde(rename = "Records", default)]
    records: Vec<SqsRecord>,
}

#[derive(Deserialize)]
struct SqsRecord {
    #[serde(rename = "messageId", default)]
    message_id: Option<String>,
    body: String,
}

impl InboundBatch {
    /// Parse an SQS event document: `{"Records": [{"messageId": "..", "body": ".."}]}`
    pub fn from_sqs_event_json(json: &str) -> PipelineResult<Self> {
        let event: SqsEvent = serde_json::from_str(json)
            .map_err(|e| PipelineError::Inbound(format!("malformed SQS event: {}", e)))?;

        Ok(Self {
            messages: event
                .records
                .into_iter()
                .map(|r| InboundMessage {
                    message_id: r.message_id,
                    body: r.body,
                })
                .collect(),
        })
    }

    /// One descriptor per non-blank line
    pub fn from_lines(text: &str) -> Self {
        Self::from_bodies(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        )
    }

    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_bodies(args.into_iter().map(Into::into))
    }

    fn from_bodies(bodies: impl Iterator<Item = String>) -> Self {
        Self {
            messages: bodies
                .map(|body| InboundMessage {
                    message_id: None,
                    body,
                })
                .collect(),
        }
    }

    pub fn messages(&self) -> &[InboundMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Descriptor bodies in arrival order
    pub fn descriptors(&self) -> Vec<String> {
        self.messages
            .iter()
            .enumerate()
            .map(|(index, msg)| {
                debug!(
                    index,
                    message_id = msg.message_id.as_deref().unwrap_or("-"),
                    body = %msg.body,
                    "Got message"
                );
                msg.body.clone()
            })
            .collect()
    }
}
