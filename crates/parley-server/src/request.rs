//! Request layer: turns protocol requests into service calls.
//!
//! The acting identity always comes from the session, never from the
//! request. Results are serialized to the JSON value carried in `Reply`;
//! failures become a stable error code and a client-safe message.

use crate::identity::Identity;
use parley_core::{ErrorKind, MessageKind, MessageService, SendMessage, ServiceError};
use parley_protocol::codes;
use parley_protocol::Request;
use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, error};

/// A request that could not be served.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct RequestError {
    pub code: u16,
    pub message: String,
}

impl RequestError {
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Metrics label for the failure.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self.code {
            codes::INVALID_INPUT => "invalid_input",
            codes::FORBIDDEN => "forbidden",
            codes::NOT_FOUND => "not_found",
            codes::INVALID_REFERENCE => "invalid_reference",
            _ => "internal",
        }
    }
}

impl From<ServiceError> for RequestError {
    fn from(e: ServiceError) -> Self {
        let code = code_for(e.kind());
        match e {
            // Storage details stay in the server log.
            ServiceError::Storage(_) => RequestError::new(code, "Internal error"),
            other => RequestError::new(code, other.to_string()),
        }
    }
}

/// Stable wire code for an error kind.
#[must_use]
pub fn code_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::InvalidInput => codes::INVALID_INPUT,
        ErrorKind::Forbidden => codes::FORBIDDEN,
        ErrorKind::NotFound => codes::NOT_FOUND,
        ErrorKind::InvalidReference => codes::INVALID_REFERENCE,
        ErrorKind::Storage => codes::INTERNAL,
    }
}

/// Execute `request` on behalf of the session's identity.
///
/// # Errors
///
/// Returns the code and message to send back in an `Error` frame.
pub async fn execute(
    service: &MessageService,
    identity: &Identity,
    request: Request,
) -> Result<Value, RequestError> {
    let actor = identity.actor_id.as_str();
    debug!(actor = %actor, op = request.op(), "Executing request");

    match request {
        Request::Send {
            chat_id,
            content,
            kind,
            reply_to,
            attachments,
        } => {
            let kind = match kind.as_deref() {
                Some(raw) => MessageKind::from_str(raw)
                    .map_err(|e| RequestError::new(codes::INVALID_INPUT, e.to_string()))?,
                None => MessageKind::Text,
            };
            let mut send = SendMessage::text(chat_id, actor, content)
                .with_kind(kind)
                .with_attachments(attachments)
                .with_sender_name(identity.display_name.clone());
            if let Some(parent) = reply_to {
                send = send.reply_to(parent);
            }
            to_payload(&service.create_message(send).await?)
        }

        Request::History {
            chat_id,
            page,
            page_size,
        } => to_payload(
            &service
                .get_chat_messages(&chat_id, actor, page, page_size)
                .await?,
        ),

        Request::Edit {
            message_id,
            content,
        } => to_payload(&service.update_message(message_id, &content, actor).await?),

        Request::Delete { message_id } => {
            to_payload(&service.delete_message(message_id, actor).await?)
        }

        Request::MarkRead { message_id } => {
            to_payload(&service.mark_message_as_read(message_id, actor).await?)
        }

        Request::MarkChatRead { chat_id } => {
            let marked = service.mark_chat_as_read(&chat_id, actor).await?;
            Ok(json!({ "chat_id": chat_id, "marked": marked }))
        }

        Request::React { message_id, emoji } => {
            to_payload(&service.add_reaction(message_id, actor, &emoji).await?)
        }

        Request::Unreact { message_id } => {
            to_payload(&service.remove_reaction(message_id, actor).await?)
        }

        Request::Search {
            chat_id,
            query,
            page,
            page_size,
        } => to_payload(
            &service
                .search_messages(&chat_id, actor, &query, page, page_size)
                .await?,
        ),

        Request::UnreadCount => {
            let count = service.get_unread_message_count(actor).await?;
            Ok(json!({ "count": count }))
        }

        Request::EditHistory { message_id } => {
            let edits = service.get_edit_history(message_id, actor).await?;
            Ok(json!({ "message_id": message_id, "edits": to_payload(&edits)? }))
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, RequestError> {
    serde_json::to_value(value).map_err(|e| {
        error!(error = %e, "Failed to serialize reply");
        RequestError::new(codes::INTERNAL, "Internal error")
    })
}
