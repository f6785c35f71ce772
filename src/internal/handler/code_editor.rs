use std::sync::Arc;

use crate::internal::exec::context::ExecutionContext;
use crate::internal::exec::mode::{infer_execution_mode, LineRange};
use crate::internal::handler::dataframe::push_dataframe_status;
use crate::internal::handler::forward::forward_events;
use crate::internal::handler::handler::{Handler, HandlerError};
use crate::internal::message::envelope::{
    CodeEditorCommand, Command, Content, ContentType, Endpoint, Message,
};
use crate::internal::transport::outbox::Outbox;

/// Runs editor snippets and streams their output back, then refreshes the
/// DFManager view of the kernel's dataframes.
pub struct CodeEditorHandler {
    context: Arc<ExecutionContext>,
    outbox: Outbox,
}

impl CodeEditorHandler {
    pub fn new(context: Arc<ExecutionContext>, outbox: Outbox) -> Self {
        Self { context, outbox }
    }

    fn execute(&self, mut message: Message) -> Result<(), HandlerError> {
        let code = match &message.content {
            Content::Text(code) => code.clone(),
            Content::None => String::new(),
            other => {
                return Err(HandlerError::InvalidContent {
                    expected: ContentType::Str,
                    found: other.content_type(),
                })
            }
        };

        let hint = LineRange::from_metadata(&message.metadata);
        let mode = infer_execution_mode(&code, hint);
        message.execution_mode = Some(mode);
        tracing::info!(mode = %mode, seq = ?message.seq_number, "Executing snippet");

        let execution = self.context.execute(&code, mode)?;
        let stream = forward_events(execution, message, self.outbox.clone(), |reply| Ok(Some(reply)));

        // The snippet may have created or changed dataframes. The stream task
        // has released the context by the time it completes.
        let context = Arc::clone(&self.context);
        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            if stream.await.is_err() {
                return;
            }
            if let Err(e) = push_dataframe_status(&context, outbox) {
                tracing::debug!("Dataframe status not refreshed: {}", e);
            }
        });
        Ok(())
    }

    fn interrupt(&self, message: Message) -> Result<(), HandlerError> {
        self.context.interrupt()?;
        self.outbox.send(message.reply(Content::None));
        Ok(())
    }
}

impl Handler for CodeEditorHandler {
    fn endpoint(&self) -> Endpoint {
        Endpoint::CodeEditor
    }

    fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message.command {
            Command::CodeEditor(CodeEditorCommand::Execute) => self.execute(message),
            Command::CodeEditor(CodeEditorCommand::Interrupt) => self.interrupt(message),
            other => Err(HandlerError::unsupported(other)),
        }
    }

    fn shutdown(&self) {
        if self.context.is_busy() {
            if let Err(e) = self.context.interrupt() {
                tracing::debug!("Interrupt on shutdown failed: {}", e);
            }
        }
    }
}
