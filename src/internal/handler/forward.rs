use tokio::task::JoinHandle;

use crate::internal::classify::classifier::classify;
use crate::internal::exec::context::{Execution, ExecutionContext};
use crate::internal::exec::mode::infer_execution_mode;
use crate::internal::handler::handler::HandlerError;
use crate::internal::message::envelope::Message;
use crate::internal::transport::outbox::Outbox;

/// Drains one execution on a separate task, classifying each event against
/// `request` and passing it through `post` before sending.
///
/// `post` may rewrite a reply, drop it (`Ok(None)`), or fail, in which case an
/// error reply addressed to `request` is sent instead. Kernel emission order
/// is preserved.
pub fn forward_events<F>(
    mut execution: Execution,
    request: Message,
    outbox: Outbox,
    post: F,
) -> JoinHandle<()>
where
    F: Fn(Message) -> Result<Option<Message>, HandlerError> + Send + 'static,
{
    tokio::spawn(async move {
        let mut forwarded = 0usize;
        while let Some(event) = execution.next_event().await {
            tracing::trace!(msg_type = %event.header.msg_type, "Kernel event");
            match post(classify(&event, &request)) {
                Ok(Some(reply)) => {
                    outbox.send(reply);
                    forwarded += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(command = %request.command, "Post-processing failed: {}", e);
                    outbox.send(request.error_reply(e.to_string()));
                }
            }
        }
        tracing::debug!(command = %request.command, forwarded, "Execution stream finished");
    })
}

/// Runs generated code on behalf of a non-editor endpoint and forwards the
/// post-processed results.
pub fn run_kernel_query<F>(
    context: &ExecutionContext,
    code: &str,
    request: Message,
    outbox: Outbox,
    post: F,
) -> Result<(), HandlerError>
where
    F: Fn(Message) -> Result<Option<Message>, HandlerError> + Send + 'static,
{
    let mode = infer_execution_mode(code, None);
    let execution = context.execute(code, mode)?;
    forward_events(execution, request, outbox, post);
    Ok(())
}
