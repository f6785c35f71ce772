use std::sync::Arc;

use crate::internal::exec::context::ExecutionContext;
use crate::internal::handler::forward::run_kernel_query;
use crate::internal::handler::handler::{Handler, HandlerError};
use crate::internal::message::envelope::{
    Command, Content, Endpoint, Message, ModelCommand, SubContentType,
};
use crate::internal::transport::outbox::Outbox;

/// Lists model objects living in the kernel namespace, keyed by variable name.
const ACTIVE_MODELS_QUERY: &str = "__import__('IPython').display.JSON({\
name: {'name': name, 'type': type(obj).__name__, 'module': type(obj).__module__} \
for name, obj in list(globals().items()) \
if not name.startswith('_') \
and type(obj).__module__.split('.')[0] in ('torch', 'tensorflow', 'keras')})";

pub struct ModelHandler {
    context: Arc<ExecutionContext>,
    outbox: Outbox,
}

impl ModelHandler {
    pub fn new(context: Arc<ExecutionContext>, outbox: Outbox) -> Self {
        Self { context, outbox }
    }
}

impl Handler for ModelHandler {
    fn endpoint(&self) -> Endpoint {
        Endpoint::ModelManager
    }

    fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message.command {
            Command::Model(ModelCommand::GetActiveModelsInfo) => run_kernel_query(
                &self.context,
                ACTIVE_MODELS_QUERY,
                message,
                self.outbox.clone(),
                |reply| Ok(models_reply(reply)),
            ),
            other => Err(HandlerError::unsupported(other)),
        }
    }
}

fn models_reply(reply: Message) -> Option<Message> {
    if reply.error {
        return Some(reply);
    }
    match reply.content {
        Content::Text(_) => Some(reply),
        Content::RichOutput(ref media) => {
            let models = media.get(SubContentType::ApplicationJson.as_str())?.clone();
            Some(Message {
                content: Content::Dict(models),
                sub_type: None,
                ..reply
            })
        }
        _ => None,
    }
}
