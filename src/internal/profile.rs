use std::sync::Arc;

use crate::internal::exec::context::ExecutionContext;
use crate::internal::handler::code_editor::CodeEditorHandler;
use crate::internal::handler::dataframe::DataFrameHandler;
use crate::internal::handler::file_explorer::FileExplorerHandler;
use crate::internal::handler::file_manager::FileManagerHandler;
use crate::internal::handler::magic::MagicHandler;
use crate::internal::handler::model::ModelHandler;
use crate::internal::project::manager::ProjectManager;
use crate::internal::router::router::{HandlerRegistry, RouterError};
use crate::internal::transport::outbox::Outbox;

/// Handlers backed by the kernel, all sharing one execution context.
pub fn code_registry(
    outbox: &Outbox,
    context: Arc<ExecutionContext>,
) -> Result<HandlerRegistry, RouterError> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(CodeEditorHandler::new(
        Arc::clone(&context),
        outbox.clone(),
    )))?;
    registry.register(Arc::new(DataFrameHandler::new(
        Arc::clone(&context),
        outbox.clone(),
    )))?;
    registry.register(Arc::new(ModelHandler::new(context, outbox.clone())))?;
    registry.register(Arc::new(MagicHandler::new(outbox.clone())))?;
    Ok(registry)
}

/// File and project handlers, sharing one project manager.
pub fn noncode_registry(
    outbox: &Outbox,
    projects: Arc<ProjectManager>,
) -> Result<HandlerRegistry, RouterError> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(FileManagerHandler::new(
        Arc::clone(&projects),
        outbox.clone(),
    )))?;
    registry.register(Arc::new(FileExplorerHandler::new(projects, outbox.clone())))?;
    Ok(registry)
}
