use std::sync::Arc;

use crate::internal::handler::handler::{required_str, Handler, HandlerError};
use crate::internal::message::envelope::{Command, Content, Endpoint, ExplorerCommand, Message};
use crate::internal::project::manager::{parent_display, ProjectManager};
use crate::internal::transport::outbox::Outbox;

/// Directory tree browsing and mutation. Mutations reply with the refreshed
/// listing of the parent directory.
pub struct FileExplorerHandler {
    projects: Arc<ProjectManager>,
    outbox: Outbox,
}

impl FileExplorerHandler {
    pub fn new(projects: Arc<ProjectManager>, outbox: Outbox) -> Self {
        Self { projects, outbox }
    }

    fn respond(&self, command: ExplorerCommand, message: &Message) -> Result<Message, HandlerError> {
        if command == ExplorerCommand::ListDir {
            let path = message.metadata_str("path").unwrap_or(".");
            return Ok(message.reply(Content::DirList(self.projects.list_dir(path)?)));
        }

        let path = required_str(message, "path")?;
        match command {
            ExplorerCommand::CreateFile => self.projects.create_file(path)?,
            ExplorerCommand::CreateDir => self.projects.create_dir(path)?,
            ExplorerCommand::Delete => self.projects.delete(path)?,
            ExplorerCommand::ListDir => {}
        }
        tracing::info!(command = %command, path, "File tree changed");

        let parent = parent_display(path);
        Ok(message.reply(Content::DirList(self.projects.list_dir(&parent)?)))
    }
}

impl Handler for FileExplorerHandler {
    fn endpoint(&self) -> Endpoint {
        Endpoint::FileExplorer
    }

    fn handle(&self, message: Message) -> Result<(), HandlerError> {
        let Command::Explorer(command) = message.command else {
            return Err(HandlerError::unsupported(message.command));
        };
        let reply = self.respond(command, &message)?;
        self.outbox.send(reply);
        Ok(())
    }
}
