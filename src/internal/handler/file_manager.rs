use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::internal::handler::handler::{required_str, Handler, HandlerError};
use crate::internal::message::envelope::{
    Command, Content, ContentType, Endpoint, Message, ProjectCommand,
};
use crate::internal::message::payload::FileMetadataContent;
use crate::internal::project::manager::ProjectManager;
use crate::internal::transport::outbox::Outbox;

/// Project and open-file commands.
///
/// A missing `path` is answered with an empty result instead of an error,
/// except for `open_file` and `close_file`, which have nothing sensible to
/// return without one.
pub struct FileManagerHandler {
    projects: Arc<ProjectManager>,
    outbox: Outbox,
}

impl FileManagerHandler {
    pub fn new(projects: Arc<ProjectManager>, outbox: Outbox) -> Self {
        Self { projects, outbox }
    }

    fn respond(&self, message: &Message) -> Result<Message, HandlerError> {
        let path = message.metadata_str("path");
        let Command::Project(command) = message.command else {
            return Err(HandlerError::unsupported(message.command));
        };

        let reply = match command {
            ProjectCommand::ListDir => match path {
                Some(path) => message.reply(Content::DirList(self.projects.list_dir(path)?)),
                None => message.reply(Content::DirList(Vec::new())),
            },
            ProjectCommand::ReadFile => match path {
                Some(path) => self.read_file(message, path)?,
                None => message.reply(Content::None),
            },
            ProjectCommand::SaveFile => match path {
                Some(path) => {
                    let content = file_text(&message.content)?;
                    let saved = self.projects.save_file(path, content)?;
                    message.reply(Content::FileMetadata(FileMetadataContent::Single(saved)))
                }
                None => message.reply(Content::None),
            },
            ProjectCommand::OpenFile => {
                let open = self.projects.open_file(required_str(message, "path")?)?;
                message.reply(Content::FileMetadata(FileMetadataContent::List(open)))
            }
            ProjectCommand::CloseFile => {
                let open = self.projects.close_file(required_str(message, "path")?);
                message.reply(Content::FileMetadata(FileMetadataContent::List(open)))
            }
            ProjectCommand::GetOpenFiles => message.reply(Content::FileMetadata(
                FileMetadataContent::List(self.projects.open_files()),
            )),
            ProjectCommand::SetWorkingDir => {
                if let Some(path) = path {
                    let dir = self.projects.set_working_dir(path)?;
                    tracing::info!(dir = %dir.display(), "Working directory changed");
                }
                message.reply(Content::None)
            }
            ProjectCommand::SetProjectDir => {
                if let Some(path) = path {
                    let dir = self.projects.set_project_dir(path)?;
                    tracing::info!(dir = %dir.display(), "Project directory changed");
                }
                message.reply(Content::None)
            }
            ProjectCommand::SaveState => match path {
                Some(path) => {
                    let state = state_text(&message.content)?;
                    let saved = self.projects.save_state(path, &state)?;
                    message.reply(Content::FileMetadata(FileMetadataContent::Single(saved)))
                }
                None => message.reply(Content::None),
            },
            ProjectCommand::GetActiveProject => match self.projects.active_project() {
                Some(project) => message.reply(Content::ProjectMetadata(project)),
                None => message.reply(Content::None),
            },
        };
        Ok(reply)
    }

    fn read_file(&self, message: &Message, path: &str) -> Result<Message, HandlerError> {
        let since = message
            .metadata_str("timestamp")
            .and_then(|stamp| DateTime::parse_from_rfc3339(stamp).ok())
            .map(|stamp| stamp.with_timezone(&Utc));

        Ok(match self.projects.read_file(path, since)? {
            Some(snapshot) => {
                let reply = message.reply(Content::FileContent(snapshot.content));
                match snapshot.timestamp {
                    Some(stamp) => {
                        reply.with_metadata_entry("timestamp", Value::String(stamp.to_rfc3339()))
                    }
                    None => reply,
                }
            }
            None => message.reply(Content::None),
        })
    }
}

fn file_text(content: &Content) -> Result<&str, HandlerError> {
    match content {
        Content::Text(text) | Content::FileContent(text) => Ok(text),
        Content::None => Ok(""),
        other => Err(HandlerError::InvalidContent {
            expected: ContentType::FileContent,
            found: other.content_type(),
        }),
    }
}

/// Editor state arrives as JSON or as already-serialized text.
fn state_text(content: &Content) -> Result<String, HandlerError> {
    match content {
        Content::Dict(value) => Ok(value.to_string()),
        other => file_text(other).map(str::to_string),
    }
}

impl Handler for FileManagerHandler {
    fn endpoint(&self) -> Endpoint {
        Endpoint::FileManager
    }

    fn handle(&self, message: Message) -> Result<(), HandlerError> {
        tracing::info!(
            command = %message.command,
            path = ?message.metadata_str("path"),
            "FileManager request"
        );
        let reply = self.respond(&message)?;
        self.outbox.send(reply);
        Ok(())
    }
}
