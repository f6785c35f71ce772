use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::internal::exec::mode::ExecutionMode;
use crate::internal::message::payload::{DirEntry, FileMetadataContent, ProjectMetadata};
use crate::internal::message::wire::wire_enum;

/// Caller context carried alongside a message. Insertion ordered.
pub type Metadata = Map<String, Value>;

wire_enum! {
    /// Logical destination of a message; one per UI feature area.
    pub enum Endpoint {
        CodeEditor => "CodeEditor",
        DataFrameManager => "DFManager",
        ModelManager => "ModelManager",
        FileManager => "FileManager",
        FileExplorer => "FileExplorer",
        ExperimentManager => "ExperimentManager",
        GitManager => "GitManager",
        MagicCommandGenerator => "MagicCommandGen",
    }
}

wire_enum! {
    pub enum CodeEditorCommand {
        Execute => "execute",
        Interrupt => "interrupt",
    }
}

wire_enum! {
    pub enum DataFrameCommand {
        GetTableData => "get_table_data",
        GetCountNa => "get_countna",
        PlotColumnHistogram => "plot_column_histogram",
        PlotCountNa => "plot_countna",
        /// Names and shapes of the dataframes in the kernel namespace. Also
        /// pushed unrequested after every editor execution.
        UpdateDfStatus => "update_df_status",
    }
}

wire_enum! {
    pub enum ModelCommand {
        GetActiveModelsInfo => "get_active_models_info",
    }
}

wire_enum! {
    /// Commands of the FileManager endpoint.
    pub enum ProjectCommand {
        ListDir => "list_dir",
        ReadFile => "read_file",
        SaveFile => "save_file",
        OpenFile => "open_file",
        CloseFile => "close_file",
        GetOpenFiles => "get_open_files",
        SetWorkingDir => "set_working_dir",
        GetActiveProject => "get_active_project",
        SetProjectDir => "set_project_dir",
        SaveState => "save_state",
    }
}

wire_enum! {
    pub enum ExplorerCommand {
        ListDir => "list_dir",
        CreateFile => "create_file",
        CreateDir => "create_dir",
        Delete => "delete",
    }
}

wire_enum! {
    pub enum ExperimentCommand {
        ListExperiments => "list_experiments",
        ListRuns => "list_runs",
    }
}

wire_enum! {
    pub enum GitCommand {
        ConnectRepo => "connect_repo",
        CheckDiff => "check_diff",
    }
}

wire_enum! {
    pub enum MagicCommand {
        GenPlotCode => "gen_plot_code",
    }
}

/// An operation scoped to one endpoint. The variant fixes the endpoint, so a
/// command can never be paired with the wrong destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    CodeEditor(CodeEditorCommand),
    DataFrame(DataFrameCommand),
    Model(ModelCommand),
    Project(ProjectCommand),
    Explorer(ExplorerCommand),
    Experiment(ExperimentCommand),
    Git(GitCommand),
    Magic(MagicCommand),
}

impl Command {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Command::CodeEditor(_) => Endpoint::CodeEditor,
            Command::DataFrame(_) => Endpoint::DataFrameManager,
            Command::Model(_) => Endpoint::ModelManager,
            Command::Project(_) => Endpoint::FileManager,
            Command::Explorer(_) => Endpoint::FileExplorer,
            Command::Experiment(_) => Endpoint::ExperimentManager,
            Command::Git(_) => Endpoint::GitManager,
            Command::Magic(_) => Endpoint::MagicCommandGenerator,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::CodeEditor(c) => c.as_str(),
            Command::DataFrame(c) => c.as_str(),
            Command::Model(c) => c.as_str(),
            Command::Project(c) => c.as_str(),
            Command::Explorer(c) => c.as_str(),
            Command::Experiment(c) => c.as_str(),
            Command::Git(c) => c.as_str(),
            Command::Magic(c) => c.as_str(),
        }
    }

    /// Looks up `name` in the command set owned by `endpoint`.
    pub fn parse(endpoint: Endpoint, name: &str) -> Option<Self> {
        match endpoint {
            Endpoint::CodeEditor => CodeEditorCommand::from_wire(name).map(Command::CodeEditor),
            Endpoint::DataFrameManager => DataFrameCommand::from_wire(name).map(Command::DataFrame),
            Endpoint::ModelManager => ModelCommand::from_wire(name).map(Command::Model),
            Endpoint::FileManager => ProjectCommand::from_wire(name).map(Command::Project),
            Endpoint::FileExplorer => ExplorerCommand::from_wire(name).map(Command::Explorer),
            Endpoint::ExperimentManager => {
                ExperimentCommand::from_wire(name).map(Command::Experiment)
            }
            Endpoint::GitManager => GitCommand::from_wire(name).map(Command::Git),
            Endpoint::MagicCommandGenerator => MagicCommand::from_wire(name).map(Command::Magic),
        }
    }

    pub fn all_for(endpoint: Endpoint) -> Vec<Command> {
        match endpoint {
            Endpoint::CodeEditor => wrap_all(CodeEditorCommand::ALL, Command::CodeEditor),
            Endpoint::DataFrameManager => wrap_all(DataFrameCommand::ALL, Command::DataFrame),
            Endpoint::ModelManager => wrap_all(ModelCommand::ALL, Command::Model),
            Endpoint::FileManager => wrap_all(ProjectCommand::ALL, Command::Project),
            Endpoint::FileExplorer => wrap_all(ExplorerCommand::ALL, Command::Explorer),
            Endpoint::ExperimentManager => wrap_all(ExperimentCommand::ALL, Command::Experiment),
            Endpoint::GitManager => wrap_all(GitCommand::ALL, Command::Git),
            Endpoint::MagicCommandGenerator => wrap_all(MagicCommand::ALL, Command::Magic),
        }
    }
}

fn wrap_all<T: Copy>(commands: &[T], wrap: fn(T) -> Command) -> Vec<Command> {
    commands.iter().copied().map(wrap).collect()
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.endpoint(), self.as_str())
    }
}

macro_rules! command_from {
    ($($scoped:ident => $variant:ident),+ $(,)?) => {
        $(
            impl From<$scoped> for Command {
                fn from(command: $scoped) -> Self {
                    Command::$variant(command)
                }
            }
        )+
    };
}

command_from! {
    CodeEditorCommand => CodeEditor,
    DataFrameCommand => DataFrame,
    ModelCommand => Model,
    ProjectCommand => Project,
    ExplorerCommand => Explorer,
    ExperimentCommand => Experiment,
    GitCommand => Git,
    MagicCommand => Magic,
}

wire_enum! {
    /// Shape of an outbound payload.
    pub enum ContentType {
        Str => "str",
        Dict => "dict",
        DirList => "dir_list",
        FileContent => "file_content",
        FileMetadata => "file_metadata",
        ProjectMetadata => "project_metadata",
        PandasDataFrame => "pandas_dataframe",
        PlotlyFig => "plotly_fig",
        MatplotlibFig => "matplotlib_fig",
        RichOutput => "rich_output",
        KernelEvent => "kernel_event",
        None => "none",
    }
}

wire_enum! {
    /// Media subtype of a payload, named after the MIME key it refers to.
    pub enum SubContentType {
        ApplicationPlotly => "application/vnd.plotly.v1+json",
        ApplicationJson => "application/json",
        TextHtml => "text/html",
        ImagePng => "image/png",
        ImageSvg => "image/svg+xml",
        ImageJpeg => "image/jpeg",
        TextPlain => "text/plain",
        None => "none",
    }
}

/// Message payload, one variant per `ContentType`.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    None,
    Text(String),
    Dict(Value),
    DirList(Vec<DirEntry>),
    FileContent(String),
    FileMetadata(FileMetadataContent),
    ProjectMetadata(ProjectMetadata),
    DataFrame(Value),
    PlotlyFig(Value),
    /// Base64-encoded image bytes.
    Image(String),
    RichOutput(Map<String, Value>),
    KernelEvent(Value),
}

impl Content {
    pub fn content_type(&self) -> ContentType {
        match self {
            Content::None => ContentType::None,
            Content::Text(_) => ContentType::Str,
            Content::Dict(_) => ContentType::Dict,
            Content::DirList(_) => ContentType::DirList,
            Content::FileContent(_) => ContentType::FileContent,
            Content::FileMetadata(_) => ContentType::FileMetadata,
            Content::ProjectMetadata(_) => ContentType::ProjectMetadata,
            Content::DataFrame(_) => ContentType::PandasDataFrame,
            Content::PlotlyFig(_) => ContentType::PlotlyFig,
            Content::Image(_) => ContentType::MatplotlibFig,
            Content::RichOutput(_) => ContentType::RichOutput,
            Content::KernelEvent(_) => ContentType::KernelEvent,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            _ => None,
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        Ok(match self {
            Content::None => Value::Null,
            Content::Text(text) | Content::FileContent(text) | Content::Image(text) => {
                Value::String(text.clone())
            }
            Content::Dict(value)
            | Content::DataFrame(value)
            | Content::PlotlyFig(value)
            | Content::KernelEvent(value) => value.clone(),
            Content::DirList(entries) => serde_json::to_value(entries)?,
            Content::FileMetadata(files) => serde_json::to_value(files)?,
            Content::ProjectMetadata(project) => serde_json::to_value(project)?,
            Content::RichOutput(media) => Value::Object(media.clone()),
        })
    }

    fn from_value(content_type: ContentType, value: Value) -> Result<Self, DecodeError> {
        let shape = |reason: String| DecodeError::ContentShape {
            content_type,
            reason,
        };
        Ok(match content_type {
            ContentType::None => Content::None,
            ContentType::Str => Content::Text(value_text(value)),
            ContentType::FileContent => Content::FileContent(value_text(value)),
            ContentType::MatplotlibFig => Content::Image(value_text(value)),
            ContentType::Dict => Content::Dict(value),
            ContentType::PandasDataFrame => Content::DataFrame(value),
            ContentType::PlotlyFig => Content::PlotlyFig(value),
            ContentType::KernelEvent => Content::KernelEvent(value),
            ContentType::DirList => {
                Content::DirList(serde_json::from_value(value).map_err(|e| shape(e.to_string()))?)
            }
            ContentType::FileMetadata => Content::FileMetadata(
                serde_json::from_value(value).map_err(|e| shape(e.to_string()))?,
            ),
            ContentType::ProjectMetadata => Content::ProjectMetadata(
                serde_json::from_value(value).map_err(|e| shape(e.to_string()))?,
            ),
            ContentType::RichOutput => match value {
                Value::Object(media) => Content::RichOutput(media),
                other => return Err(shape(format!("expected an object, got {}", other))),
            },
        })
    }

    /// Content of an inbound envelope that did not declare a type.
    fn from_untyped(value: Value) -> Self {
        match value {
            Value::Null => Content::None,
            Value::String(text) => Content::Text(text),
            other => Content::Dict(other),
        }
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),
    #[error("Unknown command '{command}' for endpoint {endpoint}")]
    UnknownCommand { endpoint: Endpoint, command: String },
    #[error("Unknown content type: {0}")]
    UnknownContentType(String),
    #[error("Unknown sub content type: {0}")]
    UnknownSubContentType(String),
    #[error("Unknown execution mode: {0}")]
    UnknownExecutionMode(String),
    #[error("Content does not match type {content_type}: {reason}")]
    ContentShape {
        content_type: ContentType,
        reason: String,
    },
    #[error("Error messages must carry str content, got {0}")]
    ErrorNotString(ContentType),
}

/// The envelope exchanged with the UI process.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub command: Command,
    pub seq_number: Option<i64>,
    pub sub_type: Option<SubContentType>,
    pub content: Content,
    pub metadata: Metadata,
    pub error: bool,
    pub execution_mode: Option<ExecutionMode>,
}

impl Message {
    pub fn new(command: impl Into<Command>, content: Content) -> Self {
        Self {
            command: command.into(),
            seq_number: None,
            sub_type: None,
            content,
            metadata: Metadata::new(),
            error: false,
            execution_mode: None,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.command.endpoint()
    }

    pub fn content_type(&self) -> ContentType {
        self.content.content_type()
    }

    /// Starts a reply to this message.
    ///
    /// Command, sequence number, metadata and execution mode are copied, which
    /// is what lets a reply produced long after dispatch find its way back to
    /// the UI-side request.
    pub fn reply(&self, content: Content) -> Message {
        Message {
            command: self.command,
            seq_number: self.seq_number,
            sub_type: None,
            content,
            metadata: self.metadata.clone(),
            error: false,
            execution_mode: self.execution_mode,
        }
    }

    /// A failure reply addressed to this message's endpoint and command.
    pub fn error_reply(&self, description: impl Into<String>) -> Message {
        let mut reply = self.reply(Content::Text(description.into()));
        reply.error = true;
        reply
    }

    pub fn with_command(mut self, command: impl Into<Command>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_seq_number(mut self, seq_number: Option<i64>) -> Self {
        self.seq_number = seq_number;
        self
    }

    pub fn with_sub_type(mut self, sub_type: SubContentType) -> Self {
        self.sub_type = Some(sub_type);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_metadata_entry(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn decode(line: &str) -> Result<Message, DecodeError> {
        let wire: WireMessage = serde_json::from_str(line)?;
        Message::try_from(wire)
    }

    pub fn from_value(value: Value) -> Result<Message, DecodeError> {
        let wire: WireMessage = serde_json::from_value(value)?;
        Message::try_from(wire)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_wire()?)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.to_wire()?)
    }

    fn to_wire(&self) -> Result<WireMessage, serde_json::Error> {
        Ok(WireMessage {
            webapp_endpoint: Some(self.endpoint().as_str().to_string()),
            command_name: Some(self.command.as_str().to_string()),
            seq_number: self.seq_number,
            content_type: Some(self.content_type().as_str().to_string()),
            sub_type: self.sub_type.map(|sub| sub.as_str().to_string()),
            content: self.content.to_value()?,
            metadata: if self.metadata.is_empty() {
                None
            } else {
                Some(self.metadata.clone())
            },
            error: self.error,
            execution_mode: self.execution_mode.map(|mode| mode.as_str().to_string()),
        })
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = DecodeError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let endpoint_name = wire
            .webapp_endpoint
            .ok_or(DecodeError::MissingField("webapp_endpoint"))?;
        let endpoint = Endpoint::from_wire(&endpoint_name)
            .ok_or(DecodeError::UnknownEndpoint(endpoint_name))?;

        let command_name = wire
            .command_name
            .ok_or(DecodeError::MissingField("command_name"))?;
        let command = Command::parse(endpoint, &command_name).ok_or(DecodeError::UnknownCommand {
            endpoint,
            command: command_name,
        })?;

        let content = match wire.content_type {
            Some(name) => {
                let content_type = ContentType::from_wire(&name)
                    .ok_or(DecodeError::UnknownContentType(name))?;
                Content::from_value(content_type, wire.content)?
            }
            None => Content::from_untyped(wire.content),
        };

        if wire.error && content.content_type() != ContentType::Str {
            return Err(DecodeError::ErrorNotString(content.content_type()));
        }

        let sub_type = wire
            .sub_type
            .map(|name| SubContentType::from_wire(&name).ok_or(DecodeError::UnknownSubContentType(name)))
            .transpose()?;

        let execution_mode = wire
            .execution_mode
            .map(|name| {
                ExecutionMode::from_wire(&name).ok_or(DecodeError::UnknownExecutionMode(name))
            })
            .transpose()?;

        Ok(Message {
            command,
            seq_number: wire.seq_number,
            sub_type,
            content,
            metadata: wire.metadata.unwrap_or_default(),
            error: wire.error,
            execution_mode,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(default)]
    webapp_endpoint: Option<String>,
    #[serde(default)]
    command_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq_number: Option<i64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_type: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
    #[serde(default)]
    error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution_mode: Option<String>,
}
