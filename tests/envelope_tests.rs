//! Tests for envelope decoding, encoding and reply construction

use execgate::internal::message::envelope::{
    CodeEditorCommand, DataFrameCommand, ExplorerCommand, ProjectCommand,
};
use execgate::internal::message::payload::{DirEntry, FileMetadata, FileMetadataContent, ProjectMetadata};
use execgate::{Command, Content, ContentType, DecodeError, Endpoint, ExecutionMode, Message, SubContentType};
use serde_json::json;

#[test]
fn test_decode_inbound_request() {
    let line = r#"{"webapp_endpoint":"FileManager","command_name":"read_file","seq_number":7,"content":null,"metadata":{"path":"/a.txt"}}"#;
    let message = Message::decode(line).expect("Should decode request");

    assert_eq!(message.endpoint(), Endpoint::FileManager);
    assert_eq!(message.command, Command::Project(ProjectCommand::ReadFile));
    assert_eq!(message.seq_number, Some(7));
    assert_eq!(message.content, Content::None);
    assert_eq!(message.metadata_str("path"), Some("/a.txt"));
    assert!(!message.error);

    println!("Inbound decode test passed");
}

#[test]
fn test_decode_rejects_unaddressable_envelopes() {
    let missing_endpoint = Message::decode(r#"{"command_name":"execute"}"#);
    assert!(matches!(missing_endpoint, Err(DecodeError::MissingField("webapp_endpoint"))));

    let missing_command = Message::decode(r#"{"webapp_endpoint":"CodeEditor"}"#);
    assert!(matches!(missing_command, Err(DecodeError::MissingField("command_name"))));

    let unknown_endpoint = Message::decode(r#"{"webapp_endpoint":"Nope","command_name":"execute"}"#);
    assert!(matches!(unknown_endpoint, Err(DecodeError::UnknownEndpoint(_))));

    // list_dir exists, but not on the code editor
    let foreign_command = Message::decode(r#"{"webapp_endpoint":"CodeEditor","command_name":"list_dir"}"#);
    assert!(matches!(
        foreign_command,
        Err(DecodeError::UnknownCommand { endpoint: Endpoint::CodeEditor, .. })
    ));

    let bad_type = Message::decode(
        r#"{"webapp_endpoint":"CodeEditor","command_name":"execute","type":"blob"}"#,
    );
    assert!(matches!(bad_type, Err(DecodeError::UnknownContentType(_))));

    let bad_mode = Message::decode(
        r#"{"webapp_endpoint":"CodeEditor","command_name":"execute","execution_mode":"run"}"#,
    );
    assert!(matches!(bad_mode, Err(DecodeError::UnknownExecutionMode(_))));

    assert!(matches!(Message::decode("not json"), Err(DecodeError::Json(_))));
}

#[test]
fn test_error_flag_requires_string_content() {
    let result = Message::from_value(json!({
        "webapp_endpoint": "CodeEditor",
        "command_name": "execute",
        "type": "dict",
        "content": {"a": 1},
        "error": true
    }));
    assert!(matches!(result, Err(DecodeError::ErrorNotString(ContentType::Dict))));
}

#[test]
fn test_content_shape_is_checked() {
    let result = Message::from_value(json!({
        "webapp_endpoint": "FileExplorer",
        "command_name": "list_dir",
        "type": "dir_list",
        "content": "not a list"
    }));
    assert!(matches!(
        result,
        Err(DecodeError::ContentShape { content_type: ContentType::DirList, .. })
    ));
}

#[test]
fn test_encoded_wire_shape() {
    let message = Message::new(CodeEditorCommand::Execute, Content::Text("42".to_string()))
        .with_seq_number(Some(3))
        .with_metadata_entry("line_range", json!({"fromLine": 1, "toLine": 2}));
    let mut message = message;
    message.execution_mode = Some(ExecutionMode::Value);

    let value = message.to_value().expect("Should encode");
    assert_eq!(
        value,
        json!({
            "webapp_endpoint": "CodeEditor",
            "command_name": "execute",
            "seq_number": 3,
            "type": "str",
            "content": "42",
            "metadata": {"line_range": {"fromLine": 1, "toLine": 2}},
            "error": false,
            "execution_mode": "eval"
        })
    );

    // Empty metadata is left off the wire.
    let bare = Message::new(ProjectCommand::GetOpenFiles, Content::None)
        .to_value()
        .unwrap();
    assert!(bare.get("metadata").is_none());
    assert_eq!(bare["type"], "none");
}

#[test]
fn test_round_trip_preserves_every_field() {
    let samples = vec![
        Message::new(ProjectCommand::ListDir, Content::DirList(vec![DirEntry {
            name: "src".to_string(),
            path: "src".to_string(),
            is_file: false,
            timestamp: None,
        }])),
        Message::new(
            ProjectCommand::OpenFile,
            Content::FileMetadata(FileMetadataContent::List(vec![FileMetadata {
                path: "a.txt".to_string(),
                name: "a.txt".to_string(),
                timestamp: Some(chrono::Utc::now()),
            }])),
        ),
        Message::new(
            ProjectCommand::GetActiveProject,
            Content::ProjectMetadata(ProjectMetadata {
                id: "p1".to_string(),
                name: "demo".to_string(),
                path: "/tmp/demo".to_string(),
            }),
        ),
        Message::new(ProjectCommand::ReadFile, Content::FileContent("hello".to_string()))
            .with_metadata_entry("path", json!("/a.txt")),
        Message::new(DataFrameCommand::GetTableData, Content::DataFrame(json!({"columns": ["a"]}))),
        Message::new(DataFrameCommand::PlotCountNa, Content::PlotlyFig(json!({"data": []})))
            .with_sub_type(SubContentType::ApplicationPlotly),
        Message::new(CodeEditorCommand::Execute, Content::Image("iVBORw0KGgo=".to_string()))
            .with_sub_type(SubContentType::ImagePng),
        Message::new(
            CodeEditorCommand::Execute,
            Content::RichOutput(json!({"text/plain": "1"}).as_object().unwrap().clone()),
        )
        .with_sub_type(SubContentType::TextPlain)
        .with_seq_number(Some(11)),
        Message::new(CodeEditorCommand::Execute, Content::KernelEvent(json!({"execution_state": "busy"})))
            .with_sub_type(SubContentType::None),
        Message::new(ExplorerCommand::Delete, Content::None).error_reply("gone"),
    ];

    for message in samples {
        let line = message.encode().expect("Should encode");
        let decoded = Message::decode(&line).expect("Should decode");
        assert_eq!(decoded, message, "round trip of {}", line);
    }

    println!("Round trip test passed");
}

#[test]
fn test_reply_copies_correlation_fields() {
    let request = Message::new(CodeEditorCommand::Execute, Content::Text("x".to_string()))
        .with_seq_number(Some(5))
        .with_metadata_entry("cell", json!("c1"));

    let reply = request.reply(Content::Text("out".to_string()));
    assert_eq!(reply.command, request.command);
    assert_eq!(reply.endpoint(), Endpoint::CodeEditor);
    assert_eq!(reply.seq_number, Some(5));
    assert_eq!(reply.metadata_str("cell"), Some("c1"));
    assert!(!reply.error);

    let failure = request.error_reply("boom");
    assert!(failure.error);
    assert_eq!(failure.content_type(), ContentType::Str);
    assert_eq!(failure.seq_number, Some(5));

    let redirected = request.reply(Content::None).with_command(ProjectCommand::ListDir);
    assert_eq!(redirected.endpoint(), Endpoint::FileManager);
}

#[test]
fn test_every_endpoint_owns_its_commands() {
    for endpoint in Endpoint::ALL {
        let commands = Command::all_for(*endpoint);
        assert!(!commands.is_empty(), "{} has no commands", endpoint);
        for command in commands {
            assert_eq!(command.endpoint(), *endpoint);
            assert_eq!(Command::parse(*endpoint, command.as_str()), Some(command));
        }
    }
}
