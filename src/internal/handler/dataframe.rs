//! DFManager: dataframe inspection queries run inside the kernel.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::internal::exec::context::ExecutionContext;
use crate::internal::handler::forward::run_kernel_query;
use crate::internal::handler::handler::{optional_u64, required_str, Handler, HandlerError};
use crate::internal::message::envelope::{
    Command, Content, DataFrameCommand, Endpoint, Message, SubContentType,
};
use crate::internal::transport::outbox::Outbox;

/// Pandas dataframes in the kernel namespace, keyed by variable name.
const ACTIVE_DATAFRAMES_QUERY: &str = "__import__('IPython').display.JSON({\
name: {'name': name, 'shape': list(obj.shape), 'columns': [str(column) for column in obj.columns]} \
for name, obj in list(globals().items()) \
if not name.startswith('_') \
and type(obj).__name__ == 'DataFrame' \
and type(obj).__module__.split('.')[0] == 'pandas'})";

const DEFAULT_FROM_INDEX: u64 = 0;
const DEFAULT_PAGE_SIZE: u64 = 50;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("identifier pattern is valid")
});

pub struct DataFrameHandler {
    context: Arc<ExecutionContext>,
    outbox: Outbox,
}

impl DataFrameHandler {
    pub fn new(context: Arc<ExecutionContext>, outbox: Outbox) -> Self {
        Self { context, outbox }
    }
}

impl Handler for DataFrameHandler {
    fn endpoint(&self) -> Endpoint {
        Endpoint::DataFrameManager
    }

    fn handle(&self, message: Message) -> Result<(), HandlerError> {
        let Command::DataFrame(command) = message.command else {
            return Err(HandlerError::unsupported(message.command));
        };
        let code = build_query(command, &message)?;
        tracing::info!(command = %command, "Dataframe query");
        run_kernel_query(
            &self.context,
            &code,
            message,
            self.outbox.clone(),
            move |reply| Ok(shape_reply(command, reply)),
        )
    }
}

/// Sends DFManager a fresh `update_df_status` without being asked.
pub fn push_dataframe_status(context: &ExecutionContext, outbox: Outbox) -> Result<(), HandlerError> {
    let request = Message::new(DataFrameCommand::UpdateDfStatus, Content::None);
    run_kernel_query(context, ACTIVE_DATAFRAMES_QUERY, request, outbox, |reply| {
        Ok(shape_reply(DataFrameCommand::UpdateDfStatus, reply))
    })
}

/// Python source for one dataframe command, built from request metadata.
pub fn build_query(command: DataFrameCommand, message: &Message) -> Result<String, HandlerError> {
    Ok(match command {
        DataFrameCommand::UpdateDfStatus => ACTIVE_DATAFRAMES_QUERY.to_string(),
        DataFrameCommand::GetTableData => {
            let df_id = dataframe_id(message)?;
            let from = optional_u64(message, "from_index", DEFAULT_FROM_INDEX)?;
            let count = optional_u64(message, "count", DEFAULT_PAGE_SIZE)?;
            json_display(&format!(
                "{}.iloc[{}:{}].to_json(orient='split')",
                df_id,
                from,
                from.saturating_add(count)
            ))
        }
        DataFrameCommand::GetCountNa => json_display(&format!(
            "{}.isna().sum().to_json()",
            dataframe_id(message)?
        )),
        DataFrameCommand::PlotColumnHistogram => {
            let df_id = dataframe_id(message)?;
            let column = python_string(required_str(message, "col_name")?);
            format!(
                "__import__('plotly.express', fromlist=['histogram']).histogram({}, x={})",
                df_id, column
            )
        }
        DataFrameCommand::PlotCountNa => format!(
            "__import__('plotly.express', fromlist=['bar']).bar({}.isna().sum())",
            dataframe_id(message)?
        ),
    })
}

fn dataframe_id(message: &Message) -> Result<&str, HandlerError> {
    let df_id = required_str(message, "df_id")?;
    if !IDENTIFIER.is_match(df_id) {
        return Err(HandlerError::InvalidField {
            field: "df_id",
            reason: format!("'{}' is not an identifier", df_id),
        });
    }
    Ok(df_id)
}

fn json_display(json_expr: &str) -> String {
    format!(
        "__import__('IPython').display.JSON(__import__('json').loads({}))",
        json_expr
    )
}

/// Quotes `value` as a Python string literal.
fn python_string(value: &str) -> String {
    // JSON string syntax is a subset of Python's.
    Value::String(value.to_string()).to_string()
}

/// Maps a classified kernel reply onto the DFManager reply shapes.
pub fn shape_reply(command: DataFrameCommand, reply: Message) -> Option<Message> {
    if reply.error {
        return Some(reply);
    }
    match reply.content {
        Content::Text(_) => Some(reply),
        Content::RichOutput(ref media) => {
            if let Some(figure) = media.get(SubContentType::ApplicationPlotly.as_str()) {
                let figure = figure.clone();
                return Some(Message {
                    content: Content::PlotlyFig(figure),
                    sub_type: Some(SubContentType::ApplicationPlotly),
                    ..reply
                });
            }
            let data = media.get(SubContentType::ApplicationJson.as_str())?.clone();
            let content = match command {
                DataFrameCommand::GetTableData => Content::DataFrame(data),
                _ => Content::Dict(data),
            };
            Some(Message {
                content,
                sub_type: None,
                ..reply
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(command: DataFrameCommand, metadata: Value) -> Message {
        let Value::Object(metadata) = metadata else {
            panic!("metadata must be an object");
        };
        Message::new(command, Content::None).with_metadata(metadata)
    }

    #[test]
    fn test_table_query_uses_paging_defaults() {
        let code = build_query(
            DataFrameCommand::GetTableData,
            &request(DataFrameCommand::GetTableData, json!({"df_id": "df"})),
        )
        .unwrap();
        assert!(code.contains("df.iloc[0:50]"));
    }

    #[test]
    fn test_rejects_injected_df_id() {
        let result = build_query(
            DataFrameCommand::GetCountNa,
            &request(DataFrameCommand::GetCountNa, json!({"df_id": "df; import os"})),
        );
        assert!(matches!(result, Err(HandlerError::InvalidField { field: "df_id", .. })));
    }

    #[test]
    fn test_histogram_needs_column() {
        let result = build_query(
            DataFrameCommand::PlotColumnHistogram,
            &request(DataFrameCommand::PlotColumnHistogram, json!({"df_id": "df"})),
        );
        assert!(matches!(result, Err(HandlerError::MissingField("col_name"))));

        let code = build_query(
            DataFrameCommand::PlotColumnHistogram,
            &request(
                DataFrameCommand::PlotColumnHistogram,
                json!({"df_id": "df", "col_name": "it's"}),
            ),
        )
        .unwrap();
        assert!(code.ends_with("histogram(df, x=\"it's\")"));
    }

    #[test]
    fn test_status_query_needs_no_df_id() {
        let code = build_query(
            DataFrameCommand::UpdateDfStatus,
            &request(DataFrameCommand::UpdateDfStatus, json!({})),
        )
        .unwrap();
        assert_eq!(code, ACTIVE_DATAFRAMES_QUERY);
        assert!(crate::internal::exec::expr::is_expression(ACTIVE_DATAFRAMES_QUERY));
    }

    #[test]
    fn test_status_reply_is_dict() {
        let mut media = serde_json::Map::new();
        media.insert("application/json".to_string(), json!({"df": {"shape": [2, 1]}}));
        let reply = Message::new(DataFrameCommand::UpdateDfStatus, Content::RichOutput(media));

        let shaped = shape_reply(DataFrameCommand::UpdateDfStatus, reply).unwrap();
        assert_eq!(shaped.content, Content::Dict(json!({"df": {"shape": [2, 1]}})));
    }
}
