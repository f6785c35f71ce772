//! MagicCommandGen: turns `#! plot` lines into plotting code.
//!
//! Grammar: `#! plot <df>.<y>[, <y>...] [vs|by <x>]`. The plot kind comes
//! from metadata `plot_type`; without it a histogram is drawn for a single
//! axis and a scatter plot for `y vs x`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::internal::handler::handler::{Handler, HandlerError};
use crate::internal::message::envelope::{
    Command, Content, ContentType, Endpoint, MagicCommand, Message,
};
use crate::internal::message::wire::wire_enum;
use crate::internal::transport::outbox::Outbox;

pub const MAGIC_STARTER: &str = "#!";

static PLOT_MAGIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^#!\s*plot\s+(?P<df>[A-Za-z_]\w*)\.(?P<y>[A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)",
        r"(?:\s+(?:vs|by)\s+(?P<x>[A-Za-z_]\w*))?\s*$",
    ))
    .expect("plot magic pattern is valid")
});

wire_enum! {
    pub enum PlotKind {
        Bar => "bar",
        Line => "line",
        Scatter => "scatter",
        Histogram => "histogram",
        Box => "box",
        Violin => "violin",
        Strip => "strip",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotMagic {
    pub df: String,
    pub y: Vec<String>,
    pub x: Option<String>,
}

impl PlotMagic {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with(MAGIC_STARTER) {
            return None;
        }
        let captures = PLOT_MAGIC.captures(text)?;
        Some(Self {
            df: captures["df"].to_string(),
            y: captures["y"]
                .split(',')
                .map(|column| column.trim().to_string())
                .collect(),
            x: captures.name("x").map(|x| x.as_str().to_string()),
        })
    }

    pub fn default_kind(&self) -> PlotKind {
        if self.x.is_some() {
            PlotKind::Scatter
        } else {
            PlotKind::Histogram
        }
    }

    /// Python source drawing this plot with plotly express.
    pub fn to_code(&self, kind: PlotKind) -> String {
        let y = match self.y.as_slice() {
            [single] => Value::String(single.clone()),
            columns => json!(columns),
        };
        let axes = match (&self.x, kind) {
            (Some(x), _) => format!("x={}, y={}", json!(x), y),
            (None, PlotKind::Histogram) => format!("x={}", y),
            (None, _) => format!("y={}", y),
        };
        format!(
            "import plotly.express as px\npx.{}({}, {})",
            kind.as_str(),
            self.df,
            axes
        )
    }
}

pub struct MagicHandler {
    outbox: Outbox,
}

impl MagicHandler {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }

    fn gen_plot_code(&self, message: &Message) -> Result<Value, HandlerError> {
        let text = match &message.content {
            Content::Text(text) => text.as_str(),
            other => {
                return Err(HandlerError::InvalidContent {
                    expected: ContentType::Str,
                    found: other.content_type(),
                })
            }
        };

        let Some(magic) = PlotMagic::parse(text) else {
            return Ok(json!({
                "error": true,
                "message": format!("Not a plot command: {}", text.trim()),
            }));
        };

        let kind = match message.metadata_str("plot_type") {
            None => magic.default_kind(),
            Some(name) => match PlotKind::from_wire(name) {
                Some(kind) => kind,
                None => {
                    return Ok(json!({
                        "error": true,
                        "message": format!("Unsupported plot type: {}", name),
                    }))
                }
            },
        };

        Ok(json!({"code": magic.to_code(kind), "error": false}))
    }
}

impl Handler for MagicHandler {
    fn endpoint(&self) -> Endpoint {
        Endpoint::MagicCommandGenerator
    }

    fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message.command {
            Command::Magic(MagicCommand::GenPlotCode) => {
                let result = self.gen_plot_code(&message)?;
                self.outbox.send(message.reply(Content::Dict(result)));
                Ok(())
            }
            other => Err(HandlerError::unsupported(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plot_magic() {
        let magic = PlotMagic::parse("#! plot df.price, volume vs date").unwrap();
        assert_eq!(magic.df, "df");
        assert_eq!(magic.y, vec!["price", "volume"]);
        assert_eq!(magic.x.as_deref(), Some("date"));

        let magic = PlotMagic::parse("#!plot sales.amount").unwrap();
        assert_eq!(magic.x, None);
        assert_eq!(magic.default_kind(), PlotKind::Histogram);

        assert!(PlotMagic::parse("# plot df.a").is_none());
        assert!(PlotMagic::parse("#! plot df").is_none());
    }

    #[test]
    fn test_generated_code() {
        let magic = PlotMagic::parse("#! plot df.price by region").unwrap();
        assert_eq!(
            magic.to_code(PlotKind::Bar),
            "import plotly.express as px\npx.bar(df, x=\"region\", y=\"price\")"
        );

        let magic = PlotMagic::parse("#! plot df.a, b").unwrap();
        assert_eq!(
            magic.to_code(PlotKind::Line),
            "import plotly.express as px\npx.line(df, y=[\"a\",\"b\"])"
        );
    }
}
