// Execution gateway library entry point

pub mod internal {
    pub mod message {
        pub mod wire;
        pub mod envelope;
        pub mod payload;
        pub mod kernel_event;
    }
    pub mod exec {
        pub mod expr;
        pub mod mode;
        pub mod context;
        pub mod subprocess;
    }
    pub mod classify {
        pub mod classifier;
    }
    pub mod handler {
        pub mod handler;
        pub mod forward;
        pub mod code_editor;
        pub mod dataframe;
        pub mod model;
        pub mod magic;
        pub mod file_manager;
        pub mod file_explorer;
    }
    pub mod project {
        pub mod manager;
    }
    pub mod router {
        pub mod router;
        pub mod shutdown;
    }
    pub mod transport {
        pub mod outbox;
    }
    pub mod config;
    pub mod profile;
}

// Re-export key types for external use
pub use internal::classify::classifier::{classify, merge_metadata};
pub use internal::config::{load_config, ConfigError, GatewayConfig, KernelConfig, ProjectsConfig};
pub use internal::exec::context::{
    EventSink, ExecuteError, Execution, ExecutionBackend, ExecutionContext,
};
pub use internal::exec::expr::{parse_expression, ExpressionError};
pub use internal::exec::mode::{infer_execution_mode, ExecutionMode, LineRange};
pub use internal::exec::subprocess::SubprocessBackend;
pub use internal::handler::handler::{Handler, HandlerError};
pub use internal::message::envelope::{
    Command, Content, ContentType, DecodeError, Endpoint, Message, Metadata, SubContentType,
};
pub use internal::message::kernel_event::{KernelChannel, KernelEvent, KernelMessageType};
pub use internal::project::manager::{ProjectManager, StoreError};
pub use internal::router::router::{HandlerRegistry, Router, RouterError, RouterState};
pub use internal::router::shutdown::{termination_signal, ShutdownCoordinator};
pub use internal::transport::outbox::{write_outbound, OutboundQueue, Outbox};
