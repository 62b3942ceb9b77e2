//! Remote process execution and file access over a single byte stream.
//!
//! Two platforms share the [`platform::Platform`] surface: a POSIX shell
//! driven through delimiter-framed command lines, and a resident agent that
//! hands out integer handles for files and processes.

pub mod agent;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod constants;
pub mod errors;
pub mod platform;
pub mod posix;
pub mod resolver;
pub mod services;
pub mod utils;

pub use agent::{AgentPlatform, BootstrapPlan, BootstrapReport};
pub use catalog::{Capability, Catalog, StreamKind};
pub use channel::{Channel, Wire};
pub use config::TransportConfig;
pub use errors::{ChannelError, TransportError, TransportErrorKind};
pub use platform::{CompletedProcess, OpenMode, Platform, ProcessSpec, Redirect};
pub use posix::PosixPlatform;
pub use resolver::{MethodParams, Resolver};
pub use services::logger::{LogLevel, Logger};
pub use services::session::{SessionInfo, SessionService};
