pub mod command;
pub mod config;
pub mod report;

pub use command::{Command, CommandPayload, Response, ResponseType};
pub use config::Config;
pub use report::{Report, ReportError};
