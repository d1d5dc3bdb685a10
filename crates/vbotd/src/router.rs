//! Command routing.
//!
//! Routes are `(pattern, handler, description)` triples tested in
//! registration order against the command text; the first pattern found
//! anywhere in the text wins.

use regex::Regex;
use thiserror::Error;
use tracing::debug;
use vbot_core::{Command, Response};

use crate::commander::Commander;
use crate::handlers;

/// Help text for routes registered without a description.
pub const UNDOCUMENTED: &str = "Handler not documented.";

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// Handler invoked for a matched command.
pub type Handler = fn(&Commander, &Command, &mut Response);

/// Route table row: `(pattern, name shown in help, handler, description)`.
pub type RouteEntry = (&'static str, &'static str, Handler, Option<&'static str>);

/// Built-in routes, in help-listing order.
///
/// Patterns are anchored on the command word so that, e.g., `log` never
/// captures `inspect log-machine`.
pub const DEFAULT_ROUTES: &[RouteEntry] = &[
    (r"^help", "help", handlers::show_help, Some("Show this help")),
    (
        r"^(?:machines|list)",
        "machines|list",
        handlers::show_machines,
        Some("Lists all available machines and corresponding status"),
    ),
    (
        r"^(?:run|start)",
        "run|start",
        handlers::run_machines,
        Some("Start machines for #<branch>; list of machines or `all`"),
    ),
    (
        r"^inspect",
        "inspect",
        handlers::inspect_machines,
        Some("Inspect machine's stdout and stderr; list of machines or `all`"),
    ),
    (
        r"^(?:log|status)",
        "log|status",
        handlers::show_log,
        Some("Show test logs; list of machines or `all`"),
    ),
];

#[derive(Debug, Clone)]
pub struct Route {
    pattern: Regex,
    name: String,
    handler: Handler,
    description: Option<String>,
}

impl Route {
    pub fn new(
        pattern: &str,
        name: &str,
        handler: Handler,
        description: Option<&str>,
    ) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| RouterError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: regex,
            name: name.to_string(),
            handler,
            description: description.map(str::to_string),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Command words as shown to users.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description for help output.
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or(UNDOCUMENTED)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandRouter {
    routes: Vec<Route>,
}

impl CommandRouter {
    /// Build a router from an ordered route table.
    pub fn new(table: &[RouteEntry]) -> Result<Self> {
        let routes = table
            .iter()
            .map(|(pattern, name, handler, description)| {
                Route::new(pattern, name, *handler, *description)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// Router for the built-in commands.
    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_ROUTES)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// First route whose pattern occurs in `text`.
    pub fn find(&self, text: &str) -> Option<&Route> {
        let text = text.trim();
        self.routes.iter().find(|route| route.matches(text))
    }

    pub fn dispatch(&self, commander: &Commander, command: &Command) -> Response {
        let mut resp = Response::new();
        match self.find(command.text()) {
            Some(route) => {
                debug!(pattern = route.pattern(), "dispatching command");
                (route.handler)(commander, command, &mut resp);
            }
            None => {
                debug!(text = command.text(), "no route matched");
                resp.text = format!("Unknown command _{}_", command.text());
            }
        }
        resp
    }
}
