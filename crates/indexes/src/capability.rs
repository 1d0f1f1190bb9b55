//! The three parallel aggregator indexes share one design (§4.5); this is
//! the small bit of per-capability policy that differs between them.

/// Which of the three capability indexes this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Tools,
    Resources,
    Prompts,
}

impl Capability {
    /// The backend JSON-RPC method used to list this capability (§4.5.1 step 1).
    pub fn list_method(&self) -> &'static str {
        match self {
            Capability::Tools => "tools/list",
            Capability::Resources => "resources/list",
            Capability::Prompts => "prompts/list",
        }
    }

    /// Directory name under the metadata cache's base dir.
    pub fn cache_namespace(&self) -> &'static str {
        match self {
            Capability::Tools => "tools",
            Capability::Resources => "resources",
            Capability::Prompts => "prompts",
        }
    }
}
