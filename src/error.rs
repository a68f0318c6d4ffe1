/// Error types for the AgentSmith-HUB engine
use thiserror::Error;

/// Errors surfaced by compilation, evaluation, and the project runtime
#[derive(Error, Debug)]
pub enum HubError {
    /// Static ruleset validation failure, carrying the user-visible message
    #[error("compile error: {0}")]
    Compile(String),

    /// Malformed ruleset XML
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Malformed XML attribute
    #[error("XML attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    /// Malformed project YAML
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// Malformed event JSON
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Regex compilation failure
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Condition expression parse failure
    #[error("condition parse error: {0}")]
    Condition(String),

    /// Plugin resolution or invocation failure
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Shared key/value store failure
    #[error("store error: {0}")]
    Store(String),

    /// Project graph or lifecycle failure
    #[error("project error: {0}")]
    Project(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Kafka driver failure
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(String),

    /// Anything that escapes the other categories
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl HubError {
    /// Build a compile error carrying the exact user-visible message
    pub fn compile(msg: impl Into<String>) -> Self {
        HubError::Compile(msg.into())
    }
}

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;
