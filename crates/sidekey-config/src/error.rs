use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("configuration is not valid KDL")]
    #[diagnostic(code(sidekey::config::syntax))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    /// Well-formed KDL with a bad or missing value.
    #[error("invalid configuration: {message}")]
    #[diagnostic(code(sidekey::config::invalid))]
    Invalid { message: String },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}
