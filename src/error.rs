//! Error types of the read, compose and compile stages.
//!
//! Read and compose errors are collected into [`ValidationErrors`] so a client
//! sees every problem with a query at once. Compile errors fail fast.

use std::fmt;

use crate::expr::{ParseError, ParseErrorKind};

/// Who is at fault for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or invalid query input (400-equivalent).
    ClientInput,
    /// Invalid server configuration, such as a bad override (500-equivalent).
    Server,
}

/// One problem with a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// Tokenizer or grammar failure.
    #[error("Syntax error in '{parameter}' at position {position}: {message}")]
    Syntax { parameter: String, position: usize, message: String },

    /// Unknown field, missing capability, exceeded limit.
    #[error("Invalid '{parameter}'{}: {message}", at(.position))]
    Semantic { parameter: String, position: Option<usize>, message: String },

    /// An override callback produced an expression the graph rejects.
    #[error("Configuration error for resource type '{resource_type}': {message}")]
    Configuration { resource_type: String, message: String },
}

fn at(position: &Option<usize>) -> String {
    position.map(|p| format!(" at position {p}")).unwrap_or_default()
}

impl QueryError {
    pub fn semantic(parameter: impl Into<String>, position: Option<usize>, message: impl Into<String>) -> Self {
        QueryError::Semantic { parameter: parameter.into(), position, message: message.into() }
    }

    pub fn configuration(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::Configuration { resource_type: resource_type.into(), message: message.into() }
    }

    /// Attribute a parse failure to a parameter.
    pub fn from_parse(parameter: impl Into<String>, error: ParseError) -> Self {
        let parameter = parameter.into();
        match error.kind {
            ParseErrorKind::Syntax => {
                QueryError::Syntax { parameter, position: error.position, message: error.message }
            }
            ParseErrorKind::Resolution => {
                QueryError::Semantic { parameter, position: Some(error.position), message: error.message }
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Syntax { .. } | QueryError::Semantic { .. } => ErrorKind::ClientInput,
            QueryError::Configuration { .. } => ErrorKind::Server,
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::ClientInput => 400,
            ErrorKind::Server => 500,
        }
    }

    /// Name of the offending query parameter, if the error came from one.
    pub fn parameter(&self) -> Option<&str> {
        match self {
            QueryError::Syntax { parameter, .. } | QueryError::Semantic { parameter, .. } => Some(parameter),
            QueryError::Configuration { .. } => None,
        }
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            QueryError::Syntax { position, .. } => Some(*position),
            QueryError::Semantic { position, .. } => *position,
            QueryError::Configuration { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            QueryError::Syntax { message, .. }
            | QueryError::Semantic { message, .. }
            | QueryError::Configuration { message, .. } => message,
        }
    }
}

/// All problems found while reading and composing one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<QueryError>);

impl ValidationErrors {
    pub fn push(&mut self, error: QueryError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = QueryError>) {
        self.0.extend(errors);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryError> {
        self.0.iter()
    }

    /// True when any error is a server-side configuration fault.
    pub fn is_server_fault(&self) -> bool {
        self.0.iter().any(|e| e.kind() == ErrorKind::Server)
    }

    /// 500 if any error is a server fault, else 400.
    pub fn status_code(&self) -> u16 {
        if self.is_server_fault() { 500 } else { 400 }
    }

    /// `Ok(value)` when no error was collected.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl From<QueryError> for ValidationErrors {
    fn from(error: QueryError) -> Self {
        ValidationErrors(vec![error])
    }
}

impl IntoIterator for ValidationErrors {
    type Item = QueryError;
    type IntoIter = std::vec::IntoIter<QueryError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a QueryError;
    type IntoIter = std::slice::Iter<'a, QueryError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Failure to compile a query layer into a plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// A to-many hop used where a single value is required.
    #[error("Field chain '{chain}' traverses to-many relationship '{relationship}' without count() or has().")]
    Cardinality { chain: String, relationship: String },

    #[error("Invalid pagination cursor: {0}")]
    InvalidCursor(String),

    /// The source cannot express an instruction.
    #[error("Unsupported by source: {0}")]
    Unsupported(String),

    /// A backend mapping has no entry for a type or relationship.
    #[error("Missing mapping: {0}")]
    UnknownMapping(String),
}

impl CompileError {
    /// Cardinality errors stem from client input, the rest from server setup.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Cardinality { .. } | CompileError::InvalidCursor(_) => ErrorKind::ClientInput,
            CompileError::Unsupported(_) | CompileError::UnknownMapping(_) => ErrorKind::Server,
        }
    }
}
