use arbor_core_types::ActionId;
use thiserror::Error;

/// Result type alias using ArborError
pub type Result<T> = std::result::Result<T, ArborError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// This taxonomy provides a stable, structured classification of all errors
/// raised by arbor. Each kind maps to a stable error code that can be used
/// for programmatic error handling, testing, and log assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Declaration / compile time
    Configuration,

    // Read/write separation
    TypeViolation,
    IllegalMutation,
    ProtectedWrite,
    IdentifierImmutable,

    // Structural
    InvalidSnapshot,
    InvalidReference,
    UnknownMember,
    NotFound,
    Destroyed,
    WrongNodeKind,
    AlreadyAttached,
    ViewCycle,
    UnexpectedValue,

    // Environment / integration
    MissingService,
    ExternalService,
    Io,
    Serialization,
    Persistence,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::Configuration => "ERR_CONFIGURATION",
            ExErrorKind::TypeViolation => "ERR_TYPE_VIOLATION",
            ExErrorKind::IllegalMutation => "ERR_ILLEGAL_MUTATION",
            ExErrorKind::ProtectedWrite => "ERR_PROTECTED_WRITE",
            ExErrorKind::IdentifierImmutable => "ERR_IDENTIFIER_IMMUTABLE",
            ExErrorKind::InvalidSnapshot => "ERR_INVALID_SNAPSHOT",
            ExErrorKind::InvalidReference => "ERR_INVALID_REFERENCE",
            ExErrorKind::UnknownMember => "ERR_UNKNOWN_MEMBER",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::Destroyed => "ERR_DESTROYED",
            ExErrorKind::WrongNodeKind => "ERR_WRONG_NODE_KIND",
            ExErrorKind::AlreadyAttached => "ERR_ALREADY_ATTACHED",
            ExErrorKind::ViewCycle => "ERR_VIEW_CYCLE",
            ExErrorKind::UnexpectedValue => "ERR_UNEXPECTED_VALUE",
            ExErrorKind::MissingService => "ERR_MISSING_SERVICE",
            ExErrorKind::ExternalService => "ERR_EXTERNAL_SERVICE",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether errors of this kind signal a programming mistake rather than bad data
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExErrorKind::Configuration
                | ExErrorKind::TypeViolation
                | ExErrorKind::IllegalMutation
                | ExErrorKind::ViewCycle
                | ExErrorKind::Internal
        )
    }
}

/// Canonical structured error type
///
/// This error type provides a structured representation of errors with
/// classification fields for programmatic handling and rich context for debugging.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    model: Option<String>,
    node_id: Option<u64>,
    action_id: Option<ActionId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            model: None,
            node_id: None,
            action_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Set the operation name
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Set the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the node handle
    pub fn with_node_id(mut self, node_id: u64) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Set the action correlation id
    pub fn with_action_id(mut self, action_id: ActionId) -> Self {
        self.action_id = Some(action_id);
        self
    }

    /// Set the error message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation name, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the model name, if any
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Get the node handle, if any
    pub fn node_id(&self) -> Option<u64> {
        self.node_id
    }

    /// Get the action correlation id, if any
    pub fn action_id(&self) -> Option<&ActionId> {
        self.action_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(model) = &self.model {
            write!(f, " (model: {})", model)?;
        }
        if let Some(node_id) = self.node_id {
            write!(f, " (node: #{})", node_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Error taxonomy for arbor operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArborError {
    // ===== Declaration Errors =====
    /// Invalid model, field, view or mutation declaration
    #[error("Invalid declaration on model '{model}': {reason}")]
    Configuration { model: String, reason: String },

    // ===== Read/Write Separation =====
    /// A view or mutation produced a value that does not match its declared type
    #[error("Invalid return type for '{name}'. Expected '{expected}' got '{actual}'")]
    TypeViolation {
        name: String,
        expected: String,
        actual: String,
    },

    /// A mutation (or direct write) was attempted while a view was being computed
    #[error("Views may not call mutation functions (attempted '{operation}')")]
    IllegalMutation { operation: String },

    /// A field or collection was written outside of an action
    #[error("Cannot modify '{path}': the object is protected and can only be modified by using a mutation")]
    ProtectedWrite { path: String },

    /// Identifier fields cannot change once an instance exists
    #[error("Identifier field '{field}' of model '{model}' is immutable")]
    IdentifierImmutable { model: String, field: String },

    // ===== Structural Errors =====
    /// A snapshot does not satisfy its schema type
    #[error("Snapshot is not assignable to type '{type_name}': {}", .violations.join("; "))]
    InvalidSnapshot {
        type_name: String,
        violations: Vec<String>,
    },

    /// A reference could not be resolved to a live instance
    #[error("Failed to resolve reference '{identifier}' to type '{target}'")]
    InvalidReference { target: String, identifier: String },

    /// A field, view, mutation or flow name is not declared on the model
    #[error("Model '{model}' has no {member_kind} named '{member}'")]
    UnknownMember {
        model: String,
        member_kind: String,
        member: String,
    },

    /// A node handle does not exist in the tree
    #[error("Node not found: #{node_id}")]
    NodeNotFound { node_id: u64 },

    /// The node backing an instance has been destroyed
    #[error("Instance {model}#{node_id} has been destroyed and can no longer be used")]
    NodeDestroyed { model: String, node_id: u64 },

    /// A node was used as the wrong kind of container
    #[error("Node #{node_id} is a {actual}, expected a {expected}")]
    WrongNodeKind {
        node_id: u64,
        expected: String,
        actual: String,
    },

    /// A node that already has a parent cannot be attached elsewhere
    #[error("Node #{node_id} already has a parent and cannot be attached again")]
    AlreadyAttached { node_id: u64 },

    /// A view read itself while being computed
    #[error("Cycle detected while computing view '{view}'")]
    ViewCycle { view: String },

    /// A value had a different runtime shape than the caller expected
    #[error("Expected a {expected} value, got '{actual}'")]
    UnexpectedValue { expected: String, actual: String },

    // ===== Environment Errors =====
    /// A service was not registered on the root environment
    #[error("Environment service not available: {name}")]
    MissingService { name: String },

    /// An environment-supplied service failed
    #[error("External service failed: {message}")]
    External { message: String },

    // ===== Generic Errors =====
    /// Serialization error (JSON/TOML encoding/decoding)
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ArborError {
    pub(crate) fn configuration(model: impl Into<String>, reason: impl Into<String>) -> Self {
        ArborError::Configuration {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ArborError::Internal {
            message: message.into(),
        }
    }

    /// Create an error for a failed environment service
    pub fn external(message: impl Into<String>) -> Self {
        ArborError::External {
            message: message.into(),
        }
    }

    /// Canonical kind of this error
    pub fn kind(&self) -> ExErrorKind {
        ExError::from(self.clone()).kind()
    }
}

/// Conversion from ArborError to ExError
impl From<ArborError> for ExError {
    fn from(err: ArborError) -> Self {
        match err {
            ArborError::Configuration { model, reason } => {
                ExError::new(ExErrorKind::Configuration)
                    .with_model(model)
                    .with_message(reason)
            }

            ArborError::TypeViolation {
                name,
                expected,
                actual,
            } => ExError::new(ExErrorKind::TypeViolation)
                .with_op(name)
                .with_message(format!("expected '{}' got '{}'", expected, actual)),

            ArborError::IllegalMutation { operation } => {
                ExError::new(ExErrorKind::IllegalMutation)
                    .with_op(operation)
                    .with_message("Views may not call mutation functions")
            }

            ArborError::ProtectedWrite { path } => ExError::new(ExErrorKind::ProtectedWrite)
                .with_message(format!("'{}' can only be modified inside a mutation", path)),

            ArborError::IdentifierImmutable { model, field } => {
                ExError::new(ExErrorKind::IdentifierImmutable)
                    .with_model(model)
                    .with_message(format!("Identifier field '{}' is immutable", field))
            }

            ArborError::InvalidSnapshot {
                type_name,
                violations,
            } => ExError::new(ExErrorKind::InvalidSnapshot)
                .with_model(type_name)
                .with_message(violations.join("; ")),

            ArborError::InvalidReference { target, identifier } => {
                ExError::new(ExErrorKind::InvalidReference)
                    .with_model(target)
                    .with_message(format!("Unresolved identifier '{}'", identifier))
            }

            ArborError::UnknownMember {
                model,
                member_kind,
                member,
            } => ExError::new(ExErrorKind::UnknownMember)
                .with_model(model)
                .with_message(format!("No {} named '{}'", member_kind, member)),

            ArborError::NodeNotFound { node_id } => ExError::new(ExErrorKind::NotFound)
                .with_node_id(node_id)
                .with_message("Node not found"),

            ArborError::NodeDestroyed { model, node_id } => ExError::new(ExErrorKind::Destroyed)
                .with_model(model)
                .with_node_id(node_id)
                .with_message("Instance has been destroyed"),

            ArborError::WrongNodeKind {
                node_id,
                expected,
                actual,
            } => ExError::new(ExErrorKind::WrongNodeKind)
                .with_node_id(node_id)
                .with_message(format!("Expected {}, found {}", expected, actual)),

            ArborError::AlreadyAttached { node_id } => ExError::new(ExErrorKind::AlreadyAttached)
                .with_node_id(node_id)
                .with_message("Node already has a parent"),

            ArborError::ViewCycle { view } => ExError::new(ExErrorKind::ViewCycle)
                .with_op(view)
                .with_message("View depends on itself"),

            ArborError::UnexpectedValue { expected, actual } => {
                ExError::new(ExErrorKind::UnexpectedValue)
                    .with_message(format!("Expected {}, got {}", expected, actual))
            }

            ArborError::MissingService { name } => ExError::new(ExErrorKind::MissingService)
                .with_op("env")
                .with_message(format!("Service '{}' is not registered", name)),

            ArborError::External { message } => {
                ExError::new(ExErrorKind::ExternalService).with_message(message)
            }

            ArborError::Serialization { message } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }

            ArborError::Internal { message } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}

/// Conversion from serde_json::Error to ArborError
impl From<serde_json::Error> for ArborError {
    fn from(err: serde_json::Error) -> Self {
        ArborError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_separation_kind_codes() {
        let cases = [
            (ExErrorKind::Configuration, "ERR_CONFIGURATION"),
            (ExErrorKind::TypeViolation, "ERR_TYPE_VIOLATION"),
            (ExErrorKind::IllegalMutation, "ERR_ILLEGAL_MUTATION"),
            (ExErrorKind::ProtectedWrite, "ERR_PROTECTED_WRITE"),
            (ExErrorKind::ViewCycle, "ERR_VIEW_CYCLE"),
        ];
        for (kind, expected_code) in cases {
            assert_eq!(kind.code(), expected_code, "Wrong code for {:?}", kind);
        }
    }

    #[test]
    fn test_type_violation_message_names_view_and_types() {
        let err = ArborError::TypeViolation {
            name: "CartEntry.price".to_string(),
            expected: "number".to_string(),
            actual: "string".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid return type for 'CartEntry.price'. Expected 'number' got 'string'"
        );
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(ExErrorKind::Configuration.is_fatal());
        assert!(ExErrorKind::IllegalMutation.is_fatal());
        assert!(!ExErrorKind::InvalidSnapshot.is_fatal());
        assert!(!ExErrorKind::MissingService.is_fatal());
    }

    #[test]
    fn test_ex_error_source_chain() {
        let inner = ExError::new(ExErrorKind::Persistence).with_message("disk full");
        let outer = ExError::new(ExErrorKind::ExternalService).with_source(inner);
        assert_eq!(
            outer.source_error().map(|e| e.kind()),
            Some(ExErrorKind::Persistence)
        );
    }
}
