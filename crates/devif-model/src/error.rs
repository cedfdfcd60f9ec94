//! Error taxonomy shared by the tree, the codec and the transaction engine.
//!
//! Every failure carries a signed code (negative for the built-in taxonomy,
//! positive for caller-defined errors), a human-readable message and an
//! optional structured [`Value`] payload. Verification failures use the
//! payload to report what was written and what came back.

use core::fmt;

use crate::value::Value;

/// Data-type errors: casts and unsupported value kinds or operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataTypeError {
    /// A value could not be converted to the requested kind.
    #[error("Invalid cast from {from} to {to}")]
    InvalidCast {
        /// Source kind
        from: &'static str,
        /// Requested kind
        to: &'static str,
    },

    /// A value or node has the wrong kind for this context.
    #[error("Invalid type: {0}")]
    InvalidType(String),

    /// The value kind is recognized but not supported here.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// The operation is invalid for the given arguments.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The operation is not implemented by this collaborator.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// Device-interface tree errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// No node with the given name or address.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A sibling with the same name already exists.
    #[error("Duplicate child: {0}")]
    DuplicateChild(String),

    /// The node is already owned by another parent.
    #[error("Child already linked: {0}")]
    AlreadyLinked(String),

    /// Linking would make a node its own child or descendant.
    #[error("Self reference: {0}")]
    SelfReference(String),

    /// No attribute with the given name.
    #[error("Attribute not found: {0}")]
    AttrNotFound(String),

    /// An attribute exists but its value is unusable.
    #[error("Invalid attribute {name}: {reason}")]
    InvalidAttr {
        /// Attribute name
        name: String,
        /// Why the value was rejected
        reason: String,
    },
}

/// Device-level errors raised by the transaction engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device lock could not be set up.
    #[error("Mutex setup failed: {0}")]
    MutexSetup(String),

    /// A transfer or verification step failed.
    #[error("Operation failed: {0}")]
    Operation(String),

    /// A terminal or register identifier could not be parsed or resolved.
    #[error("Address parse error: {0}")]
    Parse(String),
}

/// Transport errors surfaced by a [`Transport`] implementation.
///
/// [`Transport`]: https://docs.rs/devif-engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport could not be initialized.
    #[error("Transport init failed: {0}")]
    Init(String),

    /// The device answered outside the protocol.
    #[error("Transport protocol error: {0}")]
    Protocol(String),

    /// The transfer itself failed.
    #[error("Transport communication error: {0}")]
    Communication(String),

    /// Firmware upload or firmware-reported failure.
    #[error("Transport firmware error: {0}")]
    Firmware(String),

    /// The transfer did not complete in time.
    #[error("Transport timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed
        timeout_ms: u32,
    },
}

/// Errors from an interface loader populating a tree from a persisted format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterfaceError {
    /// Unknown or malformed entity.
    #[error("Interface entity error: {0}")]
    Entity(String),

    /// The document could not be parsed.
    #[error("Interface parse error: {0}")]
    Parse(String),

    /// The document parsed but violates the tree rules.
    #[error("Interface validation error: {0}")]
    Validation(String),

    /// The loader could not be initialized.
    #[error("Interface init error: {0}")]
    Init(String),
}

/// Errors from an external device library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    /// The library could not be located.
    #[error("External library not found: {0}")]
    NotFound(String),

    /// A required entry point is missing.
    #[error("External library missing function: {0}")]
    MissingFunction(String),

    /// The library violated its calling contract.
    #[error("External library protocol violation: {0}")]
    Protocol(String),
}

/// Errors from an embedded scripting bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// The interpreter failed to start.
    #[error("Script init error: {0}")]
    Init(String),

    /// A module search path is invalid.
    #[error("Script path error: {0}")]
    Path(String),

    /// The interpreter reported an internal failure.
    #[error("Script engine error: {0}")]
    Engine(String),

    /// The script itself raised.
    #[error("Script error: {0}")]
    Script(String),
}

/// Every error family, plus the caller-defined channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Data-type errors
    #[error(transparent)]
    DataType(#[from] DataTypeError),

    /// Tree errors
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Device errors
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Transport errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Interface-format errors
    #[error(transparent)]
    Interface(#[from] InterfaceError),

    /// External-library errors
    #[error(transparent)]
    External(#[from] ExternalError),

    /// Scripting errors
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Caller-defined error with a positive code.
    #[error("User error {code}: {message}")]
    User {
        /// Caller-supplied code
        code: i32,
        /// Caller-supplied message
        message: String,
    },
}

impl ErrorKind {
    /// Stable numeric code for this error.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::DataType(e) => match e {
                DataTypeError::InvalidCast { .. } => -1,
                DataTypeError::InvalidType(_) => -2,
                DataTypeError::UnsupportedType(_) => -3,
                DataTypeError::InvalidOperation(_) => -4,
                DataTypeError::UnsupportedOperation(_) => -5,
            },
            ErrorKind::Tree(e) => match e {
                TreeError::NodeNotFound(_) => -10,
                TreeError::DuplicateChild(_) => -11,
                TreeError::AlreadyLinked(_) => -12,
                TreeError::SelfReference(_) => -13,
                TreeError::AttrNotFound(_) => -14,
                TreeError::InvalidAttr { .. } => -15,
            },
            ErrorKind::Device(e) => match e {
                DeviceError::MutexSetup(_) => -20,
                DeviceError::Operation(_) => -21,
                DeviceError::Parse(_) => -22,
            },
            ErrorKind::Transport(e) => match e {
                TransportError::Init(_) => -30,
                TransportError::Protocol(_) => -31,
                TransportError::Communication(_) => -32,
                TransportError::Firmware(_) => -33,
                TransportError::Timeout { .. } => -34,
            },
            ErrorKind::Interface(e) => match e {
                InterfaceError::Entity(_) => -40,
                InterfaceError::Parse(_) => -41,
                InterfaceError::Validation(_) => -42,
                InterfaceError::Init(_) => -43,
            },
            ErrorKind::External(e) => match e {
                ExternalError::NotFound(_) => -50,
                ExternalError::MissingFunction(_) => -51,
                ExternalError::Protocol(_) => -52,
            },
            ErrorKind::Script(e) => match e {
                ScriptError::Init(_) => -60,
                ScriptError::Path(_) => -61,
                ScriptError::Engine(_) => -62,
                ScriptError::Script(_) => -63,
            },
            ErrorKind::User { code, .. } => *code,
        }
    }

    /// Error family for classification.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::DataType(_) => ErrorCategory::DataType,
            ErrorKind::Tree(_) => ErrorCategory::Tree,
            ErrorKind::Device(_) => ErrorCategory::Device,
            ErrorKind::Transport(_) => ErrorCategory::Transport,
            ErrorKind::Interface(_) => ErrorCategory::Interface,
            ErrorKind::External(_) => ErrorCategory::External,
            ErrorKind::Script(_) => ErrorCategory::Script,
            ErrorKind::User { .. } => ErrorCategory::User,
        }
    }
}

/// Error family for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCategory {
    /// Casts and value kinds
    DataType = 0,
    /// Tree structure and attributes
    Tree = 1,
    /// Device operations and addressing
    Device = 2,
    /// Transport layer
    Transport = 3,
    /// Interface loaders
    Interface = 4,
    /// External device libraries
    External = 5,
    /// Scripting bridge
    Script = 6,
    /// Caller-defined
    User = 255,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::DataType => write!(f, "DataType"),
            ErrorCategory::Tree => write!(f, "Tree"),
            ErrorCategory::Device => write!(f, "Device"),
            ErrorCategory::Transport => write!(f, "Transport"),
            ErrorCategory::Interface => write!(f, "Interface"),
            ErrorCategory::External => write!(f, "External"),
            ErrorCategory::Script => write!(f, "Script"),
            ErrorCategory::User => write!(f, "User"),
        }
    }
}

/// A specialized `Result` type for device-interface operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by every fallible operation in this workspace.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    payload: Option<Value>,
}

impl Error {
    /// Create an error without payload.
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
        }
    }

    /// Create a caller-defined error.
    pub fn user(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User {
            code,
            message: message.into(),
        })
    }

    /// Create a device operation error.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::new(DeviceError::Operation(message.into()))
    }

    /// Create an address parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(DeviceError::Parse(message.into()))
    }

    /// Create a node-not-found error.
    pub fn node_not_found(name: impl Into<String>) -> Self {
        Self::new(TreeError::NodeNotFound(name.into()))
    }

    /// Create an attribute-not-found error.
    pub fn attr_not_found(name: impl Into<String>) -> Self {
        Self::new(TreeError::AttrNotFound(name.into()))
    }

    /// Create an invalid-attribute error.
    pub fn invalid_attr(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(TreeError::InvalidAttr {
            name: name.into(),
            reason: reason.into(),
        })
    }

    /// Create an invalid-cast error.
    pub fn invalid_cast(from: &'static str, to: &'static str) -> Self {
        Self::new(DataTypeError::InvalidCast { from, to })
    }

    /// Create an invalid-type error.
    pub fn invalid_type(message: impl Into<String>) -> Self {
        Self::new(DataTypeError::InvalidType(message.into()))
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// The error family and detail.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Structured diagnostic payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Signed error code: negative for the taxonomy, positive for user errors.
    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// Error family.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Whether a retry policy may repeat the failed transfer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Device(DeviceError::Operation(_)) | ErrorKind::Transport(_)
        )
    }

    /// Whether this is a device operation error (verification or transfer failure).
    pub fn is_operation_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Device(DeviceError::Operation(_)))
    }
}

macro_rules! impl_from_family {
    ($($family:ty),* $(,)?) => {
        $(
            impl From<$family> for Error {
                fn from(e: $family) -> Self {
                    Error::new(e)
                }
            }
        )*
    };
}

impl_from_family!(
    ErrorKind,
    DataTypeError,
    TreeError,
    DeviceError,
    TransportError,
    InterfaceError,
    ExternalError,
    ScriptError,
);
