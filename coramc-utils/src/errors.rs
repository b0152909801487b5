//! Errors generated by the compiler.

/// Convenience wrapper to represent success or failure of a compiler step.
pub type CoramResult<T> = Result<T, Error>;

/// Errors generated by the compiler. All of them are fatal: the thread
/// being compiled is abandoned as soon as one is raised.
pub struct Error {
    kind: Box<ErrorKind>,
    /// Optional post-amble for the error message.
    post_msg: Option<String>,
}

/// The different kinds of error the compiler can raise.
enum ErrorKind {
    /// Using a name that is not bound in the current scope chain.
    Undefined(String),
    /// A source construct the control-thread language does not support.
    Unsupported(String),
    /// Resource geometry that does not resolve to legal constants.
    Geometry(String),
    /// The input program does not parse.
    ParseError(String),
    /// The input file is invalid in some way.
    InvalidFile(String),
    /// Unable to write the output.
    WriteError(String),
    /// A catch-all for errors with no more specific kind.
    Misc(String),
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;
        match self {
            Undefined(msg) => write!(f, "name resolution error: {msg}"),
            Unsupported(msg) => write!(f, "unsupported construct: {msg}"),
            Geometry(msg) => write!(f, "resource geometry error: {msg}"),
            ParseError(msg) => write!(f, "parse error: {msg}"),
            InvalidFile(msg) => write!(f, "invalid file: {msg}"),
            WriteError(msg) => write!(f, "write error: {msg}"),
            Misc(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(post) = &self.post_msg {
            write!(f, "\n{post}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            post_msg: None,
        }
    }

    /// Add a post-amble to the error message.
    pub fn with_post_msg(mut self, msg: Option<String>) -> Self {
        self.post_msg = msg;
        self
    }

    pub fn undefined<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Undefined(msg.to_string()))
    }

    pub fn unsupported<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Unsupported(msg.to_string()))
    }

    pub fn geometry<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Geometry(msg.to_string()))
    }

    pub fn parse_error<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::ParseError(msg.to_string()))
    }

    pub fn invalid_file<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::InvalidFile(msg.to_string()))
    }

    pub fn write_error<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::WriteError(msg.to_string()))
    }

    pub fn misc<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Misc(msg.to_string()))
    }

    /// True if this error was raised during name resolution.
    pub fn is_undefined(&self) -> bool {
        matches!(*self.kind, ErrorKind::Undefined(..))
    }

    /// True if this error reports an unsupported construct.
    pub fn is_unsupported(&self) -> bool {
        matches!(*self.kind, ErrorKind::Unsupported(..))
    }

    /// True if this error reports illegal resource geometry.
    pub fn is_geometry(&self) -> bool {
        matches!(*self.kind, ErrorKind::Geometry(..))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::write_error(err)
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::invalid_file(err)
    }
}

impl From<std::fmt::Error> for Error {
    fn from(err: std::fmt::Error) -> Self {
        Error::write_error(err)
    }
}
