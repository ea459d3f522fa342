use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadPortsRange(String),
    NotInRange(String),
    MissingSecret,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::MissingSecret => write!(f, "Access token secret is not configured"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ReadFailed(String),
    WriteFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum ContainerError {
    RuntimeNotAvailable(String),
    CreationFailed(String),
    StartFailed(String),
    InspectFailed(String),
    ExecFailed(String),
    Timeout(String),
    IoError(std::io::Error),
    StorageError(StorageError),
    PortError(PortError),
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::RuntimeNotAvailable(e) => {
                write!(f, "Container runtime not available: {}", e)
            }
            ContainerError::CreationFailed(e) => write!(f, "Container creation failed: {}", e),
            ContainerError::StartFailed(e) => write!(f, "Container start failed: {}", e),
            ContainerError::InspectFailed(e) => write!(f, "Container inspection failed: {}", e),
            ContainerError::ExecFailed(e) => write!(f, "Container exec failed: {}", e),
            ContainerError::Timeout(e) => write!(f, "Container runtime timed out: {}", e),
            ContainerError::IoError(e) => write!(f, "Container IO error: {}", e),
            ContainerError::StorageError(e) => write!(f, "Container record error: {}", e),
            ContainerError::PortError(e) => write!(f, "Container port error: {}", e),
        }
    }
}

impl std::error::Error for ContainerError {}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        ContainerError::IoError(err)
    }
}

impl From<StorageError> for ContainerError {
    fn from(err: StorageError) -> Self {
        ContainerError::StorageError(err)
    }
}

impl From<PortError> for ContainerError {
    fn from(err: PortError) -> Self {
        ContainerError::PortError(err)
    }
}

#[derive(Debug)]
pub enum PortError {
    RangeExhausted { base: u16, size: u16 },
    DetectionFailed(String),
    StorageError(StorageError),
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::RangeExhausted { base, size } => write!(
                f,
                "No free range of {} ports left above base port {}",
                size, base
            ),
            PortError::DetectionFailed(e) => write!(f, "Port detection failed: {}", e),
            PortError::StorageError(e) => write!(f, "Port record error: {}", e),
        }
    }
}

impl std::error::Error for PortError {}

impl From<StorageError> for PortError {
    fn from(err: StorageError) -> Self {
        PortError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum TerminalError {
    CapacityReached { max: usize },
    DefaultProtected,
    NotFound(String),
    ConnectionClosed(String),
    SpawnFailed(String),
    IoError(String),
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalError::CapacityReached { max } => {
                write!(f, "Maximum {} terminals allowed", max)
            }
            TerminalError::DefaultProtected => {
                write!(f, "The default terminal cannot be closed")
            }
            TerminalError::NotFound(id) => write!(f, "Terminal {} not found", id),
            TerminalError::ConnectionClosed(id) => {
                write!(f, "Connection {} is already closed", id)
            }
            TerminalError::SpawnFailed(e) => write!(f, "Terminal spawn failed: {}", e),
            TerminalError::IoError(e) => write!(f, "Terminal IO error: {}", e),
        }
    }
}

impl std::error::Error for TerminalError {}

#[derive(Debug)]
pub enum FileError {
    InvalidPath(String),
    PathEscapesWorkspace(String),
    NotFound(String),
    NotAFile(String),
    IoError(std::io::Error),
    TreeFailed(String),
}

impl FileError {
    /// HTTP status used when the error is returned by a file endpoint.
    pub fn status_code(&self) -> u16 {
        match self {
            FileError::InvalidPath(_)
            | FileError::PathEscapesWorkspace(_)
            | FileError::NotAFile(_) => 400,
            FileError::NotFound(_) => 404,
            FileError::IoError(_) | FileError::TreeFailed(_) => 500,
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::InvalidPath(p) => write!(f, "Invalid file path: {}", p),
            FileError::PathEscapesWorkspace(p) => {
                write!(f, "Path outside user directory: {}", p)
            }
            FileError::NotFound(p) => write!(f, "File not found or inaccessible: {}", p),
            FileError::NotAFile(p) => write!(f, "Path is not a file: {}", p),
            FileError::IoError(e) => write!(f, "File IO error: {}", e),
            FileError::TreeFailed(e) => write!(f, "File tree generation failed: {}", e),
        }
    }
}

impl std::error::Error for FileError {}

impl From<std::io::Error> for FileError {
    fn from(err: std::io::Error) -> Self {
        FileError::IoError(err)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    TokenExpired,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Access token is required"),
            AuthError::InvalidToken => write!(f, "Invalid access token"),
            AuthError::TokenExpired => write!(f, "Access token expired"),
        }
    }
}

impl std::error::Error for AuthError {}

/// A websocket frame that could not be turned into a client event.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    Malformed(String),
    UnknownEvent(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Malformed(e) => write!(f, "Malformed frame: {}", e),
            FrameError::UnknownEvent(e) => write!(f, "Unknown event: {}", e),
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug)]
pub enum SessionError {
    ContainerError(ContainerError),
    TerminalError(TerminalError),
    FileError(FileError),
    /// The user has no connection with a ready container.
    NotActive(String),
}

impl SessionError {
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::FileError(e) => e.status_code(),
            SessionError::NotActive(_) => 400,
            SessionError::ContainerError(_) | SessionError::TerminalError(_) => 500,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ContainerError(e) => write!(f, "{}", e),
            SessionError::TerminalError(e) => write!(f, "{}", e),
            SessionError::FileError(e) => write!(f, "{}", e),
            SessionError::NotActive(user) => write!(f, "No active session for user {}", user),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ContainerError> for SessionError {
    fn from(err: ContainerError) -> Self {
        SessionError::ContainerError(err)
    }
}

impl From<FileError> for SessionError {
    fn from(err: FileError) -> Self {
        SessionError::FileError(err)
    }
}

impl From<TerminalError> for SessionError {
    fn from(err: TerminalError) -> Self {
        SessionError::TerminalError(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    ContainerError(ContainerError),
    WebError(WebError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::ContainerError(e) => write!(f, "Container error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<ContainerError> for ControllerError {
    fn from(err: ContainerError) -> Self {
        ControllerError::ContainerError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
