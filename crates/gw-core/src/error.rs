#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    RoomDropped,
    SendQueueFull,
    ConnClosed,
    NotFound,
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::RoomDropped => write!(f, "room dropped"),
            CoreError::SendQueueFull => write!(f, "send queue full"),
            CoreError::ConnClosed => write!(f, "connection closed"),
            CoreError::NotFound => write!(f, "not found"),
        }
    }
}

impl std::error::Error for CoreError {}
