use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    NoRoute,
    NoInterface,
    OversizeForMtu,
    PayloadTooLarge,
    PortInUse,
    NotBound,
    InvalidState,
    NoSuchSocket,
    SendFailed,
}

impl NetError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRoute => "No route to host",
            Self::NoInterface => "No such interface",
            Self::OversizeForMtu => "Packet exceeds interface MTU",
            Self::PayloadTooLarge => "Payload exceeds protocol maximum",
            Self::PortInUse => "Port already bound",
            Self::NotBound => "Socket not bound",
            Self::InvalidState => "Socket in wrong state for operation",
            Self::NoSuchSocket => "No such socket",
            Self::SendFailed => "Device refused the frame",
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type NetResult<T> = Result<T, NetError>;
