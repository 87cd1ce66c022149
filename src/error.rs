//! Error taxonomy for the proxy
//!
//! Every command-level error ends up as a [`Status`] in a reply. Transport
//! errors never do: the framer recovers from them locally.

/// Reply status codes (wire values are fixed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(u32)]
pub enum Status {
    #[error("ok")]
    Ok = 0,
    #[error("malformed command")]
    MalformedCommand = 1,
    #[error("unknown command")]
    UnknownCommand = 2,
    #[error("out of range")]
    OutOfRange = 3,
    #[error("out of sequence")]
    OutOfSequence = 4,
    #[error("execution fault")]
    ExecutionFault = 5,
    #[error("integrity error")]
    IntegrityError = 6,
    #[error("invalid channel")]
    InvalidChannel = 7,
    #[error("not found")]
    NotFound = 8,
    #[error("invalid argument")]
    InvalidArgument = 9,
    #[error("busy")]
    Busy = 10,
}

impl Status {
    /// Every status, in wire order
    pub const ALL: [Status; 11] = [
        Status::Ok,
        Status::MalformedCommand,
        Status::UnknownCommand,
        Status::OutOfRange,
        Status::OutOfSequence,
        Status::ExecutionFault,
        Status::IntegrityError,
        Status::InvalidChannel,
        Status::NotFound,
        Status::InvalidArgument,
        Status::Busy,
    ];

    /// Convert from the wire value
    pub fn from_u32(n: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| *s as u32 == n)
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// Byte transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No byte arrived within the timeout
    #[error("byte timeout")]
    Timeout,
    /// Port not ready to accept or deliver data
    #[error("port not ready")]
    NotReady,
    /// Link is gone; terminal for the session
    #[error("transport disconnected")]
    Disconnected,
}

impl TransportError {
    /// Whether the session can continue after this error
    pub fn is_recoverable(self) -> bool {
        !matches!(self, TransportError::Disconnected)
    }
}

/// Syndrome captured when guarded code traps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultInfo {
    /// Exception syndrome register
    pub esr: u64,
    /// Fault address register
    pub far: u64,
    /// Address of the faulting instruction
    pub elr: u64,
}

impl FaultInfo {
    /// Exception class field of ESR
    pub fn exception_class(&self) -> u8 {
        ((self.esr >> 26) & 0x3F) as u8
    }
}

/// Access layer failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// Span not covered by the access policy (or overflowing)
    #[error("address range not accessible")]
    OutOfRange,
    /// Width/alignment/length combination not allowed
    #[error("invalid access argument")]
    InvalidArgument,
    /// The hardware trapped during the operation
    #[error("fault (EC {:#x}, ELR {:#x}, FAR {:#x})", .0.exception_class(), .0.elr, .0.far)]
    Fault(FaultInfo),
}

impl From<AccessError> for Status {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::OutOfRange => Status::OutOfRange,
            AccessError::InvalidArgument => Status::InvalidArgument,
            AccessError::Fault(_) => Status::ExecutionFault,
        }
    }
}

/// Collaborator failures (bring-up, property lookup)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// Property or node does not exist
    #[error("not found")]
    NotFound,
    /// Subsystem not supported on this board
    #[error("unsupported")]
    Unsupported,
    /// Bring-up step failed
    #[error("initialization failed")]
    InitFailed,
}

impl From<PlatformError> for Status {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::NotFound => Status::NotFound,
            PlatformError::Unsupported => Status::InvalidArgument,
            PlatformError::InitFailed => Status::ExecutionFault,
        }
    }
}

/// Returned by a session that ended without a boot request
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session ended without handoff: {cause}")]
pub struct NoHandoffRequested {
    /// The transport error that ended the session
    pub cause: TransportError,
}
