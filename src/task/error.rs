use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    ThreadLimitReached,
    StackAllocationFailed,
    AddressSpaceCreationFailed,
    NoSuchProcess,
    NoSuchThread,
}

impl TaskError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThreadLimitReached => "Thread limit reached for process",
            Self::StackAllocationFailed => "Failed to allocate kernel stack",
            Self::AddressSpaceCreationFailed => "Failed to create address space",
            Self::NoSuchProcess => "No such process",
            Self::NoSuchThread => "No such thread",
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type TaskResult<T> = Result<T, TaskError>;
