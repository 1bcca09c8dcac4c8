//! Kernel error type.
//!
//! Every kernel primitive returns `Result<T, KernelError>`. At an ABI
//! boundary (call-gate return, a C-style primitive signature) the error is
//! flattened to a small signed negative integer via [`KernelError::code`] —
//! the `ERR_*` constants from spec §6.

/// Kernel-wide result alias.
pub type Result<T> = core::result::Result<T, KernelError>;

/// The closed, signed, negative-only error set a kernel primitive may
/// return. Never thrown, never longjmp'd — always returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KernelError {
    NullParameter = 1,
    NoSuchEntry = 2,
    NoSuchFunction = 3,
    ArgumentCount = 4,
    Permission = 5,
    Memory = 6,
    Io = 7,
    Invalid = 8,
    Range = 9,
    NotImplemented = 10,
    NoSuchProcess = 11,
    NoFree = 12,
    Busy = 13,
    Timeout = 14,
    BadAddress = 15,
    BadData = 16,
    Bug = 17,
    Align = 18,
    NotInitialized = 19,
    NoData = 20,
    NoRouteToHost = 21,
    NoLock = 22,
}

impl KernelError {
    /// The value a call-gate or kernel primitive hands back to its caller:
    /// the negative of the discriminant, matching spec §6's `ERR_*` set.
    pub const fn code(self) -> i32 {
        -(self as i32)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::NullParameter => "ERR_NULLPARAMETER",
            Self::NoSuchEntry => "ERR_NOSUCHENTRY",
            Self::NoSuchFunction => "ERR_NOSUCHFUNCTION",
            Self::ArgumentCount => "ERR_ARGUMENTCOUNT",
            Self::Permission => "ERR_PERMISSION",
            Self::Memory => "ERR_MEMORY",
            Self::Io => "ERR_IO",
            Self::Invalid => "ERR_INVALID",
            Self::Range => "ERR_RANGE",
            Self::NotImplemented => "ERR_NOTIMPLEMENTED",
            Self::NoSuchProcess => "ERR_NOSUCHPROCESS",
            Self::NoFree => "ERR_NOFREE",
            Self::Busy => "ERR_BUSY",
            Self::Timeout => "ERR_TIMEOUT",
            Self::BadAddress => "ERR_BADADDRESS",
            Self::BadData => "ERR_BADDATA",
            Self::Bug => "ERR_BUG",
            Self::Align => "ERR_ALIGN",
            Self::NotInitialized => "ERR_NOTINITIALIZED",
            Self::NoData => "ERR_NODATA",
            Self::NoRouteToHost => "ERR_NOROUTETOHOST",
            Self::NoLock => "ERR_NOLOCK",
        }
    }
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let all = [
            KernelError::NullParameter,
            KernelError::NoSuchEntry,
            KernelError::NoSuchFunction,
            KernelError::ArgumentCount,
            KernelError::Permission,
            KernelError::Memory,
            KernelError::Io,
            KernelError::Invalid,
            KernelError::Range,
            KernelError::NotImplemented,
            KernelError::NoSuchProcess,
            KernelError::NoFree,
            KernelError::Busy,
            KernelError::Timeout,
            KernelError::BadAddress,
            KernelError::BadData,
            KernelError::Bug,
            KernelError::Align,
            KernelError::NotInitialized,
            KernelError::NoData,
            KernelError::NoRouteToHost,
            KernelError::NoLock,
        ];
        for e in all {
            assert!(e.code() < 0);
        }
        let mut codes: alloc::vec::Vec<i32> = all.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
