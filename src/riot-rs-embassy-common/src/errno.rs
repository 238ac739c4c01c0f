//! Negative errno codes reported by drivers at the C-compatible API boundary.
//!
//! The numbering is the one of newlib, which is the C library used on the supported MCUs.

/// I/O error.
pub const EIO: i32 = 5;
/// No such device or address; the target did not acknowledge.
pub const ENXIO: i32 = 6;
/// Resource temporarily unavailable; bus arbitration was lost.
pub const EAGAIN: i32 = 11;
/// Invalid argument.
pub const EINVAL: i32 = 22;
/// Operation not supported.
pub const EOPNOTSUPP: i32 = 95;
/// Operation timed out.
pub const ETIMEDOUT: i32 = 116;
/// Value too large for the buffer or parameter.
pub const EOVERFLOW: i32 = 139;
