//! Scalar types and callback signatures shared with the engine.
//!
//! Nothing structured crosses the boundary: handles are `c_int`, strings are
//! NUL-terminated buffers, and every event is a plain function pointer plus the
//! opaque user pointer installed with `set_user_pointer`.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::ptr::NonNull;

/// An engine-issued handle. Zero and negative raw values mean "no handle".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(c_int);

impl Handle {
    /// Wrap a raw value returned by the engine, rejecting the "no handle" values.
    #[inline]
    pub fn from_raw(raw: c_int) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    /// The raw value to pass back across the ABI.
    #[inline]
    pub fn as_raw(self) -> c_int {
        self.0
    }

    /// Encode this handle as the opaque user pointer given to the engine.
    ///
    /// The pointer is never dereferenced; trampolines turn it back into a handle
    /// and look the owner up in a registry.
    #[inline]
    pub fn as_user_pointer(self) -> *mut c_void {
        self.0 as usize as *mut c_void
    }

    /// Recover a handle from a user pointer produced by [`Handle::as_user_pointer`].
    #[inline]
    pub fn from_user_pointer(ptr: *mut c_void) -> Option<Self> {
        c_int::try_from(ptr as usize).ok().and_then(Self::from_raw)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `void (*)(void *user)`: open and buffered-amount-low events.
pub type VoidCallback = unsafe extern "C" fn(user: *mut c_void);

/// `void (*)(const char *error, void *user)`; `error` may be null.
pub type ErrorCallback = unsafe extern "C" fn(error: *const c_char, user: *mut c_void);

/// `void (*)(const char *data, int size, void *user)`; see [`crate::codec::decode`].
pub type MessageCallback =
    unsafe extern "C" fn(data: *const c_char, size: c_int, user: *mut c_void);

/// `void (*)(int dc, void *user)`: a remote peer opened a data channel.
pub type DataChannelCallback = unsafe extern "C" fn(dc: c_int, user: *mut c_void);

/// `void (*)(const char *sdp, const char *type, void *user)`.
pub type DescriptionCallback =
    unsafe extern "C" fn(sdp: *const c_char, kind: *const c_char, user: *mut c_void);

/// `void (*)(const char *candidate, const char *mid, void *user)`.
pub type CandidateCallback =
    unsafe extern "C" fn(candidate: *const c_char, mid: *const c_char, user: *mut c_void);

/// `void (*)(int state, void *user)`: connection, gathering and signaling states.
pub type StateCallback = unsafe extern "C" fn(state: c_int, user: *mut c_void);

/// Raw value used for an unset reliability limit.
pub const RELIABILITY_UNSET: c_int = -1;

/// Reliability parameters as passed to `create_data_channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReliabilityFlags {
    /// Non-zero when out-of-order delivery is allowed.
    pub unordered: c_int,
    /// Lifetime limit in milliseconds, or [`RELIABILITY_UNSET`].
    pub max_packet_life_time: c_int,
    /// Retransmission limit, or [`RELIABILITY_UNSET`].
    pub max_retransmits: c_int,
}

impl ReliabilityFlags {
    /// Fully reliable, ordered delivery.
    pub const RELIABLE: Self = Self {
        unordered: 0,
        max_packet_life_time: RELIABILITY_UNSET,
        max_retransmits: RELIABILITY_UNSET,
    };

    /// Whether out-of-order delivery is allowed.
    #[inline]
    pub fn is_unordered(&self) -> bool {
        self.unordered != 0
    }

    /// Whether either partial-reliability limit is set.
    #[inline]
    pub fn is_partially_reliable(&self) -> bool {
        self.max_packet_life_time >= 0 || self.max_retransmits >= 0
    }
}

impl Default for ReliabilityFlags {
    fn default() -> Self {
        Self::RELIABLE
    }
}

/// Deallocator for strings handed to the caller by the engine.
pub type StringRelease = unsafe fn(*mut c_char);

/// A caller-owned, NUL-terminated string returned by an engine query.
///
/// The string is released exactly once, when the value is dropped, on every
/// exit path of the code holding it.
pub struct EngineString {
    ptr: NonNull<c_char>,
    release: StringRelease,
}

impl EngineString {
    /// Take ownership of a string allocated by the engine.
    ///
    /// Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a NUL-terminated buffer that stays valid
    /// until `release` is called on it, and `release` must be the matching
    /// deallocator.
    pub unsafe fn from_raw(ptr: *mut c_char, release: StringRelease) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, release })
    }

    /// Allocate an engine string from Rust, released through [`CString`].
    ///
    /// Used by engines implemented in Rust. Returns `None` if `value` contains
    /// a NUL byte.
    pub fn from_string(value: &str) -> Option<Self> {
        let raw = CString::new(value).ok()?.into_raw();
        // SAFETY: `raw` comes from `CString::into_raw` and is released by
        // `release_cstring`, which reconstructs the same `CString`.
        unsafe { Self::from_raw(raw, release_cstring) }
    }

    /// Borrow the string contents.
    pub fn as_c_str(&self) -> &CStr {
        // SAFETY: `from_raw` requires a valid NUL-terminated buffer that lives
        // until `release` runs in `drop`.
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }

    /// Copy the contents into an owned `String`, replacing invalid UTF-8.
    pub fn to_string_lossy(&self) -> String {
        self.as_c_str().to_string_lossy().into_owned()
    }
}

impl Drop for EngineString {
    fn drop(&mut self) {
        // SAFETY: the pointer was obtained together with its deallocator and
        // is released only here.
        unsafe { (self.release)(self.ptr.as_ptr()) }
    }
}

impl fmt::Debug for EngineString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EngineString").field(&self.as_c_str()).finish()
    }
}

unsafe fn release_cstring(ptr: *mut c_char) {
    drop(CString::from_raw(ptr));
}

/// Read a NUL-terminated callback argument into an owned string.
///
/// Null pointers yield `None`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated buffer valid for the
/// duration of the call.
pub unsafe fn string_arg(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}
