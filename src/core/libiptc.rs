//! Native engine over libip4tc / libip6tc
//!
//! Only compiled with the `libiptc` feature; linking needs the iptables
//! development libraries. Both families share one binding template, the C
//! libraries only differ in their `iptc_` / `ip6tc_` prefix and entry type.
//!
//! libiptc reports failures through errno and explains them with
//! `*_strerror`, which knows which call failed last on the thread.

use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr::NonNull;
use tracing::warn;

use crate::core::engine::{Engine, Policy};
use crate::core::error::EngineError;
use crate::core::raw::{Ip6tEntry, IptEntry, XtCounters};

/// Opaque `struct xtc_handle`.
#[repr(C)]
pub struct XtcHandle {
    _private: [u8; 0],
}

/// An open libiptc table handle.
pub struct NativeHandle(NonNull<XtcHandle>);

// SAFETY: libiptc handles carry no thread affinity. A handle is only ever
// used through `&mut` or `&` of its owning session, which is not `Sync`.
unsafe impl Send for NativeHandle {}

fn c_string(s: &str) -> Option<CString> {
    CString::new(s).ok()
}

/// Copies a NUL-terminated string owned by libiptc.
///
/// # Safety
///
/// `ptr` must be null or point to a valid C string.
unsafe fn owned(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null and NUL-terminated per the caller's contract.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// Chain name as returned by a chain cursor call.
enum ChainName {
    End,
    Valid(String),
    /// Not UTF-8. Carries the lossy form for logging only: it would not
    /// round-trip to the engine.
    Invalid(String),
}

/// Reads a chain name without replacing bytes.
///
/// # Safety
///
/// `ptr` must be null or point to a valid C string.
unsafe fn chain_name(ptr: *const c_char) -> ChainName {
    if ptr.is_null() {
        return ChainName::End;
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    let name = unsafe { CStr::from_ptr(ptr) };
    match name.to_str() {
        Ok(name) => ChainName::Valid(name.to_string()),
        Err(_) => ChainName::Invalid(name.to_string_lossy().into_owned()),
    }
}

/// Follows a chain cursor past names that are not UTF-8.
///
/// Such names could not be passed back to the engine, so listing them would
/// make `rules` silently empty and zeroing fail.
fn next_valid_chain(
    mut name: ChainName,
    mut advance: impl FnMut() -> ChainName,
) -> Option<String> {
    loop {
        match name {
            ChainName::End => return None,
            ChainName::Valid(name) => return Some(name),
            ChainName::Invalid(lossy) => {
                warn!(chain = %lossy, "skipping chain with a non-UTF-8 name");
                name = advance();
            }
        }
    }
}

macro_rules! native_engine {
    (
        $(#[$meta:meta])*
        $engine:ident, $entry:ty, link = $lib:literal,
        init = $init:ident, free = $free:ident,
        first_chain = $first_chain:ident, next_chain = $next_chain:ident,
        builtin = $builtin:ident, get_policy = $get_policy:ident,
        first_rule = $first_rule:ident, next_rule = $next_rule:ident,
        get_target = $get_target:ident, zero_entries = $zero_entries:ident,
        commit = $commit:ident, strerror = $strerror:ident $(,)?
    ) => {
        #[link(name = $lib)]
        unsafe extern "C" {
            fn $init(tablename: *const c_char) -> *mut XtcHandle;
            fn $free(h: *mut XtcHandle);
            fn $first_chain(h: *mut XtcHandle) -> *const c_char;
            fn $next_chain(h: *mut XtcHandle) -> *const c_char;
            fn $builtin(chain: *const c_char, h: *mut XtcHandle) -> c_int;
            fn $get_policy(
                chain: *const c_char,
                counters: *mut XtCounters,
                h: *mut XtcHandle,
            ) -> *const c_char;
            fn $first_rule(chain: *const c_char, h: *mut XtcHandle) -> *const $entry;
            fn $next_rule(prev: *const $entry, h: *mut XtcHandle) -> *const $entry;
            fn $get_target(e: *const $entry, h: *mut XtcHandle) -> *const c_char;
            fn $zero_entries(chain: *const c_char, h: *mut XtcHandle) -> c_int;
            fn $commit(h: *mut XtcHandle) -> c_int;
            fn $strerror(err: c_int) -> *const c_char;
        }

        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $engine;

        impl $engine {
            fn last_error() -> EngineError {
                let errno = nix::errno::Errno::last();
                let code = errno as c_int;
                // SAFETY: strerror returns a static string or null.
                let message = unsafe { owned($strerror(code)) };
                EngineError::new(code, message.unwrap_or_else(|| errno.desc().to_string()))
            }

            fn no_such_name() -> EngineError {
                EngineError::from(nix::errno::Errno::ENOENT)
            }
        }

        impl Engine for $engine {
            type Record = $entry;
            type Handle = NativeHandle;
            type Cursor = NonNull<$entry>;

            fn open(&self, table: &str) -> Result<NativeHandle, EngineError> {
                let name = c_string(table).ok_or_else(Self::no_such_name)?;
                // SAFETY: `name` is a valid C string for the duration of the call.
                let handle = unsafe { $init(name.as_ptr()) };
                NonNull::new(handle).map(NativeHandle).ok_or_else(Self::last_error)
            }

            fn first_chain(&self, handle: &mut NativeHandle) -> Option<String> {
                let h = handle.0.as_ptr();
                // SAFETY: the handle is open; returned names live in the handle.
                let first = unsafe { chain_name($first_chain(h)) };
                // SAFETY: as above.
                next_valid_chain(first, || unsafe { chain_name($next_chain(h)) })
            }

            fn next_chain(&self, handle: &mut NativeHandle) -> Option<String> {
                let h = handle.0.as_ptr();
                // SAFETY: as for first_chain.
                let next = unsafe { chain_name($next_chain(h)) };
                // SAFETY: as for first_chain.
                next_valid_chain(next, || unsafe { chain_name($next_chain(h)) })
            }

            fn is_builtin(&self, handle: &NativeHandle, chain: &str) -> bool {
                let Some(name) = c_string(chain) else {
                    return false;
                };
                // SAFETY: valid C string and open handle; the call does not mutate it.
                unsafe { $builtin(name.as_ptr(), handle.0.as_ptr()) != 0 }
            }

            fn policy(
                &self,
                handle: &mut NativeHandle,
                chain: &str,
            ) -> Result<Policy, EngineError> {
                let name = c_string(chain).ok_or_else(Self::no_such_name)?;
                let mut counters = XtCounters::default();
                // SAFETY: valid C string, writable counters, open handle.
                let verdict =
                    unsafe { owned($get_policy(name.as_ptr(), &mut counters, handle.0.as_ptr())) };
                match verdict {
                    Some(verdict) => Ok(Policy {
                        verdict,
                        counter: counters.into(),
                    }),
                    None => Err(Self::last_error()),
                }
            }

            fn first_rule(&self, handle: &mut NativeHandle, chain: &str) -> Option<Self::Cursor> {
                let name = c_string(chain)?;
                // SAFETY: valid C string and open handle.
                NonNull::new(unsafe { $first_rule(name.as_ptr(), handle.0.as_ptr()) }.cast_mut())
            }

            fn next_rule(
                &self,
                handle: &mut NativeHandle,
                prev: Self::Cursor,
            ) -> Option<Self::Cursor> {
                // SAFETY: `prev` came from this handle and the handle is still open.
                NonNull::new(unsafe { $next_rule(prev.as_ptr(), handle.0.as_ptr()) }.cast_mut())
            }

            fn record<'h>(&self, _handle: &'h NativeHandle, cursor: Self::Cursor) -> &'h $entry {
                // SAFETY: entries live in the handle's cache, which libiptc keeps
                // until the handle is freed, and have the kernel's layout.
                unsafe { cursor.as_ref() }
            }

            fn target_name(&self, handle: &NativeHandle, cursor: Self::Cursor) -> Option<String> {
                // SAFETY: `cursor` came from this open handle.
                unsafe { owned($get_target(cursor.as_ptr(), handle.0.as_ptr())) }
            }

            fn zero_entries(
                &self,
                handle: &mut NativeHandle,
                chain: &str,
            ) -> Result<(), EngineError> {
                let name = c_string(chain).ok_or_else(Self::no_such_name)?;
                // SAFETY: valid C string and open handle.
                match unsafe { $zero_entries(name.as_ptr(), handle.0.as_ptr()) } {
                    1 => Ok(()),
                    _ => Err(Self::last_error()),
                }
            }

            fn commit(&self, handle: &mut NativeHandle) -> Result<(), EngineError> {
                // SAFETY: open handle.
                match unsafe { $commit(handle.0.as_ptr()) } {
                    1 => Ok(()),
                    _ => Err(Self::last_error()),
                }
            }

            fn release(&self, handle: NativeHandle) {
                // SAFETY: the handle is consumed here, so it is freed exactly once.
                unsafe { $free(handle.0.as_ptr()) }
            }
        }
    };
}

native_engine! {
    /// IPv4 tables through libip4tc.
    Ip4tc, IptEntry, link = "ip4tc",
    init = iptc_init, free = iptc_free,
    first_chain = iptc_first_chain, next_chain = iptc_next_chain,
    builtin = iptc_builtin, get_policy = iptc_get_policy,
    first_rule = iptc_first_rule, next_rule = iptc_next_rule,
    get_target = iptc_get_target, zero_entries = iptc_zero_entries,
    commit = iptc_commit, strerror = iptc_strerror,
}

native_engine! {
    /// IPv6 tables through libip6tc.
    Ip6tc, Ip6tEntry, link = "ip6tc",
    init = ip6tc_init, free = ip6tc_free,
    first_chain = ip6tc_first_chain, next_chain = ip6tc_next_chain,
    builtin = ip6tc_builtin, get_policy = ip6tc_get_policy,
    first_rule = ip6tc_first_rule, next_rule = ip6tc_next_rule,
    get_target = ip6tc_get_target, zero_entries = ip6tc_zero_entries,
    commit = ip6tc_commit, strerror = ip6tc_strerror,
}
