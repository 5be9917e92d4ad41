//! Thin wrappers over the libc interface-name lookups.

use std::{
    ffi::{CStr, CString},
    num::NonZeroU32,
};

/// Returns the kernel link index of the named interface, if it exists.
pub fn if_nametoindex(name: &str) -> Option<NonZeroU32> {
    let name = CString::new(name).ok()?;
    let index = unsafe { nix::libc::if_nametoindex(name.as_ptr()) };
    NonZeroU32::new(index)
}

/// Returns the name of the interface with the given kernel link index, if it
/// exists.
pub fn if_indextoname(index: u32) -> Option<String> {
    let mut buf = [0 as nix::libc::c_char; nix::libc::IF_NAMESIZE];
    let name = unsafe { nix::libc::if_indextoname(index, buf.as_mut_ptr()) };
    if name.is_null() {
        return None;
    }

    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}
