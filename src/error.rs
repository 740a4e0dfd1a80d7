// Non-local error channel.
//
// Anything that can fail mid-construction propagates an Unwind with `?`
// until it reaches the evaluator boundary, which hands the carried error
// value back to the host. Cells registered before the failure are simply
// unreachable afterwards and get reclaimed by the next collection.

use crate::heap::ValRef;

// The result of any fallible interpreter operation.
pub type Result<T> = core::result::Result<T, Unwind>;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Unwind {
    // An error value allocated on the heap.
    Error(ValRef),

    // A raw allocation failed. Reported without allocating, since
    // allocating an error message at that point could fail too.
    OutOfMemory,
}

// The one error message that must never require an allocation.
pub const OUT_OF_MEMORY: &str = "out of memory";

// Copy a byte string into owned storage, reporting allocation failure
// through the unwind channel instead of aborting.
pub fn copy_str(src: &str) -> Result<String> {
    let mut out = String::new();
    out.try_reserve(src.len()).map_err(|_| Unwind::OutOfMemory)?;
    out.push_str(src);
    Ok(out)
}
