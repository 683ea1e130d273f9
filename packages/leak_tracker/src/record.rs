use std::ptr;

/// The most stack frames kept per allocation.
pub const MAX_BACKTRACE_DEPTH: usize = 10;

/// Raw instruction pointers of the stack at the time of an allocation, innermost first.
///
/// Capturing only walks the stack. Turning the addresses into symbol names happens when a
/// report is generated, see [`LeakReport`][crate::LeakReport].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frames {
    addresses: [usize; MAX_BACKTRACE_DEPTH],
    depth: usize,
}

impl Frames {
    pub(crate) const fn empty() -> Self {
        Self {
            addresses: [0; MAX_BACKTRACE_DEPTH],
            depth: 0,
        }
    }

    /// Walks the current stack, ignoring the innermost `skip` frames and keeping at most
    /// `max_depth` of the rest.
    pub(crate) fn capture(mut skip: usize, max_depth: usize) -> Self {
        let mut frames = Self::empty();
        let limit = max_depth.min(MAX_BACKTRACE_DEPTH);

        if limit == 0 {
            return frames;
        }

        backtrace::trace(|frame| {
            if let Some(remaining) = skip.checked_sub(1) {
                skip = remaining;
                return true;
            }

            let Some(slot) = frames.addresses.get_mut(frames.depth) else {
                return false;
            };

            *slot = frame.ip().addr();

            // Cannot overflow, bounded by the array length.
            frames.depth = frames.depth.wrapping_add(1);
            frames.depth < limit
        });

        frames
    }

    /// The captured instruction pointers, innermost first.
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        self.addresses.get(..self.depth).unwrap_or(&[])
    }

    /// Number of captured frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.depth
    }

    /// Whether no frames were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }
}

/// Turns an instruction pointer into `symbol [address]`, or just `[address]` if no symbol
/// covers it.
pub(crate) fn symbolize(address: usize) -> String {
    let mut name = None;

    backtrace::resolve(ptr::without_provenance_mut(address), |symbol| {
        if name.is_none() {
            name = symbol.name().map(|name| name.to_string());
        }
    });

    name.map_or_else(
        || format!("[{address:#x}]"),
        |name| format!("{name} [{address:#x}]"),
    )
}

/// What the tracker knows about one live allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct AllocationRecord {
    /// Address of the allocated memory.
    pub address: usize,

    /// Instruction pointer of the innermost recorded frame, or zero if no frames were captured.
    pub call_address: usize,

    /// Size of the allocation in bytes.
    pub size: usize,

    /// The stack at the time of the allocation.
    pub frames: Frames,
}

impl AllocationRecord {
    pub(crate) fn new(address: usize, size: usize, frames: Frames) -> Self {
        Self {
            address,
            call_address: frames.as_slice().first().copied().unwrap_or_default(),
            size,
            frames,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AllocationRecord: Send, Sync, Copy, Debug);
    assert_impl_all!(Frames: Send, Sync, Copy, Debug);

    #[test]
    fn empty_frames() {
        let frames = Frames::empty();

        assert!(frames.is_empty());
        assert_eq!(frames.len(), 0);
        assert!(frames.as_slice().is_empty());
    }

    #[test]
    fn zero_depth_captures_nothing() {
        assert!(Frames::capture(0, 0).is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot walk the native stack.
    fn capture_respects_depth_limits() {
        let frames = Frames::capture(0, 3);
        assert!(!frames.is_empty());
        assert!(frames.len() <= 3);

        let frames = Frames::capture(0, 1000);
        assert!(frames.len() <= MAX_BACKTRACE_DEPTH);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot walk the native stack.
    fn skipping_past_the_whole_stack_captures_nothing() {
        assert!(Frames::capture(100_000, MAX_BACKTRACE_DEPTH).is_empty());
    }

    #[test]
    fn record_takes_call_address_from_innermost_frame() {
        let mut frames = Frames::empty();
        frames.addresses[0] = 0x1234;
        frames.addresses[1] = 0x5678;
        frames.depth = 2;

        let record = AllocationRecord::new(0x1000, 64, frames);

        assert_eq!(record.call_address, 0x1234);
        assert_eq!(record.frames.as_slice(), &[0x1234, 0x5678]);
    }

    #[test]
    fn record_without_frames_has_no_call_address() {
        let record = AllocationRecord::new(0x1000, 64, Frames::empty());

        assert_eq!(record.call_address, 0);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot resolve native symbols.
    fn symbolize_always_includes_address() {
        assert!(symbolize(0x10).ends_with("[0x10]"));
    }
}
