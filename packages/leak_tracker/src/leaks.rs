use std::fmt;

use crate::record::symbolize;
use crate::{AllocationRecord, MemStats};

/// An allocation that was still live when a [`LeakReport`] was generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Leak {
    address: usize,
    size: usize,
    call_address: usize,
    frames: Vec<String>,
}

impl Leak {
    fn symbolized(record: &AllocationRecord) -> Self {
        Self {
            address: record.address,
            size: record.size,
            call_address: record.call_address,
            frames: record
                .frames
                .as_slice()
                .iter()
                .map(|&address| symbolize(address))
                .collect(),
        }
    }

    /// Address of the allocated memory.
    #[must_use]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Size of the allocation in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Instruction pointer of the innermost recorded frame, or zero if no frames were captured.
    #[must_use]
    pub fn call_address(&self) -> usize {
        self.call_address
    }

    /// The stack at the time of the allocation, innermost first, one `symbol [address]` line
    /// per frame.
    #[must_use]
    pub fn frames(&self) -> &[String] {
        &self.frames
    }
}

/// The allocation counters of a recorder plus every allocation that was live when the report
/// was generated.
///
/// The [`Display`][fmt::Display] implementation renders the counters followed by one block per
/// leak:
///
/// ```text
/// Total Allocations:3
/// Unfreed Allocations:1
/// Total Memory Reserved: 96
/// Total Unfreed Memory: 32
/// Untracked Frees: 0
///
///
/// Memory Leaks Found: SUMMARY
///
/// Allocation made at 94558816243418 for 32 bytes
/// Unallocation ptr to heap address: 0x55f4a1c02b10
/// [FRAME 0] leak_tracker::record::Frames::capture [0x5601d7a3c2da]
/// [FRAME 1] ...
/// ```
#[derive(Clone, Debug)]
pub struct LeakReport {
    stats: MemStats,
    leaks: Vec<Leak>,
}

impl LeakReport {
    pub(crate) fn new(stats: MemStats, records: &[AllocationRecord]) -> Self {
        Self {
            stats,
            leaks: records.iter().map(Leak::symbolized).collect(),
        }
    }

    /// The allocation counters at the time of the report.
    #[must_use]
    pub fn stats(&self) -> MemStats {
        self.stats
    }

    /// The allocations that were live at the time of the report.
    #[must_use]
    pub fn leaks(&self) -> &[Leak] {
        &self.leaks
    }

    /// Whether nothing was live and no untracked frees were seen.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty() && self.stats.untracked_frees == 0
    }

    /// Prints the report to stdout.
    #[cfg_attr(test, mutants::skip)] // Too difficult to test stdout output reliably - manually tested.
    pub fn print_to_stdout(&self) {
        println!("{self}");
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total Allocations:{}", self.stats.allocations)?;
        writeln!(f, "Unfreed Allocations:{}", self.stats.active_allocations)?;
        writeln!(f, "Total Memory Reserved: {}", self.stats.reserved_bytes)?;
        writeln!(f, "Total Unfreed Memory: {}", self.stats.active_reserved_bytes)?;
        writeln!(f, "Untracked Frees: {}", self.stats.untracked_frees)?;

        write!(f, "\n\nMemory Leaks Found: SUMMARY\n\n")?;

        for leak in &self.leaks {
            writeln!(
                f,
                "Allocation made at {} for {} bytes",
                leak.call_address, leak.size
            )?;
            writeln!(f, "Unallocation ptr to heap address: {:#x}", leak.address)?;

            for (index, frame) in leak.frames.iter().enumerate() {
                writeln!(f, "[FRAME {index}] {frame}")?;
            }

            write!(f, "\n\n")?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::Frames;

    assert_impl_all!(LeakReport: Send, Sync, Clone, Debug);
    assert_impl_all!(Leak: Send, Sync, Clone, Debug);

    fn stats() -> MemStats {
        MemStats {
            allocations: 3,
            active_allocations: 1,
            reserved_bytes: 96,
            active_reserved_bytes: 32,
            untracked_frees: 0,
        }
    }

    #[test]
    fn renders_summary_and_leaks() {
        let report = LeakReport {
            stats: stats(),
            leaks: vec![Leak {
                address: 0x1000,
                size: 32,
                call_address: 4660,
                frames: vec!["main [0x1234]".to_string(), "start [0x5678]".to_string()],
            }],
        };

        let expected = "Total Allocations:3\n\
            Unfreed Allocations:1\n\
            Total Memory Reserved: 96\n\
            Total Unfreed Memory: 32\n\
            Untracked Frees: 0\n\
            \n\nMemory Leaks Found: SUMMARY\n\n\
            Allocation made at 4660 for 32 bytes\n\
            Unallocation ptr to heap address: 0x1000\n\
            [FRAME 0] main [0x1234]\n\
            [FRAME 1] start [0x5678]\n\
            \n\n";

        assert_eq!(report.to_string(), expected);
        assert!(!report.is_clean());
    }

    #[test]
    fn empty_report_renders_summary_only() {
        let report = LeakReport::new(MemStats::default(), &[]);

        assert!(report.is_clean());
        assert!(
            report
                .to_string()
                .ends_with("Memory Leaks Found: SUMMARY\n\n")
        );
    }

    #[test]
    fn untracked_frees_make_report_unclean() {
        let stats = MemStats {
            untracked_frees: 1,
            ..MemStats::default()
        };

        assert!(!LeakReport::new(stats, &[]).is_clean());
    }

    #[test]
    fn records_without_frames_need_no_symbols() {
        let record = AllocationRecord::new(0x2000, 48, Frames::empty());
        let report = LeakReport::new(stats(), &[record]);

        let leak = &report.leaks()[0];
        assert_eq!(leak.address(), 0x2000);
        assert_eq!(leak.size(), 48);
        assert_eq!(leak.call_address(), 0);
        assert!(leak.frames().is_empty());
    }
}
