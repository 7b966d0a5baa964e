//! Maps each [`PerfEvent`] the profiler can open to its
//! `perf_event_attr.{type, config}` pair, per `linux/perf_event.h`.

use crate::model::PerfEvent;
use crate::perf::sys::PerfType;

const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
const PERF_COUNT_HW_CACHE_REFERENCES: u64 = 2;
const PERF_COUNT_HW_CACHE_MISSES: u64 = 3;
const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;
const PERF_COUNT_HW_BRANCH_MISSES: u64 = 5;
const PERF_COUNT_HW_REF_CPU_CYCLES: u64 = 9;

const PERF_COUNT_SW_PAGE_FAULTS: u64 = 2;
const PERF_COUNT_SW_CONTEXT_SWITCHES: u64 = 3;
const PERF_COUNT_SW_CPU_MIGRATIONS: u64 = 4;
const PERF_COUNT_SW_ALIGNMENT_FAULTS: u64 = 7;

const CACHE_L1D: u64 = 0;
const CACHE_L1I: u64 = 1;
const CACHE_LL: u64 = 2;
const CACHE_DTLB: u64 = 3;
const CACHE_ITLB: u64 = 4;
const CACHE_BPU: u64 = 5;

const CACHE_OP_READ: u64 = 0;
const CACHE_OP_WRITE: u64 = 1;

const CACHE_RESULT_ACCESS: u64 = 0;
const CACHE_RESULT_MISS: u64 = 1;

const fn cache_config(cache: u64, op: u64, result: u64) -> u64 { cache | (op << 8) | (result << 16) }

/// Resolves the `(type, config)` pair `perf_event_open` needs for a
/// given logical event.
#[must_use]
pub fn attr_args(event: PerfEvent) -> (PerfType, u64) {
    use PerfEvent::{
        AlignmentFaults, BranchInstructions, BranchMisses, BranchReadAccess, BranchReadMiss, CacheMisses,
        CacheReferences, ContextSwitches, CpuCycles, CpuMigrations, DtlbReadAccess, DtlbReadMiss, Instructions,
        ItlbReadAccess, ItlbReadMiss, L1dReadAccess, L1dReadMiss, L1dWriteAccess, L1dWriteMiss, L1iReadAccess,
        L1iReadMiss, LlReadAccess, LlReadMiss, LlWriteAccess, LlWriteMiss, PageFaults, RefCpuCycles,
    };

    match event {
        CpuCycles => (PerfType::Hardware, PERF_COUNT_HW_CPU_CYCLES),
        Instructions => (PerfType::Hardware, PERF_COUNT_HW_INSTRUCTIONS),
        BranchInstructions => (PerfType::Hardware, PERF_COUNT_HW_BRANCH_INSTRUCTIONS),
        BranchMisses => (PerfType::Hardware, PERF_COUNT_HW_BRANCH_MISSES),
        CacheReferences => (PerfType::Hardware, PERF_COUNT_HW_CACHE_REFERENCES),
        CacheMisses => (PerfType::Hardware, PERF_COUNT_HW_CACHE_MISSES),
        RefCpuCycles => (PerfType::Hardware, PERF_COUNT_HW_REF_CPU_CYCLES),

        ContextSwitches => (PerfType::Software, PERF_COUNT_SW_CONTEXT_SWITCHES),
        PageFaults => (PerfType::Software, PERF_COUNT_SW_PAGE_FAULTS),
        CpuMigrations => (PerfType::Software, PERF_COUNT_SW_CPU_MIGRATIONS),
        AlignmentFaults => (PerfType::Software, PERF_COUNT_SW_ALIGNMENT_FAULTS),

        L1dReadAccess => (PerfType::HwCache, cache_config(CACHE_L1D, CACHE_OP_READ, CACHE_RESULT_ACCESS)),
        L1dReadMiss => (PerfType::HwCache, cache_config(CACHE_L1D, CACHE_OP_READ, CACHE_RESULT_MISS)),
        L1dWriteAccess => (PerfType::HwCache, cache_config(CACHE_L1D, CACHE_OP_WRITE, CACHE_RESULT_ACCESS)),
        L1dWriteMiss => (PerfType::HwCache, cache_config(CACHE_L1D, CACHE_OP_WRITE, CACHE_RESULT_MISS)),
        L1iReadAccess => (PerfType::HwCache, cache_config(CACHE_L1I, CACHE_OP_READ, CACHE_RESULT_ACCESS)),
        L1iReadMiss => (PerfType::HwCache, cache_config(CACHE_L1I, CACHE_OP_READ, CACHE_RESULT_MISS)),
        LlReadAccess => (PerfType::HwCache, cache_config(CACHE_LL, CACHE_OP_READ, CACHE_RESULT_ACCESS)),
        LlReadMiss => (PerfType::HwCache, cache_config(CACHE_LL, CACHE_OP_READ, CACHE_RESULT_MISS)),
        LlWriteAccess => (PerfType::HwCache, cache_config(CACHE_LL, CACHE_OP_WRITE, CACHE_RESULT_ACCESS)),
        LlWriteMiss => (PerfType::HwCache, cache_config(CACHE_LL, CACHE_OP_WRITE, CACHE_RESULT_MISS)),
        DtlbReadAccess => (PerfType::HwCache, cache_config(CACHE_DTLB, CACHE_OP_READ, CACHE_RESULT_ACCESS)),
        DtlbReadMiss => (PerfType::HwCache, cache_config(CACHE_DTLB, CACHE_OP_READ, CACHE_RESULT_MISS)),
        ItlbReadAccess => (PerfType::HwCache, cache_config(CACHE_ITLB, CACHE_OP_READ, CACHE_RESULT_ACCESS)),
        ItlbReadMiss => (PerfType::HwCache, cache_config(CACHE_ITLB, CACHE_OP_READ, CACHE_RESULT_MISS)),
        BranchReadAccess => (PerfType::HwCache, cache_config(CACHE_BPU, CACHE_OP_READ, CACHE_RESULT_ACCESS)),
        BranchReadMiss => (PerfType::HwCache, cache_config(CACHE_BPU, CACHE_OP_READ, CACHE_RESULT_MISS)),
    }
}

/// The three event families, used to group fd-open failures: a
/// permission error on one event disables the rest of its family only.
#[must_use]
pub fn family_of(event: PerfEvent) -> &'static str {
    match attr_args(event).0 {
        PerfType::Hardware => "hardware",
        PerfType::Software => "software",
        PerfType::HwCache => "cache",
    }
}

pub const HARDWARE_EVENTS: &[PerfEvent] = &[
    PerfEvent::CpuCycles,
    PerfEvent::Instructions,
    PerfEvent::BranchInstructions,
    PerfEvent::BranchMisses,
    PerfEvent::CacheReferences,
    PerfEvent::CacheMisses,
    PerfEvent::RefCpuCycles,
];

pub const SOFTWARE_EVENTS: &[PerfEvent] = &[
    PerfEvent::ContextSwitches,
    PerfEvent::PageFaults,
    PerfEvent::CpuMigrations,
    PerfEvent::AlignmentFaults,
];

pub const CACHE_EVENTS: &[PerfEvent] = &[
    PerfEvent::L1dReadAccess,
    PerfEvent::L1dReadMiss,
    PerfEvent::L1dWriteAccess,
    PerfEvent::L1dWriteMiss,
    PerfEvent::L1iReadAccess,
    PerfEvent::L1iReadMiss,
    PerfEvent::LlReadAccess,
    PerfEvent::LlReadMiss,
    PerfEvent::LlWriteAccess,
    PerfEvent::LlWriteMiss,
    PerfEvent::DtlbReadAccess,
    PerfEvent::DtlbReadMiss,
    PerfEvent::ItlbReadAccess,
    PerfEvent::ItlbReadMiss,
    PerfEvent::BranchReadAccess,
    PerfEvent::BranchReadMiss,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_packs_three_ids() {
        assert_eq!(cache_config(CACHE_L1D, CACHE_OP_WRITE, CACHE_RESULT_MISS), 0x1_0100);
    }

    #[test]
    fn every_event_resolves_to_a_family() {
        for event in HARDWARE_EVENTS.iter().chain(SOFTWARE_EVENTS).chain(CACHE_EVENTS) {
            let family = family_of(*event);
            assert!(["hardware", "software", "cache"].contains(&family));
        }
    }
}
