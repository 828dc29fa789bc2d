//! Pass timing.
//!
//! Every allocator pass starts a timing token when it begins; dropping the token charges the
//! elapsed time to the pass. Timings accumulate per thread and are collected with
//! [`take_current`].

use core::fmt;
use std::cell::{Cell, RefCell};
use std::mem;
use std::time::{Duration, Instant};

// Each timed pass is declared with a snake_case name and a plain text description used in the
// timing report. The macro expands to a `Pass` enum with a trailing `None` variant, the number
// of passes, a table of descriptions, and one token-returning function per pass.
macro_rules! define_passes {
    ($($pass:ident: $desc:expr,)+) => {
        /// A single timed pass.
        #[allow(non_camel_case_types, reason = "pass names mirror the timing functions")]
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum Pass {
            $(#[doc=$desc] $pass,)+
            /// No active pass.
            None,
        }

        /// The number of timed passes.
        pub const NUM_PASSES: usize = Pass::None as usize;

        const DESCRIPTIONS: [&str; NUM_PASSES] = [ $($desc),+ ];

        $(
            #[doc=$desc]
            #[must_use]
            pub fn $pass() -> TimingToken {
                start_pass(Pass::$pass)
            }
        )+
    }
}

define_passes! {
    regalloc: "Register allocation",
    linearize: "Block linearization",
    liveness: "Liveness analysis",
    linear_scan: "Linear scan allocation",
    graph_color: "Graph coloring allocation",
    resolve: "SSA deconstruction",
    validate: "Interval validation",
}

impl Pass {
    /// A dense index usable to address a table of pass timings.
    pub fn idx(self) -> usize {
        self as usize
    }

    /// Description of the pass.
    pub fn description(self) -> &'static str {
        DESCRIPTIONS.get(self.idx()).copied().unwrap_or("<no pass>")
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Times the currently running pass. Timing ends when the token is dropped.
///
/// Nested passes must be dropped in LIFO order.
pub struct TimingToken {
    start: Instant,
    pass: Pass,
    prev: Pass,
}

#[derive(Default, Copy, Clone)]
struct PassTime {
    total: Duration,
    child: Duration,
}

/// Accumulated timing for all passes.
pub struct PassTimes {
    pass: [PassTime; NUM_PASSES],
}

impl PassTimes {
    /// Add `other` to the timings of this `PassTimes`.
    pub fn add(&mut self, other: &Self) {
        for (a, b) in self.pass.iter_mut().zip(&other.pass[..]) {
            a.total += b.total;
            a.child += b.child;
        }
    }

    /// Total time spent in `pass`, including nested passes.
    pub fn total_of(&self, pass: Pass) -> Duration {
        self.pass.get(pass.idx()).map_or(Duration::ZERO, |t| t.total)
    }

    /// Returns the total amount of time taken by all the passes measured.
    pub fn total(&self) -> Duration {
        self.pass.iter().map(|p| p.total - p.child).sum()
    }
}

impl Default for PassTimes {
    fn default() -> Self {
        Self {
            pass: [Default::default(); NUM_PASSES],
        }
    }
}

impl fmt::Display for PassTimes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn fmtdur(mut dur: Duration, f: &mut fmt::Formatter) -> fmt::Result {
            // Round to the nearest millisecond.
            dur += Duration::new(0, 500_000);
            write!(f, "{:4}.{:03} ", dur.as_secs(), dur.subsec_millis())
        }

        writeln!(f, "======== ========  ==================================")?;
        writeln!(f, "   Total     Self  Pass")?;
        writeln!(f, "-------- --------  ----------------------------------")?;
        for (idx, time) in self.pass.iter().enumerate() {
            if time.total == Duration::default() {
                continue;
            }
            fmtdur(time.total, f)?;
            if let Some(s) = time.total.checked_sub(time.child) {
                fmtdur(s, f)?;
            }
            writeln!(f, " {}", DESCRIPTIONS[idx])?;
        }
        writeln!(f, "======== ========  ==================================")
    }
}

thread_local! {
    static CURRENT_PASS: Cell<Pass> = const { Cell::new(Pass::None) };
    static PASS_TIME: RefCell<PassTimes> = RefCell::new(Default::default());
}

fn start_pass(pass: Pass) -> TimingToken {
    let prev = CURRENT_PASS.with(|p| p.replace(pass));
    log::debug!("timing: Starting {pass}, (during {prev})");
    TimingToken {
        start: Instant::now(),
        pass,
        prev,
    }
}

impl Drop for TimingToken {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        log::debug!("timing: Ending {}", self.pass);
        let old_cur = CURRENT_PASS.with(|p| p.replace(self.prev));
        debug_assert_eq!(self.pass, old_cur, "Timing tokens dropped out of order");
        PASS_TIME.with(|rc| {
            let mut table = rc.borrow_mut();
            table.pass[self.pass.idx()].total += duration;
            if let Some(parent) = table.pass.get_mut(self.prev.idx()) {
                parent.child += duration;
            }
        })
    }
}

/// Take the accumulated pass timings and reset the timings for the current thread.
pub fn take_current() -> PassTimes {
    PASS_TIME.with(|rc| mem::take(&mut *rc.borrow_mut()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn display() {
        assert_eq!(Pass::None.to_string(), "<no pass>");
        assert_eq!(Pass::resolve.to_string(), "SSA deconstruction");
    }

    #[test]
    fn nested_tokens_accumulate() {
        let _ = take_current();
        {
            let _outer = regalloc();
            let _inner = liveness();
        }
        let times = take_current();
        assert!(times.total_of(Pass::regalloc) >= times.total_of(Pass::liveness));
        assert!(times.to_string().starts_with("========"));
    }
}
