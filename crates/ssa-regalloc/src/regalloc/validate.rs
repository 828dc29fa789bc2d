//! Checking that no two intervals share a register or a spill slot at the same time.

use super::interval::{IntervalId, IntervalPool, LiveInterval};
use super::liverange::Position;
use super::liveness::Liveness;
use super::resolver::FrameLayout;
use crate::ir::{Function, InstKind, RegUnit, VREG_SIZE};
use crate::isa::TargetRegisters;
use crate::timing;
use crate::verifier::{VerifierErrors, VerifierResult, VerifierStepResult};
use cranelift_bitset::CompoundBitSet;
use log::debug;
use std::format;
use std::vec::Vec;

/// Check the final intervals of `func` for register and spill slot conflicts.
///
/// Every interval of the pool takes part: the siblings of values and their high halves, the
/// fixed intervals of physical registers and temps. The slots of parameters and of the method
/// context live outside the allocator's area and are not checked. A value defined in the
/// register of an input dying at the definition does not conflict with that input.
pub fn validate_intervals(
    func: &Function,
    liveness: &Liveness,
    pool: &IntervalPool,
    target: &dyn TargetRegisters,
    frame: &FrameLayout,
) -> VerifierResult<()> {
    let _tt = timing::validate();
    let mut errors = VerifierErrors::default();
    // A fatal error stops the walk after being recorded in `errors`.
    let result = Validator::new(func, liveness, pool, target, frame).run(&mut errors);
    debug_assert!(result.is_ok() || errors.has_error());
    if errors.has_error() {
        debug!("validation failed:\n{errors}");
    }
    errors.into()
}

struct Validator<'a> {
    func: &'a Function,
    liveness: &'a Liveness,
    pool: &'a IntervalPool,
    frame: &'a FrameLayout,
    /// Positions at which each core register is taken.
    core: Vec<CompoundBitSet>,
    fp: Vec<CompoundBitSet>,
    /// Positions at which each allocator slot is taken.
    slots: Vec<CompoundBitSet>,
}

impl<'a> Validator<'a> {
    fn new(
        func: &'a Function,
        liveness: &'a Liveness,
        pool: &'a IntervalPool,
        target: &dyn TargetRegisters,
        frame: &'a FrameLayout,
    ) -> Self {
        let max_end = pool
            .iter()
            .filter_map(|(_, interval)| interval.ranges().last().map(|r| r.end))
            .max()
            .unwrap_or(0) as usize;
        let sets = |count: usize| -> Vec<CompoundBitSet> {
            (0..count).map(|_| CompoundBitSet::with_capacity(max_end)).collect()
        };
        Self {
            func,
            liveness,
            pool,
            frame,
            core: sets(target.num_core_registers()),
            fp: sets(target.num_fp_registers()),
            slots: sets(frame.spill_slots() as usize),
        }
    }

    fn run(&mut self, errors: &mut VerifierErrors) -> VerifierStepResult {
        let pool = self.pool;
        for (id, interval) in pool.iter() {
            if interval.is_slow_path_safepoint() {
                continue;
            }
            self.check_slot(id, interval, errors)?;
            if let Some(reg) = interval.register() {
                self.check_register(id, interval, reg, errors)?;
            }
        }
        Ok(())
    }

    fn check_slot(
        &mut self,
        id: IntervalId,
        interval: &LiveInterval,
        errors: &mut VerifierErrors,
    ) -> VerifierStepResult {
        if interval.is_high() || interval.is_fixed() || interval.is_temp() {
            return Ok(());
        }
        let Some(slot) = self.pool.spill_slot(id) else {
            return Ok(());
        };
        let parent = self.pool.parent(id);
        if let Some(inst) = self.pool[parent].defined_by() {
            if matches!(
                self.func.inst(inst).kind,
                InstKind::Parameter(_) | InstKind::CurrentMethod
            ) {
                // These have their own slots.
                return Ok(());
            }
        }

        let first = (slot / VREG_SIZE) as i64 - self.frame.reserved_out_slots as i64;
        let count = if interval.needs_two_spill_slots() { 2 } else { 1 };
        for index in first..first + count {
            let Some(set) = usize::try_from(index).ok().and_then(|i| self.slots.get_mut(i)) else {
                return errors.fatal((
                    id,
                    format!("slot offset {slot}"),
                    "spill slot outside the allocator's area",
                ));
            };
            for range in interval.ranges() {
                for position in range.start..range.end {
                    if set.contains(position as usize) {
                        return errors.fatal((
                            id,
                            format!("slot offset {slot}"),
                            format!("spill slot conflict at {position}"),
                        ));
                    }
                    set.insert(position as usize);
                }
            }
        }
        Ok(())
    }

    fn check_register(
        &mut self,
        id: IntervalId,
        interval: &LiveInterval,
        reg: RegUnit,
        errors: &mut VerifierErrors,
    ) -> VerifierStepResult {
        let fp = interval.is_floating_point();
        let Some(taken) = self.register_set(reg, fp) else {
            return errors.fatal((id, format!("register {reg}"), "register out of range"));
        };
        let mut conflicts = Vec::new();
        for range in interval.ranges() {
            for position in range.start..range.end {
                if taken.contains(position as usize) {
                    conflicts.push(position);
                } else {
                    taken.insert(position as usize);
                }
            }
        }
        for position in conflicts {
            if !self.reuses_input_register(position, reg, fp) {
                let class = if fp { "f" } else { "r" };
                return errors.fatal((
                    id,
                    format!("{}", self.pool.display(id)),
                    format!("register conflict at {position} for {class}{reg}"),
                ));
            }
        }
        Ok(())
    }

    fn register_set(&mut self, reg: RegUnit, fp: bool) -> Option<&mut CompoundBitSet> {
        let sets = if fp { &mut self.fp } else { &mut self.core };
        sets.get_mut(reg as usize)
    }

    /// Is `reg` at `position` shared by a definition and one of its inputs dying there?
    fn reuses_input_register(&self, position: Position, reg: RegUnit, fp: bool) -> bool {
        let Some(def) = self.liveness.inst_at(position) else {
            return false;
        };
        let overlaps = self
            .func
            .locations(def)
            .is_none_or(|locations| locations.output_overlaps);
        if overlaps {
            return false;
        }
        let Some(output) = self.liveness.interval(def) else {
            return false;
        };
        self.holds(output, reg, fp, |i| i.start() == position)
            && self.func.inst(def).inputs.iter().any(|&input| {
                self.liveness.interval(input).is_some_and(|input| {
                    self.holds(input, reg, fp, |i| {
                        i.covers(position) && i.end() == position + 1
                    })
                })
            })
    }

    /// Does a sibling of the value of `parent`, or of its high half, hold `reg` and satisfy
    /// `pred`?
    fn holds(
        &self,
        parent: IntervalId,
        reg: RegUnit,
        fp: bool,
        pred: impl Fn(&LiveInterval) -> bool,
    ) -> bool {
        let pool = self.pool;
        let high = pool[parent].high();
        core::iter::once(parent)
            .chain(high)
            .flat_map(|chain| pool.siblings(chain))
            .map(|s| &pool[s])
            .any(|s| s.register() == Some(reg) && s.is_floating_point() == fp && pred(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::MachineDesc;
    use crate::regalloc::testing::{op, ret};
    use crate::regalloc::{linear_scan, resolver};

    fn allocate(func: &mut Function, target: &dyn TargetRegisters) -> (Liveness, IntervalPool, FrameLayout) {
        let mut pool = IntervalPool::new();
        let mut liveness = Liveness::new();
        liveness.compute(func, &mut pool, false);
        let allocation = linear_scan::run(func, &liveness, &mut pool, target).unwrap();
        let frame = resolver::run(func, &liveness, &mut pool, target, &allocation);
        (liveness, pool, frame)
    }

    #[test]
    fn allocated_function_validates() {
        let _ = env_logger::try_init();
        let mut func = Function::new();
        let b0 = func.create_block();
        let a = op(&mut func, b0, &[]);
        let b = op(&mut func, b0, &[a]);
        let c = op(&mut func, b0, &[b, a]);
        ret(&mut func, b0, &[c]);

        let target = MachineDesc::new(2, 0);
        let (liveness, pool, frame) = allocate(&mut func, &target);
        assert_eq!(validate_intervals(&func, &liveness, &pool, &target, &frame), Ok(()));
    }

    #[test]
    fn shared_register_is_reported() {
        let mut func = Function::new();
        let b0 = func.create_block();
        let a = op(&mut func, b0, &[]);
        let b = op(&mut func, b0, &[]);
        let c = op(&mut func, b0, &[a, b]);
        ret(&mut func, b0, &[c]);

        let target = MachineDesc::new(4, 0);
        let (liveness, mut pool, frame) = allocate(&mut func, &target);
        let a = liveness.interval(a).unwrap();
        let b = liveness.interval(b).unwrap();
        let reg = pool[a].register().unwrap();
        pool[b].set_register(reg);

        let errors = validate_intervals(&func, &liveness, &pool, &target, &frame).unwrap_err();
        assert_eq!(errors.0.len(), 1);
        assert!(errors.0[0].message.starts_with("register conflict"));
    }
}
