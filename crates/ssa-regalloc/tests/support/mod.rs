//! Function builders and checks shared by the integration tests.

#![allow(dead_code)]

use ssa_regalloc::ir::{
    Block, CallKind, Function, Inst, InstKind, Location, LocationSummary, MoveOperands, Type,
};
use ssa_regalloc::isa::MachineDesc;
use ssa_regalloc::settings::{self, Configurable, Flags};
use ssa_regalloc::{AllocationOutput, Context, RegallocResult};

pub const ALGORITHMS: [&str; 2] = ["linear_scan", "graph_color"];

pub fn flags(algorithm: &str) -> Flags {
    let mut builder = settings::builder();
    builder.set("regalloc_algorithm", algorithm).unwrap();
    builder.enable("enable_verifier").unwrap();
    Flags::new(builder)
}

pub fn summary(inputs: &[Location], output: Location) -> LocationSummary {
    let mut locations = LocationSummary::new(0, CallKind::NoCall);
    locations.inputs = inputs.iter().copied().collect();
    locations.output = output;
    locations
}

/// An integer operation reading its inputs from registers and writing a register.
pub fn op(func: &mut Function, block: Block, inputs: &[Inst]) -> Inst {
    let in_locations = vec![Location::requires_register(); inputs.len()];
    func.append_inst(
        block,
        InstKind::Op("op"),
        Type::Int32,
        inputs,
        summary(&in_locations, Location::requires_register()),
    )
}

/// Like `op`, producing a value of type `ty`.
pub fn typed_op(func: &mut Function, block: Block, ty: Type, inputs: &[Inst]) -> Inst {
    let in_locations = vec![Location::requires_register(); inputs.len()];
    func.append_inst(
        block,
        InstKind::Op("op"),
        ty,
        inputs,
        summary(&in_locations, Location::requires_register()),
    )
}

/// An instruction reading `input` from a register and producing nothing.
pub fn sink(func: &mut Function, block: Block, input: Inst) -> Inst {
    func.append_inst(
        block,
        InstKind::Op("sink"),
        Type::Void,
        &[input],
        summary(&[Location::requires_register()], Location::Invalid),
    )
}

/// An instruction without operands that calls, always or on a slow path.
pub fn call(func: &mut Function, block: Block, call_kind: CallKind) -> Inst {
    func.append_inst(
        block,
        InstKind::Op("call"),
        Type::Void,
        &[],
        LocationSummary::new(0, call_kind),
    )
}

pub fn constant(func: &mut Function, block: Block, value: i64) -> Inst {
    let inst = func.append_inst(
        block,
        InstKind::Constant(value),
        Type::Int32,
        &[],
        summary(&[], Location::Invalid),
    );
    func.locations_mut(inst).unwrap().output = Location::Constant(inst);
    inst
}

pub fn branch(func: &mut Function, block: Block, name: &'static str, inputs: &[Inst]) -> Inst {
    let in_locations = vec![Location::requires_register(); inputs.len()];
    func.append_inst(
        block,
        InstKind::Branch(name),
        Type::Void,
        inputs,
        summary(&in_locations, Location::Invalid),
    )
}

pub fn allocate(
    ctx: &mut Context,
    func: &mut Function,
    target: &MachineDesc,
    algorithm: &str,
) -> RegallocResult<AllocationOutput> {
    let _ = env_logger::try_init();
    let output = ctx.run(target, func, &flags(algorithm));
    log::debug!("{algorithm}:\n{func}");
    output
}

/// Every move of the function with the position of its bundle.
pub fn all_moves(func: &Function) -> Vec<(u32, MoveOperands)> {
    func.blocks()
        .flat_map(|block| func.parallel_moves(block))
        .flat_map(|(_, pm)| {
            pm.moves()
                .iter()
                .map(|m| (pm.lifetime_position(), *m))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Check that every pair of adjacent siblings inside a block, the second one in a register, is
/// joined by exactly one move at the split position.
pub fn check_seams(ctx: &Context, func: &Function) -> Result<(), String> {
    let liveness = ctx.liveness();
    let pool = ctx.intervals();
    let moves = all_moves(func);
    for &value in liveness.ssa_values() {
        let Some(root) = liveness.interval(value) else {
            continue;
        };
        let siblings: Vec<_> = pool.siblings(root).collect();
        for pair in siblings.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            let at = pool[next].start();
            if !pool[next].has_register()
                || pool[current].end() != at
                || liveness.is_at_block_boundary(at)
            {
                continue;
            }
            let destination = pool.location(next);
            let count = moves
                .iter()
                .filter(|(position, m)| {
                    *position == at && m.destination == destination && m.instruction == Some(value)
                })
                .count();
            if count != 1 {
                return Err(format!("{count} moves into {destination} for {value} at {at}"));
            }
        }
    }
    Ok(())
}
