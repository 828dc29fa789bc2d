//! Builders for the small functions used by unit tests.

use crate::ir::{Block, CallKind, Function, Inst, InstKind, Location, LocationSummary, Type};

pub(crate) fn summary(inputs: &[Location], output: Location) -> LocationSummary {
    let mut locations = LocationSummary::new(0, CallKind::NoCall);
    locations.inputs = inputs.iter().copied().collect();
    locations.output = output;
    locations
}

/// An integer operation reading its inputs from registers and writing a register.
pub(crate) fn op(func: &mut Function, block: Block, inputs: &[Inst]) -> Inst {
    let in_locations = std::vec![Location::requires_register(); inputs.len()];
    func.append_inst(
        block,
        InstKind::Op("op"),
        Type::Int32,
        inputs,
        summary(&in_locations, Location::requires_register()),
    )
}

/// An unconditional jump, or a branch on no condition, ending `block`.
pub(crate) fn goto(func: &mut Function, block: Block) -> Inst {
    func.append_inst(
        block,
        InstKind::Branch("goto"),
        Type::Void,
        &[],
        summary(&[], Location::Invalid),
    )
}

/// A return reading its inputs from registers.
pub(crate) fn ret(func: &mut Function, block: Block, inputs: &[Inst]) -> Inst {
    let in_locations = std::vec![Location::requires_register(); inputs.len()];
    func.append_inst(
        block,
        InstKind::Branch("return"),
        Type::Void,
        inputs,
        summary(&in_locations, Location::Invalid),
    )
}

/// An integer constant, never allocated a register unless a user asks for one.
pub(crate) fn constant(func: &mut Function, block: Block, value: i64) -> Inst {
    let inst = func.append_inst(
        block,
        InstKind::Constant(value),
        Type::Int32,
        &[],
        summary(&[], Location::Invalid),
    );
    if let Some(locations) = func.locations_mut(inst) {
        locations.output = Location::Constant(inst);
    }
    inst
}
