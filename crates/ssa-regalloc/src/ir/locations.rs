//! Operand locations and the per-instruction location summaries attached by instruction
//! selection.
//!
//! Before allocation, most locations are [`Location::Unallocated`] with a [`Policy`] saying what
//! kind of location the instruction accepts. The allocator replaces them with registers, stack
//! slots or constants.

use crate::entity::EntityRef;
use crate::ir::{Inst, Type};
use crate::register_set::{RegisterSet, bit};
use core::fmt;
use cranelift_bitset::CompoundBitSet;
use smallvec::SmallVec;

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// A register number within its register class.
pub type RegUnit = u16;

/// Width in bytes of one stack slot.
pub const VREG_SIZE: i32 = 4;

/// What kind of location an unallocated operand accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Policy {
    /// A register or a stack slot.
    Any,
    /// A core register.
    RequiresRegister,
    /// A floating point register.
    RequiresFpuRegister,
    /// The output must be in the location of the first input.
    SameAsFirstInput,
}

/// A location of a value: a register, a stack slot, a constant, or a demand for one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Location {
    /// No location. Inputs left invalid are not used by the instruction.
    #[default]
    Invalid,
    /// The value is the constant produced by the given instruction.
    Constant(Inst),
    /// A core register.
    Register(RegUnit),
    /// A floating point register.
    FpuRegister(RegUnit),
    /// Two core registers holding a double-width value.
    RegisterPair {
        /// Register holding the low half.
        low: RegUnit,
        /// Register holding the high half.
        high: RegUnit,
    },
    /// Two floating point registers holding a double-width value.
    FpuRegisterPair {
        /// Register holding the low half.
        low: RegUnit,
        /// Register holding the high half.
        high: RegUnit,
    },
    /// A single stack slot at the given offset.
    StackSlot(i32),
    /// Two consecutive stack slots starting at the given offset.
    DoubleStackSlot(i32),
    /// Not allocated yet.
    Unallocated(Policy),
}

impl Location {
    /// Shorthand for an unallocated location accepting any register or slot.
    pub fn any() -> Self {
        Self::Unallocated(Policy::Any)
    }

    /// Shorthand for an unallocated location requiring a core register.
    pub fn requires_register() -> Self {
        Self::Unallocated(Policy::RequiresRegister)
    }

    /// Shorthand for an unallocated location requiring an FP register.
    pub fn requires_fpu_register() -> Self {
        Self::Unallocated(Policy::RequiresFpuRegister)
    }

    /// Shorthand for an output in the location of the first input.
    pub fn same_as_first_input() -> Self {
        Self::Unallocated(Policy::SameAsFirstInput)
    }

    /// Is this anything but `Invalid`?
    pub fn is_valid(self) -> bool {
        self != Self::Invalid
    }

    /// Is this an unallocated demand?
    pub fn is_unallocated(self) -> bool {
        matches!(self, Self::Unallocated(_))
    }

    /// The policy of an unallocated location.
    pub fn policy(self) -> Option<Policy> {
        match self {
            Self::Unallocated(policy) => Some(policy),
            _ => None,
        }
    }

    /// Is this a constant?
    pub fn is_constant(self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// Is this a single core register?
    pub fn is_register(self) -> bool {
        matches!(self, Self::Register(_))
    }

    /// Is this a single FP register?
    pub fn is_fpu_register(self) -> bool {
        matches!(self, Self::FpuRegister(_))
    }

    /// Is this a core register pair?
    pub fn is_register_pair(self) -> bool {
        matches!(self, Self::RegisterPair { .. })
    }

    /// Is this an FP register pair?
    pub fn is_fpu_register_pair(self) -> bool {
        matches!(self, Self::FpuRegisterPair { .. })
    }

    /// Is this a register pair of either class?
    pub fn is_pair(self) -> bool {
        self.is_register_pair() || self.is_fpu_register_pair()
    }

    /// Is this a register or register pair of either class?
    pub fn is_register_kind(self) -> bool {
        matches!(
            self,
            Self::Register(_)
                | Self::FpuRegister(_)
                | Self::RegisterPair { .. }
                | Self::FpuRegisterPair { .. }
        )
    }

    /// Is this a single or double stack slot?
    pub fn is_stack(self) -> bool {
        matches!(self, Self::StackSlot(_) | Self::DoubleStackSlot(_))
    }

    /// Is this an unallocated demand for a register of either class?
    pub fn requires_register_kind(self) -> bool {
        matches!(
            self,
            Self::Unallocated(Policy::RequiresRegister | Policy::RequiresFpuRegister)
        )
    }

    /// The register (or low register of a pair).
    pub fn reg(self) -> Option<RegUnit> {
        match self {
            Self::Register(r) | Self::FpuRegister(r) => Some(r),
            Self::RegisterPair { low, .. } | Self::FpuRegisterPair { low, .. } => Some(low),
            _ => None,
        }
    }

    /// The high register of a pair.
    pub fn high_reg(self) -> Option<RegUnit> {
        match self {
            Self::RegisterPair { high, .. } | Self::FpuRegisterPair { high, .. } => Some(high),
            _ => None,
        }
    }

    /// The stack offset of a stack location.
    pub fn stack_index(self) -> Option<i32> {
        match self {
            Self::StackSlot(i) | Self::DoubleStackSlot(i) => Some(i),
            _ => None,
        }
    }

    /// The low half of a double-width location.
    pub fn to_low(self) -> Self {
        match self {
            Self::RegisterPair { low, .. } => Self::Register(low),
            Self::FpuRegisterPair { low, .. } => Self::FpuRegister(low),
            Self::DoubleStackSlot(i) => Self::StackSlot(i),
            other => other,
        }
    }

    /// The high half of a double-width location.
    pub fn to_high(self) -> Self {
        match self {
            Self::RegisterPair { high, .. } => Self::Register(high),
            Self::FpuRegisterPair { high, .. } => Self::FpuRegister(high),
            Self::DoubleStackSlot(i) => Self::StackSlot(i + VREG_SIZE),
            other => other,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Invalid => f.write_str("-"),
            Self::Constant(inst) => write!(f, "#{}", inst.index()),
            Self::Register(r) => write!(f, "r{r}"),
            Self::FpuRegister(r) => write!(f, "f{r}"),
            Self::RegisterPair { low, high } => write!(f, "r{low}:r{high}"),
            Self::FpuRegisterPair { low, high } => write!(f, "f{low}:f{high}"),
            Self::StackSlot(i) => write!(f, "ss[{i}]"),
            Self::DoubleStackSlot(i) => write!(f, "ds[{i}]"),
            Self::Unallocated(Policy::Any) => f.write_str("U(any)"),
            Self::Unallocated(Policy::RequiresRegister) => f.write_str("U(reg)"),
            Self::Unallocated(Policy::RequiresFpuRegister) => f.write_str("U(freg)"),
            Self::Unallocated(Policy::SameAsFirstInput) => f.write_str("U(same)"),
        }
    }
}

/// Whether, and how, an instruction calls out.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum CallKind {
    /// No call: not a safepoint.
    #[default]
    NoCall,
    /// Calls only on a slow path. Live registers are saved by the slow path itself.
    CallOnSlowPath,
    /// Always calls. Caller-save registers are clobbered.
    CallOnMainOnly,
}

/// What the resolver reports for a safepoint instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SafepointInfo {
    /// Registers holding a live value across the safepoint.
    pub live_registers: RegisterSet,
    /// Core registers holding a live reference.
    pub register_bits: u64,
    /// Stack slots (in slot units) holding a live reference.
    pub stack_mask: CompoundBitSet,
}

impl SafepointInfo {
    /// Record that core register `reg` holds a reference.
    pub fn set_register_bit(&mut self, reg: RegUnit) {
        self.register_bits |= bit(reg);
    }

    /// Record that the slot at `index` (in slot units) holds a reference.
    pub fn set_stack_bit(&mut self, index: usize) {
        self.stack_mask.insert(index);
    }
}

/// The locations demanded by one instruction, filled in by the allocator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocationSummary {
    /// One location per input.
    pub inputs: SmallVec<[Location; 4]>,
    /// Scratch registers needed only during the instruction.
    pub temps: SmallVec<[Location; 2]>,
    /// Location of the produced value.
    pub output: Location,
    /// The output may not share a register with any input.
    pub output_overlaps: bool,
    /// Call behaviour of the instruction.
    pub call_kind: CallKind,
    /// Inputs left `Invalid` are tolerated; the instruction uses a best-effort calling
    /// convention.
    pub intrinsified: bool,
    /// Live registers and references at this instruction when it is a safepoint.
    pub safepoint: SafepointInfo,
}

impl LocationSummary {
    /// Create a summary with `num_inputs` inputs accepting any location.
    pub fn new(num_inputs: usize, call_kind: CallKind) -> Self {
        Self {
            inputs: (0..num_inputs).map(|_| Location::any()).collect(),
            call_kind,
            ..Default::default()
        }
    }

    /// Location of input `index`.
    pub fn in_at(&self, index: usize) -> Location {
        self.inputs.get(index).copied().unwrap_or_default()
    }

    /// Set the location of input `index`.
    pub fn set_in_at(&mut self, index: usize, location: Location) {
        if index >= self.inputs.len() {
            self.inputs.resize(index + 1, Location::Invalid);
        }
        self.inputs[index] = location;
    }

    /// Location of temp `index`.
    pub fn temp(&self, index: usize) -> Location {
        self.temps.get(index).copied().unwrap_or_default()
    }

    /// Set the location of temp `index`.
    pub fn set_temp(&mut self, index: usize, location: Location) {
        self.temps[index] = location;
    }

    /// Add a temp with the given demand.
    pub fn add_temp(&mut self, location: Location) {
        self.temps.push(location);
    }

    /// Is the instruction a GC safepoint?
    pub fn needs_safepoint(&self) -> bool {
        self.call_kind != CallKind::NoCall
    }

    /// Does the instruction always call?
    pub fn will_call(&self) -> bool {
        self.call_kind == CallKind::CallOnMainOnly
    }

    /// Does the instruction call only on a slow path?
    pub fn only_calls_on_slow_path(&self) -> bool {
        self.call_kind == CallKind::CallOnSlowPath
    }

    /// Is input `index` demanded in a fixed register or stack slot?
    pub fn is_fixed_input(&self, index: usize) -> bool {
        let input = self.in_at(index);
        input.is_register_kind() || input.is_stack()
    }

    /// Does the output reuse the location of input `index`?
    pub fn output_uses_same_as(&self, index: usize) -> bool {
        index == 0 && self.output == Location::same_as_first_input()
    }
}

/// One source-to-destination transfer of a parallel move.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MoveOperands {
    /// Where the value is.
    pub source: Location,
    /// Where the value must go.
    pub destination: Location,
    /// The type of the moved value.
    pub ty: Type,
    /// The instruction whose value is moved, if any.
    pub instruction: Option<Inst>,
}

/// An unordered set of moves that take effect simultaneously.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParallelMove {
    moves: SmallVec<[MoveOperands; 4]>,
    lifetime_position: u32,
}

impl ParallelMove {
    /// Create an empty parallel move anchored at `lifetime_position`.
    pub fn new(lifetime_position: u32) -> Self {
        Self {
            moves: SmallVec::new(),
            lifetime_position,
        }
    }

    /// The lifetime position this move was created for.
    pub fn lifetime_position(&self) -> u32 {
        self.lifetime_position
    }

    /// Add a move.
    pub fn add_move(
        &mut self,
        source: Location,
        destination: Location,
        ty: Type,
        instruction: Option<Inst>,
    ) {
        self.moves.push(MoveOperands {
            source,
            destination,
            ty,
            instruction,
        });
    }

    /// The moves of this bundle.
    pub fn moves(&self) -> &[MoveOperands] {
        &self.moves
    }

    /// Number of moves.
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    /// Is the bundle empty?
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

impl fmt::Display for ParallelMove {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pmove@{} [", self.lifetime_position)?;
        for (i, m) in self.moves.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} -> {}", m.source, m.destination)?;
        }
        f.write_str("]")
    }
}
