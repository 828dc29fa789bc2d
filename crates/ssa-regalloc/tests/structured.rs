//! Random structured programs of nested diamonds and loops, allocated with few registers.

mod support;

use proptest::prelude::*;
use ssa_regalloc::ir::{Block, Function, Inst, Type};
use ssa_regalloc::isa::MachineDesc;
use ssa_regalloc::Context;
use support::*;

#[derive(Clone, Debug)]
enum Stmt {
    /// An operation on two available values, picked by index.
    Op(u8, u8),
    Sink(u8),
    Diamond(Vec<Stmt>, Vec<Stmt>),
    Loop(Vec<Stmt>),
}

fn stmts() -> impl Strategy<Value = Vec<Stmt>> {
    let leaf = prop_oneof![
        3 => (any::<u8>(), any::<u8>()).prop_map(|(a, b)| Stmt::Op(a, b)),
        1 => any::<u8>().prop_map(Stmt::Sink),
    ];
    let stmt = leaf.prop_recursive(3, 24, 6, |inner| {
        let body = proptest::collection::vec(inner, 1..6);
        prop_oneof![
            (body.clone(), body.clone()).prop_map(|(t, e)| Stmt::Diamond(t, e)),
            body.prop_map(Stmt::Loop),
        ]
    });
    proptest::collection::vec(stmt, 1..8)
}

struct Lowering {
    func: Function,
    current: Block,
    /// Values dominating `current`, in definition order.
    available: Vec<Inst>,
}

impl Lowering {
    fn pick(&self, index: u8) -> Inst {
        self.available[usize::from(index) % self.available.len()]
    }

    fn last(&self) -> Inst {
        *self.available.last().unwrap()
    }

    fn goto(&mut self, to: Block) {
        branch(&mut self.func, self.current, "goto", &[]);
        self.func.add_edge(self.current, to);
    }

    fn lower(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match stmt {
                Stmt::Op(a, b) => {
                    let inputs = [self.pick(*a), self.pick(*b)];
                    let value = op(&mut self.func, self.current, &inputs);
                    self.available.push(value);
                }
                Stmt::Sink(a) => {
                    let input = self.pick(*a);
                    sink(&mut self.func, self.current, input);
                }
                Stmt::Diamond(then, otherwise) => {
                    let [t, e, join] = [(); 3].map(|_| self.func.create_block());
                    let condition = self.last();
                    branch(&mut self.func, self.current, "if", &[condition]);
                    self.func.add_edge(self.current, t);
                    self.func.add_edge(self.current, e);
                    let outer = self.available.len();

                    let mut arm_values = [condition; 2];
                    for (arm, (block, body)) in [(t, then), (e, otherwise)].into_iter().enumerate() {
                        self.current = block;
                        self.lower(body);
                        arm_values[arm] = self.last();
                        self.goto(join);
                        self.available.truncate(outer);
                    }

                    self.current = join;
                    let phi = self.func.append_phi(join, Type::Int32, &arm_values);
                    self.available.push(phi);
                }
                Stmt::Loop(body) => {
                    let [header, block, exit] = [(); 3].map(|_| self.func.create_block());
                    let init = self.last();
                    self.goto(header);
                    let outer = self.available.len();

                    // The second input is patched once the body is lowered.
                    let phi = self.func.append_phi(header, Type::Int32, &[init, init]);
                    self.available.push(phi);
                    branch(&mut self.func, header, "if", &[phi]);
                    self.func.add_edge(header, block);
                    self.func.add_edge(header, exit);

                    self.current = block;
                    self.lower(body);
                    self.func.inst_mut(phi).inputs[1] = self.last();
                    self.goto(header);

                    self.available.truncate(outer + 1);
                    self.current = exit;
                }
            }
        }
    }
}

fn build(program: &[Stmt]) -> Function {
    let mut func = Function::new();
    let entry = func.create_block();
    let first = op(&mut func, entry, &[]);
    let second = op(&mut func, entry, &[]);
    let mut lowering = Lowering {
        func,
        current: entry,
        available: vec![first, second],
    };
    lowering.lower(program);
    let result = lowering.last();
    branch(&mut lowering.func, lowering.current, "return", &[result]);
    lowering.func
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn structured_programs_allocate_and_validate(
        program in stmts(),
        registers in 3usize..7,
    ) {
        let func = build(&program);
        for algorithm in ALGORITHMS {
            let mut func = func.clone();
            let mut ctx = Context::new();
            let output = allocate(&mut ctx, &mut func, &MachineDesc::new(registers, 0), algorithm);
            prop_assert!(output.is_ok(), "{algorithm}: {:?}\n{func}", output.err());
            let seams = check_seams(&ctx, &func);
            prop_assert!(seams.is_ok(), "{algorithm}: {}\n{func}", seams.unwrap_err());
        }
    }
}
