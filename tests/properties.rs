//! Property tests over randomly generated functions.
//!
//! Programs are built from a small generic-model instruction mix (arithmetic,
//! unconditional and conditional branches to arbitrary instructions, returns),
//! which produces reducible and irreducible graphs, unreachable code and
//! nested loops.

use std::collections::BTreeSet;

use proptest::prelude::*;

use irscope::{
    analysis::{
        build_cfg, recover_structure, ssa, ControlFlowGraph, JumpTables, SsaBuilder,
        TypeInference,
    },
    config::{RenderConfig, StructureConfig, TypeConfig},
    ir::{IrProgram, OpCode},
    render::Renderer,
    translate::{Generic, Instruction, Translator},
    utils::graph::algorithms::compute_dominators,
    Diagnostics,
};

#[derive(Debug, Clone)]
enum Line {
    Add(u8),
    Branch(usize),
    BranchIfZero(u8, usize),
    Return,
}

impl Line {
    fn text(&self) -> String {
        match self {
            Line::Add(r) => format!("add r{r}, r{r}, 1"),
            Line::Branch(target) => format!("b 0x{:x}", address(*target)),
            Line::BranchIfZero(r, target) => format!("beqz r{r}, 0x{:x}", address(*target)),
            Line::Return => "ret".to_string(),
        }
    }
}

fn address(index: usize) -> u64 {
    0x1000 + 4 * index as u64
}

fn line(len: usize) -> impl Strategy<Value = Line> {
    prop_oneof![
        4 => (0u8..4).prop_map(Line::Add),
        1 => (0..len).prop_map(Line::Branch),
        2 => (0u8..4, 0..len).prop_map(|(r, target)| Line::BranchIfZero(r, target)),
        1 => Just(Line::Return),
    ]
}

fn lines() -> impl Strategy<Value = Vec<Line>> {
    (2usize..24).prop_flat_map(|len| prop::collection::vec(line(len), len))
}

/// Translates the lines plus a final `ret` and builds the CFG.
fn build(lines: &[Line]) -> (IrProgram, ControlFlowGraph) {
    let mut translator = Translator::new(Generic::default());
    let mut program = IrProgram::new();
    let texts = lines.iter().map(Line::text).chain(std::iter::once("ret".to_string()));
    for (i, text) in texts.enumerate() {
        let insn = Instruction::parse(address(i), 4, &text).unwrap();
        program
            .add_instruction(address(i), 4, translator.translate(&insn).unwrap())
            .unwrap();
    }
    let cfg = build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new()).unwrap();
    (program, cfg)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn successor_counts_match_terminators(lines in lines()) {
        let (_, cfg) = build(&lines);
        for (id, block) in cfg.blocks() {
            let successors: BTreeSet<_> = cfg.successors(id).collect();
            match block.terminator().map(|op| op.opcode) {
                Some(OpCode::Return) => prop_assert!(successors.is_empty()),
                Some(OpCode::Branch) => prop_assert_eq!(successors.len(), 1),
                Some(OpCode::CBranch) => prop_assert!((1..=2).contains(&successors.len())),
                _ => prop_assert_eq!(successors.len(), 1),
            }
        }
    }

    #[test]
    fn dominance_is_idempotent(lines in lines()) {
        let (_, cfg) = build(&lines);
        let first = compute_dominators(&cfg, cfg.entry());
        let second = compute_dominators(&cfg, cfg.entry());
        for node in cfg.node_ids() {
            prop_assert_eq!(first.immediate_dominator(node), second.immediate_dominator(node));
            prop_assert_eq!(first.immediate_dominator(node), cfg.idom(node));
        }
    }

    #[test]
    fn ssa_uses_have_one_dominating_definition(lines in lines()) {
        let (_, cfg) = build(&lines);
        let function = SsaBuilder::build(&cfg).unwrap();
        prop_assert!(ssa::verify(&function, &cfg).is_ok());
    }

    #[test]
    fn back_edges_belong_to_classified_loops(lines in lines()) {
        let (_, cfg) = build(&lines);
        let dominators = cfg.structural_dominators();
        for source in cfg.node_ids() {
            for target in cfg.structural_successors(source) {
                if !dominators.is_reachable(source) || !dominators.dominates(target, source) {
                    continue;
                }
                let info = cfg.loops().loop_for_header(target);
                prop_assert!(info.is_some(), "back edge {} -> {} has no loop", source, target);
                let info = info.unwrap();
                prop_assert!(info.latches.contains(&source));
                prop_assert!(info.contains(source));
            }
        }
        let headers: BTreeSet<_> = cfg.loops().iter().map(|info| info.header).collect();
        prop_assert_eq!(headers.len(), cfg.loops().len());
    }

    #[test]
    fn types_are_monotonic_under_a_baseline(lines in lines()) {
        let (_, cfg) = build(&lines);
        let function = SsaBuilder::build(&cfg).unwrap();
        let config = TypeConfig::default();
        let diagnostics = Diagnostics::new();

        let first = TypeInference::new(&config).infer_ssa(&function, &diagnostics);
        let second = TypeInference::new(&config)
            .with_baseline(&first)
            .infer_ssa(&function, &diagnostics);
        for (value, ty) in first.iter() {
            if ty.is_concrete() {
                prop_assert_eq!(second.get(value), Some(ty));
            }
        }
    }

    #[test]
    fn structure_places_every_block_once(lines in lines()) {
        let (program, cfg) = build(&lines);
        let tree = recover_structure(&cfg, &StructureConfig::default());

        let blocks = tree.root().blocks();
        let unique: BTreeSet<_> = blocks.iter().copied().collect();
        prop_assert_eq!(unique.len(), blocks.len());
        prop_assert_eq!(unique.len(), cfg.block_count());

        let function = SsaBuilder::build(&cfg).unwrap();
        let types = TypeInference::new(&TypeConfig::default())
            .infer_ssa(&function, &Diagnostics::new());
        let model = Generic::default();
        let config = RenderConfig::default();
        let text = Renderer::new(&program, &cfg, &types, &tree, &model, &config).render();
        prop_assert!(text.starts_with("void fn_1000(void)\n{\n"), "{}", text);
        prop_assert!(text.ends_with("}\n"), "{}", text);
    }
}
