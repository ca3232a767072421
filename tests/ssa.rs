//! SSA integration tests.
//!
//! These tests drive SSA construction through the public API:
//! 1. Parse a textual listing into instructions
//! 2. Translate to IR
//! 3. Build the control flow graph
//! 4. Construct and verify SSA form
//! 5. Check phi placement and renaming

use irscope::{
    analysis::{
        build_cfg,
        ssa::{self, DefSite},
        ControlFlowGraph, JumpTables, SsaBuilder, SsaFunction,
    },
    ir::{AddressSpace, IrProgram, OpCode},
    translate::{Generic, Instruction, RegisterModel, Translator, X86_64},
    utils::graph::NodeId,
    Diagnostics, Result,
};

/// Translate a listing, 4 bytes per instruction, and build its CFG.
fn build<M: RegisterModel>(model: M, listing: &[&str]) -> Result<ControlFlowGraph> {
    let mut translator = Translator::new(model);
    let mut program = IrProgram::new();
    for (i, text) in listing.iter().enumerate() {
        let address = 0x1000 + 4 * i as u64;
        let insn = Instruction::parse(address, 4, text)?;
        program.add_instruction(address, 4, translator.translate(&insn)?)?;
    }
    build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new())
}

/// Build and verify SSA for a generic-model listing.
fn ssa_from(listing: &[&str]) -> Result<(ControlFlowGraph, SsaFunction)> {
    let cfg = build(Generic::default(), listing)?;
    let function = SsaBuilder::build(&cfg)?;
    ssa::verify(&function, &cfg)?;
    Ok((cfg, function))
}

#[test]
fn test_ssa_straight_line_has_no_phis() -> Result<()> {
    let (_, function) = ssa_from(&["mov r1, 0", "mov r2, 10", "add r1, r1, r2", "ret"])?;

    assert_eq!(function.block_count(), 1);
    assert_eq!(function.phi_count(), 0);

    // r1 is written twice and gets two generations
    let r1 = Generic::default().register("r1").unwrap();
    let generations: Vec<u32> = function
        .defined_values()
        .filter(|value| value.varnode() == r1)
        .map(|value| value.generation())
        .collect();
    assert_eq!(generations.len(), 2);
    assert_ne!(generations[0], generations[1]);
    Ok(())
}

#[test]
fn test_ssa_diamond_merge_phi() -> Result<()> {
    let (cfg, function) = ssa_from(&[
        "beqz r1, 0x100c",
        "mov r2, 1",
        "b 0x1010",
        "mov r2, 2",
        "add r3, r2, r2",
        "ret",
    ])?;

    assert_eq!(cfg.block_count(), 4);
    let merge = cfg.block_at(0x1010).unwrap();
    let phis = function.block(merge).unwrap().phis();
    assert_eq!(phis.len(), 1, "only r2 is written on both arms");

    let r2 = Generic::default().register("r2").unwrap();
    let phi = &phis[0];
    assert_eq!(phi.varnode(), r2);
    assert_eq!(phi.operands().len(), 2);

    let from_then = phi.operand_from(cfg.block_at(0x1004).unwrap()).unwrap();
    let from_else = phi.operand_from(cfg.block_at(0x100c).unwrap()).unwrap();
    assert_ne!(from_then, from_else);
    assert!(!from_then.is_live_in());
    assert!(!from_else.is_live_in());

    // The add reads the phi result
    let add = function
        .block(merge)
        .unwrap()
        .ops()
        .iter()
        .find(|op| op.opcode == OpCode::IntAdd)
        .unwrap();
    assert!(add.inputs.iter().all(|input| *input == phi.result()));
    Ok(())
}

#[test]
fn test_ssa_loop_header_phi() -> Result<()> {
    let (cfg, function) = ssa_from(&[
        "mov r1, 0",
        "mov r2, 0",
        "bge r1, 10, 0x1018",
        "add r2, r2, r1",
        "add r1, r1, 1",
        "b 0x1008",
        "ret",
    ])?;

    let header = cfg.block_at(0x1008).unwrap();
    let mut phis: Vec<_> = function
        .block(header)
        .unwrap()
        .phis()
        .iter()
        .map(|phi| phi.varnode())
        .collect();
    phis.sort();

    let model = Generic::default();
    let mut expected = vec![model.register("r1").unwrap(), model.register("r2").unwrap()];
    expected.sort();
    assert_eq!(phis, expected);
    assert_eq!(function.phi_count(), 2);
    Ok(())
}

#[test]
fn test_ssa_nested_loops() -> Result<()> {
    let (cfg, function) = ssa_from(&[
        "mov r1, 0",
        "bge r1, 4, 0x1020",
        "mov r2, 0",
        "bge r2, 4, 0x1018",
        "add r2, r2, 1",
        "b 0x100c",
        "add r1, r1, 1",
        "b 0x1004",
        "ret",
    ])?;

    assert_eq!(cfg.loops().len(), 2);
    let outer = cfg.block_at(0x1004).unwrap();
    let inner = cfg.block_at(0x100c).unwrap();
    assert!(cfg.dominates(outer, inner));

    let model = Generic::default();
    let r1 = model.register("r1").unwrap();
    let r2 = model.register("r2").unwrap();
    let inner_phis: Vec<_> = function
        .block(inner)
        .unwrap()
        .phis()
        .iter()
        .map(|phi| phi.varnode())
        .collect();
    assert!(inner_phis.contains(&r2));
    assert!(!inner_phis.contains(&r1), "r1 is not written in the inner loop");

    let outer_phis: Vec<_> = function
        .block(outer)
        .unwrap()
        .phis()
        .iter()
        .map(|phi| phi.varnode())
        .collect();
    assert!(outer_phis.contains(&r1));
    Ok(())
}

#[test]
fn test_ssa_block_local_temporaries_get_no_phis() -> Result<()> {
    let (_, function) = ssa_from(&[
        "mov r1, 0",
        "bge r1, 10, 0x1010",
        "add r1, r1, 1",
        "b 0x1004",
        "ret",
    ])?;

    for (_, block) in function.blocks() {
        for phi in block.phis() {
            assert_ne!(phi.varnode().space(), AddressSpace::Unique);
        }
    }
    Ok(())
}

#[test]
fn test_ssa_live_ins() -> Result<()> {
    let (_, function) = ssa_from(&["add r3, r1, r2", "ret"])?;

    let model = Generic::default();
    let live_ins = function.live_ins();
    assert!(live_ins.contains(&model.register("r1").unwrap()));
    assert!(live_ins.contains(&model.register("r2").unwrap()));
    assert!(!live_ins.contains(&model.register("r3").unwrap()));
    Ok(())
}

#[test]
fn test_ssa_x86_flags_across_blocks() -> Result<()> {
    let cfg = build(
        X86_64,
        &["cmp eax, 5", "jl 0x1010", "mov ebx, 1", "jmp 0x1014", "mov ebx, 2", "ret"],
    )?;
    let function = SsaBuilder::build(&cfg)?;
    ssa::verify(&function, &cfg)?;

    let merge = cfg.block_at(0x1014).unwrap();
    let ebx = X86_64.register("ebx").unwrap();
    assert!(function
        .block(merge)
        .unwrap()
        .phis()
        .iter()
        .any(|phi| phi.varnode().overlaps(&ebx)));

    // Every renamed input is defined somewhere
    for (_, block) in function.blocks() {
        for op in block.ops() {
            for input in &op.inputs {
                if !input.is_live_in() {
                    assert!(function.definition(input).is_some(), "{input} has no definition");
                }
            }
        }
    }
    Ok(())
}

#[test]
fn test_ssa_x86_byte_write_reaches_full_register() -> Result<()> {
    let cfg = build(X86_64, &["mov rax, 5", "mov al, 1", "mov rbx, rax", "ret"])?;
    let function = SsaBuilder::build(&cfg)?;
    ssa::verify(&function, &cfg)?;

    let block = function.block(cfg.entry()).unwrap();
    let rbx = X86_64.register("rbx").unwrap();
    let copy = block
        .ops()
        .iter()
        .find(|op| op.output.map(|value| value.varnode()) == Some(rbx))
        .unwrap();
    let Some(DefSite::Op { index, .. }) = function.definition(&copy.inputs[0]) else {
        panic!("rax read by the copy has no defining op");
    };
    let merge = &block.ops()[index];
    assert_eq!(merge.opcode, OpCode::Insert);
    assert_eq!(merge.inputs[1].varnode(), X86_64.register("al").unwrap());
    Ok(())
}

#[test]
fn test_ssa_x86_dword_read_after_qword_write() -> Result<()> {
    let cfg = build(X86_64, &["mov rax, 5", "mov ebx, eax", "ret"])?;
    let function = SsaBuilder::build(&cfg)?;
    ssa::verify(&function, &cfg)?;

    let block = function.block(cfg.entry()).unwrap();
    let ebx = X86_64.register("ebx").unwrap();
    let copy = block
        .ops()
        .iter()
        .find(|op| op.output.map(|value| value.varnode()) == Some(ebx))
        .unwrap();
    assert!(!copy.inputs[0].is_live_in(), "eax must not read its entry value");
    let Some(DefSite::Op { index, .. }) = function.definition(&copy.inputs[0]) else {
        panic!("eax read by the copy has no defining op");
    };
    let extract = &block.ops()[index];
    assert_eq!(extract.opcode, OpCode::SubPiece);
    assert_eq!(extract.inputs[0].varnode(), X86_64.register("rax").unwrap());
    assert!(!extract.inputs[0].is_live_in());
    Ok(())
}

#[test]
fn test_ssa_entry_is_block_zero() -> Result<()> {
    let (cfg, function) = ssa_from(&["mov r1, 1", "ret"])?;
    assert_eq!(cfg.entry(), NodeId::new(0));
    assert!(function.block(NodeId::new(0)).is_some());
    Ok(())
}
