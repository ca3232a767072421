//! End-to-end decompiler integration tests.
//!
//! These tests run the whole pipeline through [`Decompiler`] and check every
//! stage's output: IR, CFG, SSA, types, structure, text and diagnostics.

use irscope::{
    analysis::{ssa, LoopType, Type},
    ir::OpCode,
    prelude::*,
};

fn generic() -> Decompiler<Generic> {
    Decompiler::new(Generic::default(), DecompilerConfig::default())
}

#[test]
fn test_sequential_scenario() -> Result<()> {
    let input = FunctionInput::from_listing(
        0x1000,
        4,
        &["mov r1, 0", "mov r2, 10", "add r1, r1, r2", "ret"],
    )?;
    let function = generic().decompile(&input)?;

    let opcodes: Vec<OpCode> = function.ir.ops().iter().map(|op| op.opcode).collect();
    assert_eq!(
        opcodes,
        vec![OpCode::Copy, OpCode::Copy, OpCode::IntAdd, OpCode::Return]
    );
    assert_eq!(function.cfg.block_count(), 1);

    let model = Generic::default();
    let types = function.types.by_storage();
    assert_eq!(types.get(&model.register("r1").unwrap()), Some(&Type::int(8)));
    assert_eq!(types.get(&model.register("r2").unwrap()), Some(&Type::int(8)));

    assert_eq!(function.structure.to_string(), "sequence(n0)");
    assert!(!function.diagnostics.has_any());
    Ok(())
}

#[test]
fn test_diamond_scenario() -> Result<()> {
    let input = FunctionInput::from_listing(
        0x1000,
        4,
        &["beq r1, 5, 0x100c", "mov r2, 1", "b 0x1010", "mov r2, 2", "ret"],
    )?;
    let function = generic().decompile(&input)?;

    assert_eq!(function.cfg.block_count(), 4);
    assert_eq!(
        function.structure.to_string(),
        "sequence(if-then-else(n0, n2, n1), n3)"
    );
    assert_eq!(function.ssa.phi_count(), 1);

    let expected = "\
void fn_1000(void)
{
  int64 r1;
  int64 r2;

  if (r1 == 5) {
    r2 = 2;
  } else {
    r2 = 1;
  }
  return;
}
";
    assert_eq!(function.text, expected);
    Ok(())
}

#[test]
fn test_while_scenario() -> Result<()> {
    let input = FunctionInput::from_listing(
        0x1000,
        4,
        &["mov r1, 0", "bge r1, 10, 0x1010", "add r1, r1, 1", "b 0x1004", "ret"],
    )?;
    let function = generic().decompile(&input)?;

    let loops = function.cfg.loops();
    assert_eq!(loops.len(), 1);
    assert_eq!(loops.loops()[0].loop_type, LoopType::While);
    assert_eq!(
        function.structure.to_string(),
        "sequence(n0, while(!n1, n2), n3)"
    );
    assert!(function.text.contains("  while (r1 < 0xa) {\n    r1 = r1 + 1;\n  }\n"));
    Ok(())
}

#[test]
fn test_x86_frame_function() -> Result<()> {
    let input = FunctionInput::from_listing(
        0x401000,
        4,
        &[
            "push rbp",
            "mov rbp, rsp",
            "mov dword ptr [rbp - 4], edi",
            "cmp dword ptr [rbp - 4], 0",
            "jle 0x401020",
            "mov eax, 1",
            "jmp 0x401024",
            "nop",
            "mov eax, 0",
            "pop rbp",
            "ret",
        ],
    )?;
    let decompiler = Decompiler::new(X86_64, DecompilerConfig::default());
    let function = decompiler.decompile(&input)?;

    // The nop at 0x40101c is never reached but still part of the window
    assert_eq!(function.ir.instruction_count(), 11);
    ssa::verify(&function.ssa, &function.cfg)?;

    assert!(function.text.starts_with("void fn_401000(void)\n{\n"));
    assert!(function.text.contains("if ("));
    assert!(function.text.contains("} else {"));
    assert!(function.text.trim_end().ends_with("return;\n}"));
    Ok(())
}

#[test]
fn test_malformed_operation_aborts_function() -> Result<()> {
    let x86 = Decompiler::new(X86_64, DecompilerConfig::default());
    let input = FunctionInput::from_listing(0x1000, 4, &["add eax, rbx", "ret"])?;
    assert!(matches!(
        x86.decompile(&input),
        Err(Error::MalformedOperation { .. })
    ));

    let input = FunctionInput::from_listing(0x1000, 4, &["add r1d, r1d, r2", "ret"])?;
    assert!(matches!(
        generic().decompile(&input),
        Err(Error::MalformedOperation { .. })
    ));
    Ok(())
}

#[test]
fn test_shared_branch_target_tests_flags() -> Result<()> {
    let input = FunctionInput::from_listing(
        0x1000,
        4,
        &["cmp eax, 1", "jl 0x1010", "cmp eax, 9", "jmp 0x1004", "ret"],
    )?;
    let function = Decompiler::new(X86_64, DecompilerConfig::default()).decompile(&input)?;

    let ops = function.ir.ops();
    let branch = ops
        .iter()
        .find(|op| op.opcode == OpCode::CBranch && op.address == 0x1004)
        .unwrap();
    let condition = branch.condition().unwrap();
    let test = ops.iter().find(|op| op.output == Some(condition)).unwrap();

    assert_eq!(test.opcode, OpCode::BoolXor);
    assert_eq!(
        test.inputs,
        vec![X86_64.register("sf").unwrap(), X86_64.register("of").unwrap()]
    );
    Ok(())
}

#[test]
fn test_unresolved_indirect_jump() -> Result<()> {
    let input = FunctionInput::from_listing(0x1000, 4, &["add r1, r1, 8", "jmp r1"])?;
    let function = generic().decompile(&input)?;

    assert_eq!(
        function
            .diagnostics
            .by_category(DiagnosticCategory::UnresolvedControlFlow)
            .len(),
        1
    );
    assert!(function.text.contains("goto *(r1);"));
    Ok(())
}

#[test]
fn test_presets_agree_on_small_functions() -> Result<()> {
    let input = FunctionInput::from_listing(
        0x1000,
        4,
        &["beqz r1, 0x1008", "mov r2, 1", "ret"],
    )?;

    let fast = Decompiler::new(Generic::default(), DecompilerConfig::fast()).decompile(&input)?;
    let thorough =
        Decompiler::new(Generic::default(), DecompilerConfig::thorough()).decompile(&input)?;
    assert_eq!(fast.text, thorough.text);
    assert_eq!(fast.structure, thorough.structure);
    Ok(())
}

#[test]
fn test_render_config_indent() -> Result<()> {
    let config = DecompilerConfig {
        render: RenderConfig {
            indent: 4,
            declare_locals: false,
            ..RenderConfig::default()
        },
        ..DecompilerConfig::default()
    };
    let input = FunctionInput::from_listing(0x1000, 4, &["mov r1, 1", "ret"])?;
    let function = Decompiler::new(Generic::default(), config).decompile(&input)?;

    assert_eq!(function.text, "void fn_1000(void)\n{\n    r1 = 1;\n    return;\n}\n");
    Ok(())
}

#[test]
fn test_decompile_all_in_parallel() {
    let inputs: Vec<FunctionInput> = (0..16u64)
        .map(|i| {
            let start = 0x1000 + i * 0x100;
            FunctionInput::from_listing(start, 4, &["mov r1, 1", "add r1, r1, r2", "ret"]).unwrap()
        })
        .chain(std::iter::once(FunctionInput::new(0x9000, Vec::new())))
        .collect();

    let results = generic().decompile_all(&inputs);
    assert_eq!(results.len(), 17);
    for (input, result) in inputs.iter().zip(&results).take(16) {
        let function = result.as_ref().unwrap();
        assert_eq!(function.start, input.start);
        assert!(function.text.starts_with(&format!("void fn_{:x}(void)", input.start)));
    }
    assert!(matches!(results[16], Err(Error::Empty)));
}
