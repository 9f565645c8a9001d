//! Listing syntax, operand resolution and error reporting of the assembler.

use lantern::{
    AssembleErrorKind, CodeFlags, CompareOp, NATIVE_VERSION, Opcode, Value, assemble,
    bytecode::{BuildError, CompilerFlag},
};
use pretty_assertions::assert_eq;

fn ops(source: &str) -> Vec<(Opcode, u32)> {
    let code = assemble(source, "<test>").unwrap();
    code.instructions(NATIVE_VERSION)
        .map(|i| (i.opcode.expect("assembler only emits known opcodes"), i.arg))
        .collect()
}

#[test]
fn defaults_for_a_bare_listing() {
    let code = assemble("NOP\n", "prog.pys").unwrap();
    assert_eq!(code.name(), "<module>");
    assert_eq!(code.filename(), "prog.pys");
    assert_eq!(code.firstlineno(), 1);
    assert_eq!(code.argcount(), 0);
    assert_eq!(code.flags(), CodeFlags::default());
    assert_eq!(code.bytecode(), &[Opcode::Nop as u8, 0]);
}

#[test]
fn blank_lines_and_comments_are_ignored() {
    let source = "
        # setup
        LOAD_CONST @ 1     # one

        POP_TOP
    ";
    assert_eq!(ops(source), vec![(Opcode::LoadConst, 0), (Opcode::PopTop, 0)]);
}

/// Constants share a slot only when they would be the same object: small
/// ints do, separately written strings do not. Names and locals pool per table.
#[test]
fn operands_are_pooled() {
    let source = "
        LOAD_CONST @ 'a'
        LOAD_CONST @ 2
        LOAD_CONST @ 'a'
        LOAD_CONST @ 2
        STORE_NAME @ x
        LOAD_NAME @ x
        STORE_FAST @ x
        LOAD_GLOBAL @ y
    ";
    let code = assemble(source, "<test>").unwrap();
    assert_eq!(code.constants(), &[Value::str("a"), Value::Int(2), Value::str("a")]);
    assert_eq!(code.names(), &["x".to_owned(), "y".to_owned()]);
    assert_eq!(code.varnames(), &["x".to_owned()]);
    let args: Vec<u32> = code.instructions(NATIVE_VERSION).map(|i| i.arg).collect();
    assert_eq!(args, vec![0, 1, 2, 1, 0, 0, 0, 1]);
}

/// `1` and `True` compare equal but must stay distinct constants.
#[test]
fn equal_constants_of_different_types_stay_apart() {
    let code = assemble("LOAD_CONST @ 1\nLOAD_CONST @ True\nLOAD_CONST @ 1.0\n", "<test>").unwrap();
    assert_eq!(code.constants().len(), 3);
    assert_eq!(code.constants()[1].type_name(), "bool");
}

#[test]
fn literal_forms() {
    let code = assemble(
        "
        LOAD_CONST @ 0x10
        LOAD_CONST @ -2.5
        LOAD_CONST @ 1+2j
        LOAD_CONST @ b'\\x00'
        LOAD_CONST @ ((1, 2), [None])
        LOAD_CONST @ 123456789012345678901234567890
        LOAD_CONST @ ...
        ",
        "<test>",
    )
    .unwrap();
    let reprs: Vec<String> = code.constants().iter().map(Value::repr).collect();
    assert_eq!(
        reprs,
        vec![
            "16",
            "-2.5",
            "(1+2j)",
            "b'\\x00'",
            "((1, 2), [None])",
            "123456789012345678901234567890",
            "Ellipsis"
        ]
    );
}

#[test]
fn comparison_symbols() {
    assert_eq!(
        ops("COMPARE_OP @ ==\nCOMPARE_OP @ is not\nCOMPARE_OP 4\n"),
        vec![
            (Opcode::CompareOp, CompareOp::Eq as u32),
            (Opcode::CompareOp, CompareOp::IsNot as u32),
            (Opcode::CompareOp, 4),
        ]
    );
}

/// Absolute jumps count instruction slots at the native version.
#[test]
fn labels_resolve_forward_and_backward() {
    assert_eq!(
        ops("top:\nNOP\nJUMP_FORWARD @ end\nJUMP_ABSOLUTE @ top\nend:\nNOP\n"),
        vec![
            (Opcode::Nop, 0),
            (Opcode::JumpForward, 1),
            (Opcode::JumpAbsolute, 0),
            (Opcode::Nop, 0),
        ]
    );
}

#[test]
fn label_errors() {
    let err = assemble("JUMP_ABSOLUTE @ nowhere\n", "<test>").unwrap_err();
    assert_eq!(
        err.kind,
        AssembleErrorKind::Build(BuildError::UndefinedLabel("nowhere".to_owned()))
    );
    let err = assemble("a:\nNOP\na:\nNOP\n", "<test>").unwrap_err();
    assert_eq!(err.kind, AssembleErrorKind::Build(BuildError::DuplicateLabel("a".to_owned())));
    let err = assemble("back:\nNOP\nJUMP_FORWARD @ back\n", "<test>").unwrap_err();
    assert!(matches!(
        err.kind,
        AssembleErrorKind::Build(BuildError::BackwardRelativeJump { .. })
    ));
}

#[test]
fn directives_set_code_fields() {
    let code = assemble(
        "
        .name 'compute'
        .firstlineno 12
        .argcount 2
        .kwonlyargcount 1
        .stacksize 4
        .flags OPTIMIZED|NEWLOCALS|VARARGS
        .varnames ('a', 'b', 'k', 'rest')
        .linetable b'\\x02\\x01'
        NOP
        ",
        "<test>",
    )
    .unwrap();
    assert_eq!(code.name(), "compute");
    assert_eq!(code.firstlineno(), 12);
    assert_eq!(code.argcount(), 2);
    assert_eq!(code.kwonlyargcount(), 1);
    assert_eq!(code.stacksize(), 4);
    assert!(code.flags().contains(CompilerFlag::Varargs));
    assert_eq!(code.varnames().len(), 4);
    assert_eq!(code.linetable(), &[2, 1]);
}

#[test]
fn nested_blocks_nest_twice() {
    let code = assemble(
        "
        LOAD_CONST@code: outer
            LOAD_CONST@code: inner
                LOAD_CONST @ 'deep'
                RETURN_VALUE
            RETURN_VALUE
        POP_TOP
        ",
        "nest.pys",
    )
    .unwrap();
    let Value::Code(outer) = &code.constants()[0] else {
        panic!("expected outer code");
    };
    let Value::Code(inner) = &outer.constants()[0] else {
        panic!("expected inner code");
    };
    assert_eq!(outer.name(), "outer");
    assert_eq!(inner.name(), "inner");
    assert_eq!(inner.filename(), "nest.pys");
    assert_eq!(inner.constants(), &[Value::str("deep")]);
    assert_eq!(inner.firstlineno(), 3);
}

#[test]
fn errors_point_at_their_line() {
    let cases: &[(&str, usize)] = &[
        ("NOP\nNOP\nFROBNICATE\n", 3),
        ("NOP\n.nope 1\n", 2),
        (".argcount many\n", 1),
        ("NOP\n  NOP\n", 2),
        ("LOAD_CONST @ (1,\n", 1),
        ("NOP @ 1\n", 1),
    ];
    for (source, line) in cases {
        let err = assemble(source, "<test>").unwrap_err();
        assert_eq!(err.line, *line, "{source:?}: {err}");
        assert!(err.to_string().starts_with(&format!("line {line}: ")));
    }
}
