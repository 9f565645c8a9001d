//! Read-only rendering of code objects and debugger state.
//!
//! Nothing here affects execution; the CLI prints these strings and the
//! round-trip tests compare them.

use std::fmt::Write;

use ahash::AHashMap;

use crate::{
    assembler::MODULE_NAME,
    bytecode::{CodeFlags, CodeObject, CompareOp, CompilerFlag, Instruction, OperandKind},
    expressions::Condition,
    fault::{Fault, FaultCause},
    value::{Value, float_repr},
    version::Version,
};

/// Nesting depth at which [`format_const`] elides the rest.
const MAX_CONST_DEPTH: usize = 8;

/// Short display form of a constant. Code objects are summarized.
#[must_use]
pub fn format_const(value: &Value) -> String {
    let mut out = String::new();
    write_const(&mut out, value, 0);
    out
}

fn write_const(out: &mut String, value: &Value, depth: usize) {
    if depth >= MAX_CONST_DEPTH {
        out.push('…');
        return;
    }
    match value {
        Value::Tuple(items) => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_const(out, item, depth + 1);
            }
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Code(code) => {
            let _ = write!(
                out,
                "<code {} ({} bytes, {} consts, {} names)>",
                code.name(),
                code.bytecode().len(),
                code.constants().len(),
                code.names().len() + code.varnames().len()
            );
        }
        Value::Function(function) => {
            let _ = write!(out, "<function {}>", function.name);
        }
        Value::Builtin(builtin) => {
            let _ = write!(out, "<built-in function {builtin}>");
        }
        other => out.push_str(&other.repr()),
    }
}

/// Byte offset a jump instruction lands on.
#[must_use]
pub fn jump_target(code: &CodeObject, instruction: &Instruction, version: Version) -> Option<usize> {
    let opcode = instruction.opcode?;
    let unit = if version.jumps_by_instruction() { 2 } else { 1 };
    let delta = instruction.arg as usize * unit;
    match opcode.operand_kind() {
        OperandKind::JumpAbsolute => Some(delta),
        OperandKind::JumpRelative => Some(code.next_offset(instruction.offset, version) + delta),
        _ => None,
    }
}

/// One instruction: raw bytes, mnemonic and the resolved operand.
///
/// `mark` is a three character gutter (current position, breakpoints).
#[must_use]
pub fn format_instruction(code: &CodeObject, instruction: &Instruction, version: Version, mark: &str) -> String {
    let end = code.next_offset(instruction.offset, version).min(code.bytecode().len());
    let raw: Vec<String> = code.bytecode()[instruction.offset..end]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    let mut out = format!("[{mark}0x{}]", raw.join("_"));
    let Some(opcode) = instruction.opcode else {
        let _ = write!(out, " <unknown opcode {}>", instruction.byte);
        return out;
    };
    let _ = write!(out, " {opcode}");
    let arg = instruction.arg as usize;
    let annotation = match opcode.operand_kind() {
        OperandKind::None => None,
        OperandKind::Const => code.constants().get(arg).map(format_const),
        OperandKind::Name => code.names().get(arg).cloned(),
        OperandKind::Local => code.varnames().get(arg).cloned(),
        OperandKind::JumpAbsolute => jump_target(code, instruction, version).map(|target| format!("0x{target:08x}")),
        OperandKind::JumpRelative => {
            let unit = if version.jumps_by_instruction() { 2 } else { 1 };
            Some(format!("+ 0x{:08x}", arg * unit))
        }
        OperandKind::Compare => CompareOp::from_operand(instruction.arg).map(|op| op.symbol().to_owned()),
        OperandKind::Count => Some(arg.to_string()),
    };
    if let Some(annotation) = annotation {
        let _ = write!(out, " @ {annotation}");
    }
    out
}

/// A numbered listing of every instruction, marking the counter with `*`
/// and breakpoints with `o`.
#[must_use]
pub fn format_listing(
    code: &CodeObject,
    version: Version,
    counter: Option<usize>,
    breakpoints: &AHashMap<usize, Option<Condition>>,
) -> String {
    let mut out = String::new();
    for instruction in code.instructions(version) {
        let mark = if Some(instruction.offset) == counter {
            " * "
        } else {
            match breakpoints.get(&instruction.offset) {
                Some(Some(_)) => " ? ",
                Some(None) => " o ",
                None => "   ",
            }
        };
        let _ = writeln!(
            out,
            "[0x{:08x}]: {}",
            instruction.offset,
            format_instruction(code, &instruction, version, mark)
        );
    }
    out
}

/// Flag names joined by `|`, with unnamed bits as `UNKNOWN (1 << n)`.
#[must_use]
pub fn format_code_flags(flags: CodeFlags) -> String {
    let mut parts: Vec<(u32, String)> = flags.known().map(|flag| (flag.bit(), flag.to_string())).collect();
    parts.extend(
        flags
            .unknown_bits()
            .map(|bit| (1 << bit, format!("UNKNOWN (1 << {bit})"))),
    );
    if parts.is_empty() {
        return "0".to_owned();
    }
    parts.sort_by_key(|(bit, _)| *bit);
    parts.into_iter().map(|(_, name)| name).collect::<Vec<_>>().join(" | ")
}

/// Right-aligned key/value table; multi-line values continue under the value column.
#[must_use]
pub fn format_table(rows: &[(&str, String)]) -> String {
    let mut out = String::new();
    for (key, value) in rows {
        let mut prefix = format!("{key:>12}: ");
        for line in value.lines() {
            out.push_str(&prefix);
            out.push_str(line);
            out.push('\n');
            prefix = " ".repeat(14);
        }
    }
    out.trim_end().to_owned()
}

/// Metadata, name tables and constants of a code object.
#[must_use]
pub fn format_code_info(code: &CodeObject, version: Version) -> String {
    let location = format!("{} @ {}:{}", code.name(), code.filename(), code.firstlineno());
    let consts: Vec<String> = code.constants().iter().map(format_const).collect();
    [
        format!("{:^26}", "-- code --"),
        format_table(&[
            ("location", location),
            (
                "arguments",
                format!(
                    "{} ({} positional-only, {} keyword-only)",
                    code.argcount(),
                    code.posonlyargcount(),
                    code.kwonlyargcount()
                ),
            ),
            ("stack size", code.stacksize().to_string()),
            ("flags", format_code_flags(code.flags())),
        ]),
        format_table(&[
            ("names", code.names().join("\n")),
            ("varnames", code.varnames().join("\n")),
            ("freevars", code.freevars().join("\n")),
            ("cellvars", code.cellvars().join("\n")),
        ]),
        format_table(&[("consts", consts.join("\n"))]),
        format!("{:^26}", "-- vm --"),
        format_table(&[("version", version.to_string())]),
    ]
    .into_iter()
    .filter(|section| !section.is_empty())
    .collect::<Vec<_>>()
    .join("\n")
}

/// One line describing why execution paused.
#[must_use]
pub fn format_fault(fault: &Fault) -> String {
    let reason = match fault {
        Fault::UnsafeOperation { opcode, .. } => format!("unsafe {opcode}"),
        Fault::Interrupted { .. } => "interrupted".to_owned(),
        Fault::Unresolvable { cause, .. } => match fault.exception() {
            Some(exc) => exc.to_string(),
            None => match cause {
                FaultCause::Nested(inner) => format!("in call: {}", format_fault(inner)),
                other => other.to_string(),
            },
        },
    };
    format!("[- paused -] 0x{:08x} ({reason})", fault.address())
}

// ============================================================================
// Code object to assembler listing
// ============================================================================

/// Why a code object has no listing form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unrepresentable {
    /// A byte outside the supported opcode subset.
    UnknownOpcode { offset: usize, byte: u8 },
    /// A constant with no literal syntax (`nan`, frozensets, classes).
    Constant { offset: usize, repr: String },
    /// A jump into the middle of an instruction or past the end.
    JumpTarget { offset: usize, target: usize },
}

impl std::fmt::Display for Unrepresentable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOpcode { offset, byte } => write!(f, "unknown opcode {byte} at offset {offset}"),
            Self::Constant { offset, repr } => write!(f, "constant {repr} at offset {offset} has no literal form"),
            Self::JumpTarget { offset, target } => {
                write!(f, "jump at offset {offset} targets {target}, which is not an instruction")
            }
        }
    }
}

impl std::error::Error for Unrepresentable {}

/// Renders `code` as assembler input.
///
/// Re-assembling the listing gives the same instruction sequence with the
/// same resolved operands. Constant pool layout may differ: constants are
/// pooled again as the listing is assembled.
pub fn to_assembly(code: &CodeObject, version: Version) -> Result<String, Unrepresentable> {
    let mut out = String::new();
    write_block(&mut out, code, version, 0, None)?;
    Ok(out)
}

fn write_block(
    out: &mut String,
    code: &CodeObject,
    version: Version,
    indent: usize,
    parent_filename: Option<&str>,
) -> Result<(), Unrepresentable> {
    let pad = " ".repeat(indent);
    let mut directive = |name: &str, value: String| {
        let _ = writeln!(out, "{pad}.{name} {value}");
    };
    if parent_filename.is_none() && code.name() != MODULE_NAME {
        directive("name", Value::str(code.name()).repr());
    } else if parent_filename.is_some() && !is_plain_block_name(code.name()) {
        directive("name", Value::str(code.name()).repr());
    }
    if parent_filename != Some(code.filename()) {
        directive("filename", Value::str(code.filename()).repr());
    }
    directive("firstlineno", code.firstlineno().to_string());
    for (name, value) in [
        ("argcount", code.argcount()),
        ("posonlyargcount", code.posonlyargcount()),
        ("kwonlyargcount", code.kwonlyargcount()),
        ("stacksize", code.stacksize()),
    ] {
        if value != 0 {
            directive(name, value.to_string());
        }
    }
    if code.nlocals() as usize != code.varnames().len() {
        directive("nlocals", code.nlocals().to_string());
    }
    if code.flags() != CodeFlags::default() {
        let names: Vec<String> = code
            .flags()
            .known()
            .map(|flag: CompilerFlag| flag.to_string())
            .chain(code.flags().unknown_bits().map(|bit| format!("0x{:x}", 1u32 << bit)))
            .collect();
        directive("flags", names.join("|"));
    }
    for (name, table) in [
        ("names", code.names()),
        ("varnames", code.varnames()),
        ("freevars", code.freevars()),
        ("cellvars", code.cellvars()),
    ] {
        if !table.is_empty() {
            directive(name, string_tuple(table));
        }
    }
    if !code.linetable().is_empty() {
        directive("linetable", Value::bytes(code.linetable()).repr());
    }

    let instructions: Vec<Instruction> = code.instructions(version).collect();
    let labels = jump_labels(code, &instructions, version)?;
    for instruction in &instructions {
        if let Some(label) = labels.get(&instruction.offset) {
            let _ = writeln!(out, "{pad}{label}:");
        }
        let offset = instruction.offset;
        let Some(opcode) = instruction.opcode else {
            return Err(Unrepresentable::UnknownOpcode {
                offset,
                byte: instruction.byte,
            });
        };
        let arg = instruction.arg as usize;
        match opcode.operand_kind() {
            OperandKind::None => {
                let _ = writeln!(out, "{pad}{opcode}");
            }
            OperandKind::Const => match &code.constants()[arg] {
                Value::Code(nested) => {
                    let _ = writeln!(out, "{pad}{opcode}@code: {}", block_name(nested.name()));
                    write_block(out, nested, version, indent + 4, Some(code.filename()))?;
                }
                value => {
                    let literal = literal_source(value).ok_or_else(|| Unrepresentable::Constant {
                        offset,
                        repr: value.repr(),
                    })?;
                    let _ = writeln!(out, "{pad}{opcode} @ {literal}");
                }
            },
            OperandKind::Name => {
                let _ = writeln!(out, "{pad}{opcode} @ {}", symbol(&code.names()[arg]));
            }
            OperandKind::Local => {
                let _ = writeln!(out, "{pad}{opcode} @ {}", symbol(&code.varnames()[arg]));
            }
            OperandKind::JumpAbsolute | OperandKind::JumpRelative => {
                let target = jump_target(code, instruction, version).unwrap_or_default();
                let label = &labels[&target];
                let _ = writeln!(out, "{pad}{opcode} @ {label}");
            }
            OperandKind::Compare => match CompareOp::from_operand(instruction.arg) {
                Some(op) => {
                    let _ = writeln!(out, "{pad}{opcode} @ {}", op.symbol());
                }
                None => {
                    let _ = writeln!(out, "{pad}{opcode} {arg}");
                }
            },
            OperandKind::Count => {
                let _ = writeln!(out, "{pad}{opcode} {arg}");
            }
        }
    }
    let end = code.bytecode().len();
    if let Some(label) = labels.get(&end) {
        let _ = writeln!(out, "{pad}{label}:");
    }
    Ok(())
}

/// Names every jump target `L0`, `L1`, ... in address order.
fn jump_labels(
    code: &CodeObject,
    instructions: &[Instruction],
    version: Version,
) -> Result<AHashMap<usize, String>, Unrepresentable> {
    let end = code.bytecode().len();
    let mut targets = Vec::new();
    for instruction in instructions {
        if let Some(target) = jump_target(code, instruction, version) {
            let on_boundary = target == end || instructions.iter().any(|i| i.offset == target);
            if !on_boundary {
                return Err(Unrepresentable::JumpTarget {
                    offset: instruction.offset,
                    target,
                });
            }
            targets.push(target);
        }
    }
    targets.sort_unstable();
    targets.dedup();
    Ok(targets
        .into_iter()
        .enumerate()
        .map(|(i, target)| (target, format!("L{i}")))
        .collect())
}

/// Source text that the assembler parses back into an equal constant.
#[must_use]
pub fn literal_source(value: &Value) -> Option<String> {
    match value {
        Value::None | Value::Bool(_) | Value::Int(_) | Value::LongInt(_) | Value::Str(_) | Value::Bytes(_) => {
            Some(value.repr())
        }
        Value::Ellipsis => Some("...".to_owned()),
        Value::Float(f) if f.is_nan() => None,
        Value::Float(f) if f.is_infinite() => Some(if *f > 0.0 { "1e999" } else { "-1e999" }.to_owned()),
        Value::Float(f) => Some(float_repr(*f)),
        Value::Complex { re, im } => (re.is_finite() && im.is_finite()).then(|| value.repr()),
        Value::Tuple(items) => {
            let items = items.iter().map(literal_source).collect::<Option<Vec<_>>>()?;
            Some(match items.as_slice() {
                [single] => format!("({single},)"),
                _ => format!("({})", items.join(", ")),
            })
        }
        Value::List(items) => {
            let items = items.borrow().iter().map(literal_source).collect::<Option<Vec<_>>>()?;
            Some(format!("[{}]", items.join(", ")))
        }
        Value::StopIteration | Value::FrozenSet(_) | Value::Code(_) | Value::Function(_) | Value::Builtin(_) => None,
    }
}

fn string_tuple(table: &[String]) -> String {
    literal_source(&Value::tuple(table.iter().map(|s| Value::str(s)).collect())).unwrap_or_default()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_') && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Whether `name` can appear after `@code:` and be read back unchanged.
fn is_plain_block_name(name: &str) -> bool {
    is_identifier(name) || (name.starts_with('<') && !name.contains(char::is_whitespace))
}

fn block_name(name: &str) -> &str {
    if is_plain_block_name(name) { name } else { "_" }
}

fn symbol(name: &str) -> String {
    if is_identifier(name) {
        name.to_owned()
    } else {
        Value::str(name).repr()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{assembler::assemble, version::NATIVE_VERSION};

    #[test]
    fn test_format_const() {
        assert_eq!(format_const(&Value::tuple(vec![Value::Int(1)])), "(1,)");
        assert_eq!(
            format_const(&Value::tuple(vec![Value::str("a"), Value::None])),
            "('a', None)"
        );
        let mut deep = Value::Int(0);
        for _ in 0..10 {
            deep = Value::tuple(vec![deep]);
        }
        assert!(format_const(&deep).contains('…'));
    }

    #[test]
    fn test_format_code_flags() {
        assert_eq!(format_code_flags(CodeFlags(0)), "0");
        assert_eq!(format_code_flags(CodeFlags(0x3)), "OPTIMIZED | NEWLOCALS");
        assert_eq!(format_code_flags(CodeFlags(0x1 | 1 << 30)), "OPTIMIZED | UNKNOWN (1 << 30)");
    }

    #[test]
    fn test_format_instruction() {
        let code = assemble(
            "LOAD_CONST @ 'x'\nSTORE_NAME @ y\nstart:\nJUMP_ABSOLUTE @ start\nCOMPARE_OP @ >=\n",
            "<test>",
        )
        .unwrap();
        let lines: Vec<String> = code
            .instructions(NATIVE_VERSION)
            .map(|i| format_instruction(&code, &i, NATIVE_VERSION, "   "))
            .collect();
        assert_eq!(
            lines,
            vec![
                "[   0x64_00] LOAD_CONST @ 'x'",
                "[   0x5a_00] STORE_NAME @ y",
                "[   0x71_02] JUMP_ABSOLUTE @ 0x00000004",
                "[   0x6b_05] COMPARE_OP @ >=",
            ]
        );
    }

    #[test]
    fn test_literal_source() {
        assert_eq!(literal_source(&Value::Float(f64::INFINITY)).as_deref(), Some("1e999"));
        assert_eq!(literal_source(&Value::Float(f64::NAN)), None);
        assert_eq!(literal_source(&Value::Ellipsis).as_deref(), Some("..."));
        assert_eq!(
            literal_source(&Value::Complex { re: 1.0, im: -2.0 }).as_deref(),
            Some("(1-2j)")
        );
        assert_eq!(literal_source(&Value::FrozenSet(Rc::from(vec![]))), None);
    }

    #[test]
    fn test_to_assembly_reassembles() {
        let source = "
            .varnames ('n',)
            LOAD_CONST@code: double
                .argcount 1
                .varnames ('x',)
                LOAD_FAST @ x
                LOAD_CONST @ 2
                BINARY_MULTIPLY
                RETURN_VALUE
            LOAD_CONST @ 'double'
            MAKE_FUNCTION 0
            STORE_NAME @ double
            top:
            LOAD_NAME @ n
            POP_JUMP_IF_FALSE @ done
            JUMP_FORWARD @ top_again
            top_again:
            JUMP_ABSOLUTE @ top
            done:
            LOAD_CONST @ (1.5, -0.0, b'\\x00')
            POP_TOP
        ";
        let code = assemble(source, "demo.pys").unwrap();
        let listing = to_assembly(&code, NATIVE_VERSION).unwrap();
        let again = assemble(&listing, "demo.pys").unwrap();

        let render = |code: &CodeObject| -> Vec<String> {
            code.instructions(NATIVE_VERSION)
                .map(|i| format_instruction(code, &i, NATIVE_VERSION, ""))
                .collect()
        };
        assert_eq!(render(&again), render(&code));
        assert_eq!(again.varnames(), code.varnames());
        let (Value::Code(a), Value::Code(b)) = (&again.constants()[0], &code.constants()[0]) else {
            panic!("expected nested code objects");
        };
        assert_eq!(a.name(), "double");
        assert_eq!(render(a), render(b));
        assert_eq!(a.argcount(), 1);
    }

    #[test]
    fn test_to_assembly_rejects_nan() {
        let code = assemble("LOAD_CONST @ 1.0\n", "<test>").unwrap();
        let mut parts = code.to_parts();
        parts.constants = vec![Value::Float(f64::NAN)];
        let code = parts.build(NATIVE_VERSION).unwrap();
        assert!(matches!(
            to_assembly(&code, NATIVE_VERSION),
            Err(Unrepresentable::Constant { offset: 0, .. })
        ));
    }
}
