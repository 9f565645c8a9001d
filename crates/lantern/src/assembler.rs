//! Textual assembler.
//!
//! A listing is line oriented:
//!
//! ```text
//! .argcount 0                 # directive: metadata of the current code object
//! LOAD_CONST @ 'hello'        # `@` operand, resolved by the opcode's operand kind
//! STORE_NAME @ greeting
//! loop:                       # label, counted in instruction slots
//! BUILD_TUPLE 0               # plain integer operand
//! POP_JUMP_IF_TRUE @ loop
//! LOAD_CONST@code: f          # nested code object, indented below
//!     .argcount 1
//!     LOAD_FAST @ x
//!     RETURN_VALUE
//! ```
//!
//! [`parse`] turns the text into a tree of [`Block`]s; [`assemble_block`]
//! linearizes a block into a [`CodeObject`].

use std::{fmt, rc::Rc, str::FromStr};

use crate::{
    bytecode::{BuildError, CodeBuilder, CodeFlags, CodeObject, CompareOp, CompilerFlag, Opcode, OperandKind},
    expressions::{ExprError, literal},
    value::Value,
};

/// Name given to the outermost code object unless a directive overrides it.
pub const MODULE_NAME: &str = "<module>";

/// A parsed code block: the top of a listing or a nested `@code:` body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    /// Name from the `@code:` header; `None` for the outermost block.
    pub name: Option<String>,
    /// 1-based line of the header, 0 for the outermost block.
    pub line: usize,
    pub items: Vec<Item>,
}

/// One line of a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Directive { name: String, value: String, line: usize },
    Label { name: String, line: usize },
    Instruction { opcode: Opcode, operand: Operand, line: usize },
}

/// The operand part of an instruction line.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand; encodes as 0.
    None,
    /// A plain integer, used as is.
    Raw(u32),
    /// Text after `@`, resolved according to the opcode.
    Symbolic(String),
    /// An indented nested block after `@code:`.
    Code(Block),
}

/// Assembly failure with the 1-based line it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembleError {
    pub line: usize,
    pub kind: AssembleErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssembleErrorKind {
    /// Indentation that does not open or close a block.
    UnexpectedIndent,
    Syntax(String),
    UnknownOpcode(String),
    UnknownDirective(String),
    InvalidDirectiveValue { directive: String, value: String },
    /// The operand cannot be used with this opcode.
    OperandMismatch { opcode: Opcode, operand: String },
    Literal(ExprError),
    Build(BuildError),
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: ", self.line)?;
        match &self.kind {
            AssembleErrorKind::UnexpectedIndent => f.write_str("unexpected indent"),
            AssembleErrorKind::Syntax(message) => write!(f, "invalid syntax: {message}"),
            AssembleErrorKind::UnknownOpcode(name) => write!(f, "unknown opcode '{name}'"),
            AssembleErrorKind::UnknownDirective(name) => write!(f, "unknown directive '.{name}'"),
            AssembleErrorKind::InvalidDirectiveValue { directive, value } => {
                write!(f, "invalid value for .{directive}: {value}")
            }
            AssembleErrorKind::OperandMismatch { opcode, operand } => {
                write!(f, "{opcode} cannot take operand {operand}")
            }
            AssembleErrorKind::Literal(err) => write!(f, "{err}"),
            AssembleErrorKind::Build(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AssembleError {}

fn error(line: usize, kind: AssembleErrorKind) -> AssembleError {
    AssembleError { line, kind }
}

/// Parses and assembles a listing.
pub fn assemble(source: &str, filename: &str) -> Result<CodeObject, AssembleError> {
    assemble_block(&parse(source)?, filename)
}

// ============================================================================
// Parsing
// ============================================================================

/// A non-blank line with its indentation width and comment removed.
struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
}

/// Parses a listing into a block tree.
pub fn parse(source: &str) -> Result<Block, AssembleError> {
    let mut lines = source
        .lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let text = strip_comment(raw).trim_end();
            let body = text.trim_start();
            (!body.is_empty()).then(|| Line {
                number: i + 1,
                indent: indent_width(text),
                text: body,
            })
        })
        .peekable();
    let indent = lines.peek().map_or(0, |line| line.indent);
    let mut root = Block::default();
    root.items = parse_items(&mut lines, indent)?;
    if let Some(line) = lines.next() {
        return Err(error(line.number, AssembleErrorKind::UnexpectedIndent));
    }
    Ok(root)
}

fn parse_items<'a>(
    lines: &mut std::iter::Peekable<impl Iterator<Item = Line<'a>>>,
    indent: usize,
) -> Result<Vec<Item>, AssembleError> {
    let mut items = Vec::new();
    while let Some(line) = lines.next_if(|line| line.indent >= indent) {
        if line.indent > indent {
            return Err(error(line.number, AssembleErrorKind::UnexpectedIndent));
        }
        let item = parse_line(&line)?;
        let item = match item {
            Item::Instruction {
                opcode,
                operand: Operand::Code(mut block),
                line: number,
            } => {
                if let Some(child_indent) = lines.peek().map(|next| next.indent).filter(|i| *i > indent) {
                    block.items = parse_items(lines, child_indent)?;
                }
                Item::Instruction {
                    opcode,
                    operand: Operand::Code(block),
                    line: number,
                }
            }
            other => other,
        };
        items.push(item);
    }
    Ok(items)
}

fn parse_line(line: &Line<'_>) -> Result<Item, AssembleError> {
    let number = line.number;
    let text = line.text;
    if let Some(rest) = text.strip_prefix('.') {
        let (name, value) = split_word(rest);
        if !is_identifier(name) {
            return Err(error(number, AssembleErrorKind::Syntax(format!("bad directive '{text}'"))));
        }
        return Ok(Item::Directive {
            name: name.to_owned(),
            value: value.to_owned(),
            line: number,
        });
    }
    if let Some(label) = text.strip_suffix(':').map(str::trim_end)
        && is_identifier(label)
    {
        return Ok(Item::Label {
            name: label.to_owned(),
            line: number,
        });
    }

    let mnemonic_end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    let (mnemonic, rest) = text.split_at(mnemonic_end);
    if mnemonic.is_empty() {
        return Err(error(number, AssembleErrorKind::Syntax(format!("expected an opcode in '{text}'"))));
    }
    let opcode = Opcode::from_str(mnemonic)
        .map_err(|_| error(number, AssembleErrorKind::UnknownOpcode(mnemonic.to_owned())))?;
    let rest = rest.trim();
    let operand = if rest.is_empty() {
        Operand::None
    } else if let Some(symbolic) = rest.strip_prefix('@') {
        let symbolic = symbolic.trim();
        match code_header(symbolic) {
            Some(name) if is_identifier(name) || name.starts_with('<') => Operand::Code(Block {
                name: Some(name.to_owned()),
                line: number,
                items: Vec::new(),
            }),
            Some(name) => {
                return Err(error(number, AssembleErrorKind::Syntax(format!("bad code block name '{name}'"))));
            }
            None => Operand::Symbolic(symbolic.to_owned()),
        }
    } else {
        Operand::Raw(raw_operand(rest).map_err(|kind| error(number, kind))?)
    };
    Ok(Item::Instruction {
        opcode,
        operand,
        line: number,
    })
}

/// The name in `code: name`, if `text` is a nested block header.
fn code_header(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("code")?.trim_start();
    Some(rest.strip_prefix(':')?.trim())
}

fn raw_operand(text: &str) -> Result<u32, AssembleErrorKind> {
    let value = literal(text).map_err(AssembleErrorKind::Literal)?;
    match value {
        Value::Int(n) if n >= 0 => u32::try_from(n).map_err(|_| too_large(text)),
        Value::Bool(b) => Ok(u32::from(b)),
        Value::LongInt(_) => Err(too_large(text)),
        other => Err(AssembleErrorKind::Syntax(format!(
            "operand must be a non-negative integer, not {}",
            other.repr()
        ))),
    }
}

fn too_large(text: &str) -> AssembleErrorKind {
    AssembleErrorKind::Syntax(format!("operand {text} is too large"))
}

fn split_word(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], text[end..].trim()),
        None => (text, ""),
    }
}

fn indent_width(text: &str) -> usize {
    text.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

/// Cuts a trailing `#` comment, ignoring `#` inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '#' => return &line[..i],
            None => {}
        }
    }
    line
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_') && chars.all(|c| c.is_alphanumeric() || c == '_')
}

// ============================================================================
// Linearization
// ============================================================================

/// Assembles a parsed block and every block nested in it.
pub fn assemble_block(block: &Block, filename: &str) -> Result<CodeObject, AssembleError> {
    let name = block.name.as_deref().unwrap_or(MODULE_NAME);
    let mut builder = CodeBuilder::new(filename, name);
    builder.parts_mut().firstlineno = u32::try_from(block.line.max(1)).unwrap_or(1);
    for item in &block.items {
        match item {
            Item::Directive { name, value, line } => apply_directive(&mut builder, name, value, *line)?,
            Item::Label { name, line } => builder
                .define_label(name)
                .map_err(|err| error(*line, AssembleErrorKind::Build(err)))?,
            Item::Instruction { opcode, operand, line } => {
                emit_instruction(&mut builder, *opcode, operand, filename, *line)?;
            }
        }
    }
    builder
        .finish()
        .map_err(|err| error(block.line, AssembleErrorKind::Build(err)))
}

fn emit_instruction(
    builder: &mut CodeBuilder,
    opcode: Opcode,
    operand: &Operand,
    filename: &str,
    line: usize,
) -> Result<(), AssembleError> {
    let build = |err| error(line, AssembleErrorKind::Build(err));
    let mismatch = |operand: String| error(line, AssembleErrorKind::OperandMismatch { opcode, operand });
    match (opcode.operand_kind(), operand) {
        (_, Operand::None) => builder.emit(opcode, 0).map_err(build),
        (_, Operand::Raw(arg)) => builder.emit(opcode, *arg).map_err(build),
        (OperandKind::Const, Operand::Code(block)) => {
            let code = Value::Code(Rc::new(assemble_block(block, filename)?));
            let identity = builder.identity_of(&code);
            builder.emit_const(opcode, code, identity).map_err(build)
        }
        (_, Operand::Code(block)) => Err(mismatch(format!("@code: {}", block.name.as_deref().unwrap_or("")))),
        (OperandKind::Const, Operand::Symbolic(text)) => {
            let value = literal(text).map_err(|err| error(line, AssembleErrorKind::Literal(err)))?;
            let identity = builder.identity_of(&value);
            builder.emit_const(opcode, value, identity).map_err(build)
        }
        (OperandKind::Name, Operand::Symbolic(text)) => {
            let name = symbol(text).ok_or_else(|| mismatch(format!("@ {text}")))?;
            builder.emit_name(opcode, &name).map_err(build)
        }
        (OperandKind::Local, Operand::Symbolic(text)) => {
            let name = symbol(text).ok_or_else(|| mismatch(format!("@ {text}")))?;
            builder.emit_local(opcode, &name).map_err(build)
        }
        (OperandKind::JumpAbsolute | OperandKind::JumpRelative, Operand::Symbolic(text)) => {
            if !is_identifier(text) {
                return Err(mismatch(format!("@ {text}")));
            }
            builder.emit_jump(opcode, text).map_err(build)
        }
        (OperandKind::Compare, Operand::Symbolic(text)) => {
            let op = CompareOp::from_symbol(text).ok_or_else(|| mismatch(format!("@ {text}")))?;
            builder.emit(opcode, op as u32).map_err(build)
        }
        (OperandKind::Count | OperandKind::None, Operand::Symbolic(text)) => Err(mismatch(format!("@ {text}"))),
    }
}

/// A name operand: a bare identifier or a string literal.
fn symbol(text: &str) -> Option<String> {
    if is_identifier(text) {
        return Some(text.to_owned());
    }
    match literal(text) {
        Ok(Value::Str(s)) => Some(s.to_string()),
        _ => None,
    }
}

fn apply_directive(builder: &mut CodeBuilder, name: &str, value: &str, line: usize) -> Result<(), AssembleError> {
    let invalid = || {
        error(
            line,
            AssembleErrorKind::InvalidDirectiveValue {
                directive: name.to_owned(),
                value: value.to_owned(),
            },
        )
    };
    let number = || match literal(value) {
        Ok(Value::Int(n)) => u32::try_from(n).map_err(|_| invalid()),
        _ => Err(invalid()),
    };
    let text = || match literal(value) {
        Ok(Value::Str(s)) => s.to_string(),
        _ => value.to_owned(),
    };
    let strings = || match literal(value).ok().and_then(|v| v.sequence_items()) {
        Some(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s.to_string()),
                _ => Err(invalid()),
            })
            .collect::<Result<Vec<_>, _>>(),
        None => Err(invalid()),
    };

    match name {
        "argcount" => builder.parts_mut().argcount = number()?,
        "posonlyargcount" => builder.parts_mut().posonlyargcount = number()?,
        "kwonlyargcount" => builder.parts_mut().kwonlyargcount = number()?,
        "nlocals" => builder.parts_mut().nlocals = number()?,
        "stacksize" => builder.parts_mut().stacksize = number()?,
        "firstlineno" => builder.parts_mut().firstlineno = number()?,
        "flags" => builder.set_flags(parse_flags(value).ok_or_else(invalid)?),
        "name" => builder.parts_mut().name = text(),
        "filename" => builder.parts_mut().filename = text(),
        "names" => builder.parts_mut().names = strings()?,
        "varnames" => builder.parts_mut().varnames = strings()?,
        "freevars" => builder.parts_mut().freevars = strings()?,
        "cellvars" => builder.parts_mut().cellvars = strings()?,
        "constants" => {
            let constants = literal(value).ok().and_then(|v| v.sequence_items()).ok_or_else(invalid)?;
            builder.set_constants(constants);
        }
        "linetable" => match literal(value) {
            Ok(Value::Bytes(bytes)) => builder.parts_mut().linetable = bytes.to_vec(),
            _ => return Err(invalid()),
        },
        _ => return Err(error(line, AssembleErrorKind::UnknownDirective(name.to_owned()))),
    }
    Ok(())
}

/// Parses `OPTIMIZED|NEWLOCALS|0x100`: flag names or integers joined by `|`.
pub fn parse_flags(text: &str) -> Option<CodeFlags> {
    text.split('|').try_fold(CodeFlags::default(), |flags, part| {
        let part = part.trim();
        if let Ok(flag) = CompilerFlag::from_str(part) {
            return Some(flags.with(flag));
        }
        match literal(part).ok()? {
            Value::Int(bits) => Some(CodeFlags(flags.0 | u32::try_from(bits).ok()?)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::NATIVE_VERSION;

    #[test]
    fn test_parse_tree() {
        let block = parse(
            "
            .argcount 0
            LOAD_CONST@code: f   # nested
                .argcount 1
                LOAD_FAST @ x
                RETURN_VALUE
            start:
            POP_TOP
            ",
        )
        .unwrap();
        assert_eq!(block.items.len(), 4);
        let Item::Instruction {
            operand: Operand::Code(nested),
            ..
        } = &block.items[1]
        else {
            panic!("expected a nested block");
        };
        assert_eq!(nested.name.as_deref(), Some("f"));
        assert_eq!(nested.items.len(), 3);
        assert!(matches!(&block.items[2], Item::Label { name, .. } if name == "start"));
    }

    #[test]
    fn test_unexpected_indent() {
        let err = parse("NOP\n    NOP\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.kind, AssembleErrorKind::UnexpectedIndent);

        let err = parse("LOAD_CONST@code: f\n        NOP\n    NOP\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_comment_inside_string_is_kept() {
        let code = assemble("LOAD_CONST @ '# not a comment'  # comment\n", "<test>").unwrap();
        assert_eq!(code.constants(), &[Value::str("# not a comment")]);
    }

    #[test]
    fn test_operand_resolution() {
        let code = assemble(
            "
            LOAD_NAME @ x
            LOAD_CONST @ (1, 'a')
            COMPARE_OP @ not in
            STORE_FAST @ 'y'
            BUILD_TUPLE 2
            ",
            "<test>",
        )
        .unwrap();
        assert_eq!(code.names(), &["x".to_owned()]);
        assert_eq!(code.varnames(), &["y".to_owned()]);
        let args: Vec<u32> = code.instructions(NATIVE_VERSION).map(|i| i.arg).collect();
        assert_eq!(args, vec![0, 0, CompareOp::NotIn as u32, 0, 2]);
    }

    #[test]
    fn test_nested_code_constant() {
        let code = assemble(
            "
            LOAD_CONST@code: add
                .argcount 2
                .varnames ('a', 'b')
                .flags OPTIMIZED|NEWLOCALS
                LOAD_FAST 0
                LOAD_FAST 1
                BINARY_ADD
                RETURN_VALUE
            LOAD_CONST @ 'add'
            MAKE_FUNCTION 0
            ",
            "demo.pys",
        )
        .unwrap();
        let Value::Code(add) = &code.constants()[0] else {
            panic!("expected a code constant");
        };
        assert_eq!(add.name(), "add");
        assert_eq!(add.filename(), "demo.pys");
        assert_eq!(add.argcount(), 2);
        assert_eq!(add.nlocals(), 2);
        assert!(add.flags().contains(CompilerFlag::Newlocals));
        assert_eq!(code.constants()[1], Value::str("add"));
    }

    #[test]
    fn test_errors_carry_lines() {
        let err = assemble("NOP\nFROB 1\n", "<test>").unwrap_err();
        assert_eq!(err, error(2, AssembleErrorKind::UnknownOpcode("FROB".to_owned())));
        let err = assemble(".bogus 1\n", "<test>").unwrap_err();
        assert_eq!(err.kind, AssembleErrorKind::UnknownDirective("bogus".to_owned()));
        let err = assemble("BUILD_TUPLE @ x\n", "<test>").unwrap_err();
        assert!(matches!(err.kind, AssembleErrorKind::OperandMismatch { .. }));
        let err = assemble("BUILD_TUPLE 300\n", "<test>").unwrap_err();
        assert!(matches!(err.kind, AssembleErrorKind::Build(BuildError::OperandTooLarge { .. })));
        let err = assemble("LOAD_CONST 0\n", "<test>").unwrap_err();
        assert!(matches!(err.kind, AssembleErrorKind::Build(BuildError::Invalid(_))));
    }

    #[test]
    fn test_flags_directive() {
        assert_eq!(
            parse_flags("OPTIMIZED | 0x40000000"),
            Some(CodeFlags(CompilerFlag::Optimized.bit() | 0x4000_0000))
        );
        assert_eq!(parse_flags("NOT_A_FLAG"), None);
    }
}
