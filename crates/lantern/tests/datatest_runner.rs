use std::{error::Error, fs, path::Path};

use lantern::{Debugger, Fault, FaultCause, Value, disassemble::format_fault};
use pretty_assertions::assert_eq;

/// Expected outcome of running a listing, parsed from its last line.
#[derive(Debug, Clone)]
enum Expectation {
    /// Execution runs off the end with this stack, as reprs in a list.
    Stack(String),
    /// Execution pauses on this fault, rendered as the CLI shows it.
    Fault(String),
    /// The listing fails to assemble with this message.
    AssembleError(String),
}

/// Parses a fixture into its listing, expectation and stepping mode.
///
/// The last line must be one of:
/// - `# Stack=[1, 'a']`
/// - `# Fault=[- paused -] 0x00000004 (...)`
/// - `# AssembleError=line 3: ...`
///
/// A first line of `# mode: safe` runs without permission for unsafe opcodes.
fn parse_fixture(content: &str) -> (String, Expectation, bool) {
    let lines: Vec<&str> = content.lines().collect();
    let safe = lines.first().is_some_and(|line| line.trim() == "# mode: safe");
    let (last, body) = lines.split_last().expect("fixture must not be empty");
    let expectation = if let Some(expected) = last.strip_prefix("# Stack=") {
        Expectation::Stack(expected.to_owned())
    } else if let Some(expected) = last.strip_prefix("# Fault=") {
        Expectation::Fault(expected.to_owned())
    } else if let Some(expected) = last.strip_prefix("# AssembleError=") {
        Expectation::AssembleError(expected.to_owned())
    } else {
        panic!("last line must be an expectation comment, found {last:?}");
    };
    (body.join("\n"), expectation, safe)
}

fn run_to_pause(dbg: &mut Debugger, allow_unsafe: bool) -> Fault {
    loop {
        if let Err(fault) = dbg.cont(allow_unsafe) {
            return fault;
        }
    }
}

fn run_test(path: &Path, source: &str, expectation: Expectation, safe: bool) {
    let test_name = path.display();
    let mut dbg = match Debugger::from_assembly(source, &path.to_string_lossy()) {
        Ok(dbg) => dbg,
        Err(err) => {
            let Expectation::AssembleError(expected) = expectation else {
                panic!("[{test_name}] unexpected assembly error: {err}");
            };
            assert_eq!(err.to_string(), format!("assembly failed: {expected}"), "[{test_name}]");
            return;
        }
    };
    let fault = run_to_pause(&mut dbg, !safe);
    match expectation {
        Expectation::Stack(expected) => {
            assert!(
                matches!(
                    fault,
                    Fault::Unresolvable {
                        cause: FaultCause::EndOfCode,
                        ..
                    }
                ),
                "[{test_name}] expected to run to the end, paused with {}",
                format_fault(&fault)
            );
            let items: Vec<String> = dbg.current().stack().iter().map(Value::repr).collect();
            assert_eq!(format!("[{}]", items.join(", ")), expected, "[{test_name}] stack mismatch");
        }
        Expectation::Fault(expected) => {
            assert_eq!(format_fault(&fault), expected, "[{test_name}] fault mismatch");
        }
        Expectation::AssembleError(expected) => {
            panic!("[{test_name}] expected assembly error {expected:?}, but the listing assembled");
        }
    }
}

fn run_asm_case(path: &Path) -> Result<(), Box<dyn Error>> {
    let content = fs::read_to_string(path)?;
    let (source, expectation, safe) = parse_fixture(&content);
    run_test(path, &source, expectation, safe);
    Ok(())
}

datatest_stable::harness!(run_asm_case, "tests/asm_cases", r"^.*\.pys$");
