//! Rendering of listings, code info and faults for a live session.

use lantern::{
    Debugger, Value,
    disassemble::{format_code_info, format_fault, format_listing, to_assembly},
};
use pretty_assertions::assert_eq;

fn listing(dbg: &Debugger) -> String {
    let frame = dbg.current();
    format_listing(frame.code(), frame.version(), Some(frame.counter()), frame.breakpoints())
}

#[test]
fn listing_marks_counter_and_breakpoints() {
    let mut dbg = Debugger::from_assembly("LOAD_CONST @ 1\nSTORE_NAME @ x\nLOAD_NAME @ x\n", "<test>").unwrap();
    dbg.toggle_breakpoint(0, None).unwrap();
    dbg.toggle_breakpoint(4, Some("x > 0")).unwrap();
    dbg.step(1, false).unwrap();
    assert_eq!(
        listing(&dbg),
        "[0x00000000]: [ o 0x64_00] LOAD_CONST @ 1\n\
         [0x00000002]: [ * 0x5a_00] STORE_NAME @ x\n\
         [0x00000004]: [ ? 0x65_00] LOAD_NAME @ x\n"
    );
}

#[test]
fn faults_render_with_address_and_reason() {
    let mut dbg = Debugger::from_assembly("LOAD_CONST @ 'a'\nLOAD_CONST @ 1\nBINARY_ADD\n", "<test>").unwrap();
    dbg.step(2, false).unwrap();
    let fault = dbg.step(1, false).unwrap_err();
    assert_eq!(format_fault(&fault), "[- paused -] 0x00000004 (unsafe BINARY_ADD)");

    let fault = dbg.step(1, true).unwrap_err();
    assert!(
        format_fault(&fault).starts_with("[- paused -] 0x00000004 (TypeError: "),
        "{}",
        format_fault(&fault)
    );
}

#[test]
fn nested_call_faults_name_the_callee() {
    let mut dbg = Debugger::from_assembly(
        "
        LOAD_CONST@code: boom
            LOAD_NAME @ nothing
            RETURN_VALUE
        LOAD_CONST @ 'boom'
        MAKE_FUNCTION 0
        CALL_FUNCTION 0
        ",
        "<test>",
    )
    .unwrap();
    let fault = dbg.step(4, true).unwrap_err();
    assert_eq!(fault.address(), 6);
    assert_eq!(
        format_fault(&fault),
        "[- paused -] 0x00000006 (NameError: name 'nothing' is not defined)"
    );
    assert_eq!(dbg.depth(), 0);
    assert_eq!(dbg.current().stack().len(), 1);
}

#[test]
fn code_info_table() {
    let dbg = Debugger::from_assembly(
        "
        .argcount 1
        .varnames ('a',)
        .flags OPTIMIZED|0x40000000
        LOAD_FAST @ a
        LOAD_CONST @ (1, 'two')
        ",
        "info.pys",
    )
    .unwrap();
    let frame = dbg.current();
    let info = format_code_info(frame.code(), frame.version());
    let expected = [
        "        -- code --        ",
        "    location: <module> @ info.pys:1",
        "   arguments: 1 (0 positional-only, 0 keyword-only)",
        "  stack size: 0",
        "       flags: OPTIMIZED | UNKNOWN (1 << 30)",
        "    varnames: a",
        "      consts: (1, 'two')",
        "         -- vm --         ",
        "     version: 3.10.0",
    ]
    .join("\n");
    assert_eq!(info, expected);
}

/// Multi-line table values continue under the value column.
#[test]
fn code_info_lists_one_name_per_line() {
    let dbg = Debugger::from_assembly("LOAD_NAME @ first\nLOAD_NAME @ second\n", "<test>").unwrap();
    let frame = dbg.current();
    let info = format_code_info(frame.code(), frame.version());
    assert!(info.contains("       names: first\n              second"), "{info}");
}

#[test]
fn float_and_unrepresentable_constants() {
    let dbg = Debugger::from_assembly("LOAD_CONST @ 1e999\nLOAD_CONST @ 0.1\n", "<test>").unwrap();
    let listing = to_assembly(dbg.current().code(), dbg.current().version()).unwrap();
    assert!(listing.contains("LOAD_CONST @ 1e999\n"), "{listing}");
    assert!(listing.contains("LOAD_CONST @ 0.1\n"), "{listing}");

    let mut dbg = dbg;
    dbg.push(Value::Float(f64::NAN));
    assert_eq!(dbg.current().stack()[0].repr(), "nan");
}
