use std::{
    env, fmt, fs,
    io::{self, BufRead, IsTerminal, Write},
    process::ExitCode,
    str::FromStr,
};

use lantern::{
    Builtin, ContractError, Debugger, ExprError, Frame, LoadError, StderrTracer, Value, VmTracer,
    disassemble::{format_code_info, format_const, format_fault, format_instruction, format_listing},
};

const USAGE: &str = "\
USAGE
    lantern [flags] file            Debug a listing or compiled module
    lantern [flags] file [cmd...]   Run commands before reading stdin

FLAGS
    -h, --help          Display this message
    -s, --assemble      Parse file as an assembler listing
    -b, --bytecode      Parse file as a compiled module (usually automatic)
    -o, --output FILE   Write the loaded code as a compiled module to FILE
    --trace             Log every executed instruction to stderr";

/// Commands as `(names, arguments, summary)`; the first name is canonical.
const COMMANDS: &[(&[&str], &str, &str)] = &[
    (&["help", "h", "?"], "[command]", "Display help about debugger commands"),
    (&["step", "s"], "[count]", "Step over the next instructions, only running safe opcodes"),
    (&["step!", "s!"], "[count]", "Like step, but may run opcodes with side effects"),
    (&["cont", "c"], "", "Step until a breakpoint is reached, only running safe opcodes"),
    (&["cont!", "c!"], "", "Like cont, but may run opcodes with side effects"),
    (&["where", "w"], "", "Display the call stack and positions"),
    (&["dis", "d"], "[frame]", "Disassemble the code of a frame"),
    (&["info", "o"], "[frame]", "Display info about the code of a frame"),
    (&["break", "b"], "location [condition]", "Toggle a breakpoint, optionally guarded"),
    (&["allow", "a"], "opcode [condition]", "Mark an opcode as safe, optionally guarded"),
    (&["disallow"], "opcode..", "Unmark opcodes as safe"),
    (&["save"], "", "Save the stack, locals and globals"),
    (&["restore"], "[entry]", "Restore a saved state, 1 being the latest"),
    (&["stack", "ps"], "", "Display the stack, top first"),
    (&["call", "l"], "[argc]", "Call the function under the counter and enter its frame"),
    (&["return", "r"], "", "Return the top of the stack to the calling frame"),
    (&["push"], "expr", "Push the value of an expression"),
    (&["pop"], "[index..]", "Pop and display values from the stack"),
    (&["builtin"], "name [expr]", "Bind a builtin, or restore a native one"),
    (&["incr", "i"], "[count]", "Move the counter past instructions without running them"),
    (&["quit", "q", "exit"], "", "Exit the debugger"),
];

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = match Options::parse(&args) {
        Ok(Some(options)) => options,
        Ok(None) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("{USAGE}\n");
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let dbg = match load(&options) {
        Ok(dbg) => dbg,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(output) = &options.output
        && let Err(err) = export(&dbg, output)
    {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    if options.trace {
        Session::new(dbg.with_tracer(StderrTracer::new())).run(&options.commands)
    } else {
        Session::new(dbg).run(&options.commands)
    }
}

// ============================================================================
// Arguments and loading
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    /// Compiled module when the header says so, listing otherwise.
    Auto,
    Listing,
    Module,
}

#[derive(Debug)]
struct Options {
    mode: InputMode,
    output: Option<String>,
    trace: bool,
    file: String,
    commands: Vec<String>,
}

impl Options {
    /// Parses flags up to the first positional argument; everything after the
    /// file is a command. Returns `None` when help was requested.
    fn parse(args: &[String]) -> Result<Option<Self>, String> {
        let mut mode = InputMode::Auto;
        let mut output = None;
        let mut trace = false;
        let mut rest = args.iter();
        while let Some(arg) = rest.next() {
            if let Some(path) = arg.strip_prefix("--output=") {
                output = Some(path.to_owned());
                continue;
            }
            match arg.as_str() {
                "-h" | "--help" => return Ok(None),
                "-s" | "--assemble" => mode = InputMode::Listing,
                "-b" | "--bytecode" => mode = InputMode::Module,
                "--trace" => trace = true,
                "-o" | "--output" => match rest.next() {
                    Some(path) => output = Some(path.clone()),
                    None => return Err(format!("option {arg} requires an argument")),
                },
                flag if flag.starts_with('-') && flag.len() > 1 => return Err(format!("unknown option {flag}")),
                file => {
                    return Ok(Some(Self {
                        mode,
                        output,
                        trace,
                        file: file.to_owned(),
                        commands: rest.cloned().collect(),
                    }));
                }
            }
        }
        Err("missing file".to_owned())
    }
}

fn load(options: &Options) -> Result<Debugger, String> {
    let data = read_file(&options.file)?;
    let dbg = match options.mode {
        InputMode::Auto => Debugger::load(&data, &options.file),
        InputMode::Module => Debugger::from_module(&data),
        InputMode::Listing => std::str::from_utf8(&data)
            .map_err(LoadError::from)
            .and_then(|source| Debugger::from_assembly(source, &options.file)),
    };
    dbg.map_err(|err| err.to_string())
}

/// Writes the module to a new file; an existing file is never overwritten.
fn export(dbg: &Debugger, path: &str) -> Result<(), String> {
    let bytes = dbg.export().map_err(|err| err.to_string())?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| format!("Error creating {path}: {err}"))?;
    file.write_all(&bytes)
        .map_err(|err| format!("Error writing {path}: {err}"))
}

fn read_file(file_path: &str) -> Result<Vec<u8>, String> {
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("Error: {file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("Error reading {file_path}: {err}"));
        }
    }
    match fs::read(file_path) {
        Ok(contents) => Ok(contents),
        Err(err) => Err(format!("Error reading file: {err}")),
    }
}

// ============================================================================
// Command loop
// ============================================================================

/// Why a command was rejected. The session is left unchanged.
#[derive(Debug)]
enum CommandError {
    MissingArgument(&'static str),
    ExpectedInteger(String),
    UnexpectedArgument(String),
    UnknownBuiltin(String),
    ShallowStack(usize),
    Contract(ContractError),
    Expr(ExprError),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArgument(name) => write!(f, "missing required argument {name}"),
            Self::ExpectedInteger(found) => write!(f, "expected integer, but got {found}"),
            Self::UnexpectedArgument(found) => write!(f, "unexpected argument: {found}"),
            Self::UnknownBuiltin(name) => write!(f, "no native builtin named {name}"),
            Self::ShallowStack(depth) => write!(f, "call stack is too shallow ({depth})"),
            Self::Contract(err) => write!(f, "{err}"),
            Self::Expr(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<ContractError> for CommandError {
    fn from(err: ContractError) -> Self {
        Self::Contract(err)
    }
}

impl From<ExprError> for CommandError {
    fn from(err: ExprError) -> Self {
        Self::Expr(err)
    }
}

enum Control {
    Continue,
    Quit,
}

struct Session<Tr: VmTracer> {
    dbg: Debugger<Tr>,
    interactive: bool,
}

impl<Tr: VmTracer> Session<Tr> {
    fn new(dbg: Debugger<Tr>) -> Self {
        Self {
            dbg,
            interactive: io::stdin().is_terminal(),
        }
    }

    /// Runs the scripted commands, then reads `;`-separated commands from stdin
    /// until end of input or `quit`.
    fn run(mut self, commands: &[String]) -> ExitCode {
        for command in commands {
            if let Control::Quit = self.handle(command) {
                return ExitCode::SUCCESS;
            }
        }

        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            if self.interactive {
                print!("[0x{:08x}]> ", self.dbg.current().counter());
                let _ = io::stdout().flush();
            }
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    if self.interactive {
                        println!("^D");
                    }
                    return ExitCode::SUCCESS;
                }
                Ok(_) => {}
                Err(err) => {
                    eprintln!("error: {err}");
                    return ExitCode::FAILURE;
                }
            }
            for command in line.split(';') {
                if let Control::Quit = self.handle(command) {
                    return ExitCode::SUCCESS;
                }
            }
        }
    }

    fn handle(&mut self, command: &str) -> Control {
        match self.execute(command) {
            Ok(control) => control,
            Err(err) => {
                println!("[- failed -]: {err}");
                Control::Continue
            }
        }
    }

    fn execute(&mut self, command: &str) -> Result<Control, CommandError> {
        let words: Vec<&str> = command.split_whitespace().collect();
        let Some((&name, args)) = words.split_first() else {
            return Ok(Control::Continue);
        };
        match name {
            "help" | "h" | "?" => help(args.first().copied()),
            "step" | "s" => self.step(count(args)?, false),
            "step!" | "s!" => self.step(count(args)?, true),
            "cont" | "c" => {
                no_args(args)?;
                self.cont(false);
            }
            "cont!" | "c!" => {
                no_args(args)?;
                self.cont(true);
            }
            "where" | "w" => {
                no_args(args)?;
                let mut mark = "* ";
                for (i, frame) in self.dbg.traverse_calls().enumerate() {
                    println!("[{mark}{i:>8}]: {}", format_current(frame, true));
                    mark = "  ";
                }
            }
            "dis" | "d" => {
                let frame = self.frame(args)?;
                print!(
                    "{}",
                    format_listing(frame.code(), frame.version(), Some(frame.counter()), frame.breakpoints())
                );
            }
            "info" | "o" => {
                let frame = self.frame(args)?;
                println!("{}", format_code_info(frame.code(), frame.version()));
            }
            "break" | "b" => {
                let (&location, condition) = args.split_first().ok_or(CommandError::MissingArgument("location"))?;
                let location = parse_index(location)?;
                self.dbg.toggle_breakpoint(location, joined(condition).as_deref())?;
            }
            "allow" | "a" => {
                let (&opcode, condition) = args.split_first().ok_or(CommandError::MissingArgument("opcode"))?;
                self.dbg.allow(opcode, joined(condition).as_deref())?;
            }
            "disallow" => {
                if args.is_empty() {
                    return Err(CommandError::MissingArgument("opcode"));
                }
                for opcode in args {
                    self.dbg.disallow(opcode)?;
                }
            }
            "save" => {
                no_args(args)?;
                self.dbg.save();
            }
            "restore" => {
                let entry = optional_int(args)?.unwrap_or(1);
                self.dbg.restore(entry)?;
            }
            "stack" | "ps" => {
                no_args(args)?;
                self.print_stack();
            }
            "call" | "l" => {
                let argc = optional_int(args)?;
                self.dbg.call(argc)?;
            }
            "return" | "r" => {
                no_args(args)?;
                self.dbg.return_call()?;
            }
            "push" => {
                let expr = joined(args).ok_or(CommandError::MissingArgument("expr"))?;
                self.dbg.push_expr(&expr)?;
            }
            "pop" => {
                let indices = args
                    .iter()
                    .map(|arg| parse_int(arg).ok_or_else(|| CommandError::ExpectedInteger((*arg).to_owned())))
                    .collect::<Result<Vec<_>, _>>()?;
                if indices.is_empty() {
                    println!("{}", format_const(&self.dbg.pop(None)?));
                }
                for index in indices {
                    let index = isize::try_from(index).map_err(|_| CommandError::ExpectedInteger(index.to_string()))?;
                    println!("{}", format_const(&self.dbg.pop(Some(index))?));
                }
            }
            "builtin" => {
                let (&name, expr) = args.split_first().ok_or(CommandError::MissingArgument("name"))?;
                let value = match joined(expr) {
                    Some(expr) => self.dbg.evaluate(&expr)?,
                    None => Builtin::from_str(name)
                        .map(Value::Builtin)
                        .map_err(|_| CommandError::UnknownBuiltin(name.to_owned()))?,
                };
                self.dbg.set_builtin(name, value);
            }
            "incr" | "i" => self.dbg.increment(count(args)?),
            "quit" | "q" | "exit" => return Ok(Control::Quit),
            _ => {
                let value = self.dbg.evaluate(command.trim())?;
                println!("{}", format_const(&value));
            }
        }
        Ok(Control::Continue)
    }

    fn step(&mut self, count: usize, allow_unsafe: bool) {
        if let Err(fault) = self.dbg.step(count, allow_unsafe) {
            println!("{} {}", format_fault(&fault), format_current(self.dbg.current(), false));
        }
    }

    fn cont(&mut self, allow_unsafe: bool) {
        match self.dbg.cont(allow_unsafe) {
            Ok(()) => println!("[- break -] {}", format_current(self.dbg.current(), true)),
            Err(fault) => println!("{} {}", format_fault(&fault), format_current(self.dbg.current(), false)),
        }
    }

    fn frame(&self, args: &[&str]) -> Result<&Frame, CommandError> {
        let n = optional_int(args)?.unwrap_or(0);
        self.dbg.frame(n).ok_or(CommandError::ShallowStack(self.dbg.depth()))
    }

    fn print_stack(&self) {
        let stack = self.dbg.current().stack();
        if stack.is_empty() {
            println!("stack is empty");
            return;
        }
        let mut mark = " ↓";
        for (i, value) in stack.iter().enumerate().rev() {
            println!("[{mark}{i:>8}]: {}", format_const(value));
            mark = "  ";
        }
    }
}

fn help(query: Option<&str>) {
    if let Some(query) = query {
        match COMMANDS.iter().find(|(names, ..)| names.contains(&query)) {
            Some(entry) => println!("{}\n\n{}.", signature(entry), entry.2),
            None => println!("no command named {query}"),
        }
        return;
    }
    for entry in COMMANDS {
        println!("{:<32} {}", signature(entry), entry.2);
    }
}

fn signature((names, args, _): &(&[&str], &str, &str)) -> String {
    let mut out = names.join(", ");
    if !args.is_empty() {
        out.push(' ');
        out.push_str(args);
    }
    out
}

/// The instruction under a frame's counter.
fn format_current(frame: &Frame, show_address: bool) -> String {
    let instruction = match frame.current_instruction() {
        Some(instruction) => format_instruction(frame.code(), &instruction, frame.version(), ""),
        None => "<end of code>".to_owned(),
    };
    if show_address {
        format!("[0x{:08x}]: {instruction}", frame.counter())
    } else {
        instruction
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Parses decimal, or `0x`/`0o`/`0b` prefixed integers, with an optional sign.
fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text),
    };
    let (radix, digits) = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find_map(|(prefix, radix)| digits.strip_prefix(prefix).map(|rest| (radix, rest)))
        .unwrap_or((10, digits));
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let value = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -value } else { value })
}

fn parse_index(text: &str) -> Result<usize, CommandError> {
    parse_int(text)
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| CommandError::ExpectedInteger(text.to_owned()))
}

fn optional_int(args: &[&str]) -> Result<Option<usize>, CommandError> {
    match args {
        [] => Ok(None),
        [arg] => parse_index(arg).map(Some),
        [_, extra @ ..] => Err(CommandError::UnexpectedArgument(extra.join(" "))),
    }
}

fn count(args: &[&str]) -> Result<usize, CommandError> {
    Ok(optional_int(args)?.unwrap_or(1))
}

fn no_args(args: &[&str]) -> Result<(), CommandError> {
    match joined(args) {
        Some(extra) => Err(CommandError::UnexpectedArgument(extra)),
        None => Ok(()),
    }
}

/// The remaining words as one string, `None` when there are none.
fn joined(args: &[&str]) -> Option<String> {
    (!args.is_empty()).then(|| args.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|&arg| arg.to_owned()).collect()
    }

    #[test]
    fn flags_stop_at_the_file() {
        let options = Options::parse(&strings(&["-s", "--trace", "prog.pys", "step 3", "-b"]))
            .unwrap()
            .unwrap();
        assert_eq!(options.mode, InputMode::Listing);
        assert!(options.trace);
        assert_eq!(options.file, "prog.pys");
        assert_eq!(options.commands, strings(&["step 3", "-b"]));
    }

    #[test]
    fn output_takes_a_value() {
        let options = Options::parse(&strings(&["-o", "out.pyc", "prog.pys"])).unwrap().unwrap();
        assert_eq!(options.output.as_deref(), Some("out.pyc"));
        let options = Options::parse(&strings(&["--output=x.pyc", "prog.pys"])).unwrap().unwrap();
        assert_eq!(options.output.as_deref(), Some("x.pyc"));
        assert!(Options::parse(&strings(&["-o"])).is_err());
    }

    #[test]
    fn help_and_missing_file() {
        assert!(Options::parse(&strings(&["--help", "prog.pys"])).unwrap().is_none());
        assert!(Options::parse(&[]).is_err());
        assert!(Options::parse(&strings(&["-x", "prog.pys"])).is_err());
    }

    #[test]
    fn integers_in_any_radix() {
        assert_eq!(parse_int("12"), Some(12));
        assert_eq!(parse_int("0x1c"), Some(28));
        assert_eq!(parse_int("0o17"), Some(15));
        assert_eq!(parse_int("0b101"), Some(5));
        assert_eq!(parse_int("-1"), Some(-1));
        assert_eq!(parse_int("0x"), None);
        assert_eq!(parse_int("12a"), None);
    }

    #[test]
    fn commands_drive_the_session() {
        let dbg = Debugger::from_assembly("LOAD_CONST @ 1\nLOAD_CONST @ 2\nBINARY_ADD\n", "<test>").unwrap();
        let mut session = Session {
            dbg,
            interactive: false,
        };
        assert!(session.execute("step 2").is_ok());
        assert_eq!(session.dbg.current().counter(), 4);
        assert!(session.execute("step").is_ok());
        assert_eq!(session.dbg.current().counter(), 4);
        assert!(session.execute("allow BINARY_ADD stack[-1] == 2").is_ok());
        assert!(session.execute("s").is_ok());
        assert_eq!(session.dbg.current().stack(), &[Value::Int(3)]);
        assert!(matches!(session.execute("restore"), Err(CommandError::Contract(_))));
        assert!(matches!(session.execute("step x"), Err(CommandError::ExpectedInteger(_))));
        assert!(matches!(session.execute("quit"), Ok(Control::Quit)));
    }

    #[test]
    fn builtin_binds_values_and_natives() {
        let dbg = Debugger::from_assembly("NOP\n", "<test>").unwrap();
        let mut session = Session {
            dbg,
            interactive: false,
        };
        assert!(session.execute("builtin answer 6 * 7").is_ok());
        assert_eq!(session.dbg.evaluate("answer").unwrap(), Value::Int(42));
        assert!(session.execute("builtin len 0").is_ok());
        assert!(session.execute("builtin len").is_ok());
        assert_eq!(session.dbg.evaluate("len((1, 2))").unwrap(), Value::Int(2));
        assert!(matches!(
            session.execute("builtin nothing"),
            Err(CommandError::UnknownBuiltin(_))
        ));
    }
}
