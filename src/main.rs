use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tosca::asm::BarrierSetKind;
use tosca::asm::barrier::barrier_set_for;
use tosca::asm::disasm;
use tosca::interp::generate;
use tosca::runtime::NarrowOopMode;
use tosca::runtime::layout::CODE_BASE;
use tosca::{Bytecode, InterpreterConfig, Machine, Outcome, Program, Value};
use tracing_subscriber::EnvFilter;

// Wrapper types for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OopModeArg {
    Off,
    Unscaled,
    ZeroBased,
    HeapBased,
    Disjoint,
}

impl From<OopModeArg> for Option<NarrowOopMode> {
    fn from(arg: OopModeArg) -> Self {
        match arg {
            OopModeArg::Off => None,
            OopModeArg::Unscaled => Some(NarrowOopMode::Unscaled),
            OopModeArg::ZeroBased => Some(NarrowOopMode::ZeroBased),
            OopModeArg::HeapBased => Some(NarrowOopMode::HeapBased),
            OopModeArg::Disjoint => Some(NarrowOopMode::Disjoint),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BarrierArg {
    None,
    CardTable,
}

impl From<BarrierArg> for BarrierSetKind {
    fn from(arg: BarrierArg) -> Self {
        match arg {
            BarrierArg::None => BarrierSetKind::None,
            BarrierArg::CardTable => BarrierSetKind::CardTable,
        }
    }
}

/// Overrides shared by the subcommands that generate the interpreter.
#[derive(clap::Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// Interpreter configuration (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Narrow oop mode, overriding the configuration file
    #[arg(long, value_enum)]
    compressed_oops: Option<OopModeArg>,

    /// Barrier set, overriding the configuration file
    #[arg(long, value_enum)]
    barrier: Option<BarrierArg>,

    /// Keep bytecodes as loaded instead of quickening them
    #[arg(long)]
    no_rewrite: bool,
}

impl ConfigArgs {
    fn load(&self) -> Result<InterpreterConfig, String> {
        let mut config = match &self.config {
            Some(path) => InterpreterConfig::load(path).map_err(|e| e.to_string())?,
            None => InterpreterConfig::default(),
        };
        if let Some(mode) = self.compressed_oops {
            config.compressed_oops = mode.into();
        }
        if let Some(barrier) = self.barrier {
            config.barrier_set = barrier.into();
        }
        if self.no_rewrite {
            config.rewrite_bytecodes = false;
        }
        Ok(config)
    }
}

#[derive(Parser)]
#[command(name = "tosca")]
#[command(about = "A RISC-V template interpreter for JVM bytecode", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a method of a program manifest
    Run {
        /// The program manifest (TOML)
        program: PathBuf,

        /// Method to call, as Class.name(descriptor); defaults to the first
        /// static no-argument `main`
        #[arg(long)]
        entry: Option<String>,

        #[command(flatten)]
        config: ConfigArgs,

        /// Instruction limit for the call
        #[arg(long)]
        limit: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Print every executed bytecode to stderr
        #[arg(long)]
        trace: bool,
    },
    /// Disassemble the generated interpreter
    Dump {
        /// Only the template of this bytecode
        #[arg(long)]
        bytecode: Option<String>,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Assemble and link a program without running it
    Check {
        /// The program manifest (TOML)
        program: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            program,
            entry,
            config,
            limit,
            json,
            trace,
        } => config.load().and_then(|mut config| {
            config.trace_bytecodes |= trace;
            if let Some(limit) = limit {
                config.instruction_limit = limit;
            }
            run_program(&program, entry.as_deref(), config, json, trace)
        }),
        Commands::Dump { bytecode, config } => config.load().and_then(|c| dump(bytecode.as_deref(), &c)),
        Commands::Check { program } => check(&program),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// First static `main` taking no arguments, in manifest order.
fn default_entry(program: &Program) -> Option<String> {
    program.class.iter().find_map(|c| {
        c.method
            .iter()
            .find(|m| m.name == "main" && m.descriptor.starts_with("()") && m.flags.iter().any(|f| f == "static"))
            .map(|m| format!("{}.{}{}", c.name, m.name, m.descriptor))
    })
}

fn display(vm: &Machine, value: &Value) -> String {
    match vm.string_value(value) {
        Ok(Some(s)) => format!("{s:?}"),
        _ => value.to_string(),
    }
}

/// Returns `Ok(false)` when the call threw.
fn run_program(path: &Path, entry: Option<&str>, config: InterpreterConfig, json: bool, trace: bool) -> Result<bool, String> {
    let program = Program::load(path).map_err(|e| e.to_string())?;
    let entry = match entry {
        Some(e) => e.to_string(),
        None => default_entry(&program).ok_or("no static main() method; pass --entry")?,
    };
    let mut vm = Machine::new(config, &program).map_err(|e| e.to_string())?;
    let outcome = vm.invoke(&entry, &[]).map_err(|e| e.to_string())?;

    if trace {
        for event in vm.trace() {
            eprintln!(
                "{} @{} {} [{}] depth={}",
                event.method,
                event.bci,
                event.bytecode,
                event.state.name(),
                event.depth
            );
        }
    }

    let threw = matches!(outcome, Outcome::Threw { .. });
    if json {
        let body = match &outcome {
            Outcome::Returned(value) => serde_json::json!({
                "entry": entry,
                "result": value,
                "string": vm.string_value(value).ok().flatten(),
                "instructions": vm.instructions(),
            }),
            Outcome::Threw { class, message, .. } => serde_json::json!({
                "entry": entry,
                "exception": { "class": class, "message": message },
                "instructions": vm.instructions(),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&body).map_err(|e| e.to_string())?);
    } else {
        match &outcome {
            Outcome::Returned(Value::Void) => {}
            Outcome::Returned(value) => println!("{}", display(&vm, value)),
            Outcome::Threw { class, message: Some(m), .. } => eprintln!("exception {}: {}", class, m),
            Outcome::Threw { class, message: None, .. } => eprintln!("exception {}", class),
        }
    }
    Ok(!threw)
}

fn dump(bytecode: Option<&str>, config: &InterpreterConfig) -> Result<bool, String> {
    let filter = match bytecode {
        Some(name) => Some(Bytecode::from_name(name).ok_or_else(|| format!("unknown bytecode `{}`", name))?),
        None => None,
    };
    let (_, heap_base) = config.heap_layout();
    let interp = generate(config, barrier_set_for(config.barrier_set, heap_base), CODE_BASE).map_err(|e| e.to_string())?;

    let mut found = false;
    for t in interp.templates() {
        if filter.is_some_and(|bc| bc != t.bytecode) {
            continue;
        }
        found = true;
        let wide = if t.wide { " (wide)" } else { "" };
        println!(
            "{}{} [{} -> {}] {:#x}..{:#x}, {} bytes",
            t.bytecode.name(),
            wide,
            t.tos_in.name(),
            t.tos_out.name(),
            t.start,
            t.end,
            t.end - t.start
        );
        for line in disasm::disassemble(interp.code_range(t.start, t.end), t.start) {
            println!("  {}", line);
        }
    }
    if !found {
        return Err("no template generated for that bytecode".to_string());
    }
    Ok(true)
}

fn check(path: &Path) -> Result<bool, String> {
    let program = Program::load(path).map_err(|e| e.to_string())?;
    let vm = Machine::new(InterpreterConfig::default(), &program).map_err(|e| e.to_string())?;
    let methods = vm.universe().methods().len();
    println!(
        "{}: {} classes, {} methods linked",
        path.display(),
        program.class.len(),
        methods
    );
    Ok(true)
}
