use std::{
    path::PathBuf,
    process::ExitCode,
    thread,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wasm_vm::{Config, StatisticsConfig, Value, ValueType, Vm};

/// Load, validate and run WebAssembly modules.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call an exported function and print its results
    Run(RunArgs),
    /// Check that a module decodes and validates
    Validate {
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    file: PathBuf,

    /// Exported function to call
    func: String,

    /// Arguments, parsed by the function's parameter types
    #[arg(allow_negative_numbers = true)]
    args: Vec<String>,

    #[arg(long)]
    max_memory_pages: Option<u32>,

    #[arg(long)]
    max_table_elements: Option<u32>,

    #[arg(long)]
    max_call_depth: Option<usize>,

    /// Limit on host functions calling back into wasm at once
    #[arg(long)]
    max_host_reentrance: Option<usize>,

    /// Trap once this many instructions have executed
    #[arg(long)]
    gas_limit: Option<u64>,

    /// Interrupt execution after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print execution statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Register FILE as module NAME before running
    #[arg(long, value_name = "NAME=FILE")]
    preload: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    initialize_tracing(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Validate { file } => validate(file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn initialize_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn validate(file: PathBuf) -> Result<()> {
    let mut vm = Vm::default();

    vm.load_file(&file)
        .with_context(|| format!("failed to load {}", file.display()))?;
    vm.validate()
        .with_context(|| format!("{} is not valid", file.display()))?;

    println!("{}: ok", file.display());

    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = Config::new();

    if let Some(pages) = args.max_memory_pages {
        config = config.max_memory_pages(pages);
    }

    if let Some(elements) = args.max_table_elements {
        config = config.max_table_elements(elements);
    }

    if let Some(depth) = args.max_call_depth {
        config = config.max_call_depth(depth);
    }

    if let Some(reentrance) = args.max_host_reentrance {
        config = config.max_host_reentrance(reentrance);
    }

    if args.stats {
        config = config.statistics(StatisticsConfig::all());
    }

    if let Some(limit) = args.gas_limit {
        config = config.cost_limit(limit);
    }

    let mut vm = Vm::new(config);

    for preload in &args.preload {
        let (name, path) = preload
            .split_once('=')
            .ok_or_else(|| anyhow!("--preload expects NAME=FILE, got {preload:?}"))?;

        vm.register_module_file(name, path)
            .with_context(|| format!("failed to register {path} as {name:?}"))?;
    }

    vm.load_file(&args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;
    vm.validate()?;
    vm.instantiate()
        .with_context(|| format!("failed to instantiate {}", args.file.display()))?;

    let ty = vm
        .function_type(&args.func)
        .ok_or_else(|| anyhow!("no exported function {:?}", args.func))?;

    if ty.number_of_args() != args.args.len() {
        bail!(
            "{} expects {} arguments, got {}",
            args.func,
            ty.number_of_args(),
            args.args.len()
        );
    }

    let values = ty
        .params()
        .iter()
        .zip(&args.args)
        .map(|(ty, arg)| parse_arg(*ty, arg))
        .collect::<Result<Vec<_>>>()?;

    if let Some(ms) = args.timeout_ms {
        let handle = vm.interrupt_handle();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            debug!(ms, "timeout reached, interrupting");
            handle.interrupt();
        });
    }

    let results = vm
        .execute(&args.func, &values)
        .with_context(|| format!("{} failed", args.func))?;

    for result in results {
        println!("{result}");
    }

    if args.stats {
        let stats = vm.statistics();

        eprintln!("instructions: {}", stats.instr_count());
        eprintln!("gas: {}", stats.total_cost());
        eprintln!("wasm time: {:?}", stats.wasm_time());
        eprintln!("host time: {:?}", stats.host_time());

        if let Some(ips) = stats.instructions_per_second() {
            eprintln!("instructions/s: {ips:.0}");
        }
    }

    Ok(())
}

/// Parses a decimal or `0x` hex integer with an optional leading `-`.
fn parse_int(arg: &str) -> Result<i128> {
    let (negative, digits) = match arg.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, arg),
    };

    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => digits.parse::<u64>()?,
    };

    let magnitude = i128::from(magnitude);

    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_i32(arg: &str) -> Result<i32> {
    let n = parse_int(arg)?;

    match i32::try_from(n) {
        Ok(n) => Ok(n),
        Err(_) => match u32::try_from(n) {
            Ok(n) => Ok(n as i32),
            Err(_) => bail!("{arg} does not fit in an i32"),
        },
    }
}

fn parse_i64(arg: &str) -> Result<i64> {
    let n = parse_int(arg)?;

    match i64::try_from(n) {
        Ok(n) => Ok(n),
        Err(_) => match u64::try_from(n) {
            Ok(n) => Ok(n as i64),
            Err(_) => bail!("{arg} does not fit in an i64"),
        },
    }
}

fn parse_float(arg: &str) -> Result<f64> {
    Ok(match arg.to_ascii_lowercase().as_str() {
        "nan" => f64::NAN,
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse()?,
    })
}

fn parse_arg(ty: ValueType, arg: &str) -> Result<Value> {
    let value = match ty {
        ValueType::I32 => Value::I32(parse_i32(arg)?),
        ValueType::I64 => Value::I64(parse_i64(arg)?),
        ValueType::F32 => Value::F32(parse_float(arg)? as f32),
        ValueType::F64 => Value::F64(parse_float(arg)?),
        ValueType::FuncRef | ValueType::ExternRef => {
            bail!("cannot pass a {ty} argument from the command line")
        }
    };

    Ok(value)
}
