//! Sample simulator driver.
//!
//! With a program file (`.yaml` or `.asm`), loads it, runs the static lint
//! and the dataflow simulation, and prints the findings. With no arguments,
//! wires up the built-in demo: a 2x2 mesh that adds 2 to a west-fed stream
//! and collects it on the east side.
//!
//! Log filtering follows `RUST_LOG` (e.g. `RUST_LOG=cgra_mesh=debug`).

use std::path::PathBuf;
use std::process;

use cgra_core::{Color, InstructionGroup, Opcode, Operand, Operation, Program, Side};
use cgra_mesh::{Device, Driver};
use cgra_tile::ExecMode;
use cgra_verify::{Arch, lint, simulate};
use tracing_subscriber::EnvFilter;

struct CliArgs {
    program: Option<PathBuf>,
    rows: u32,
    columns: u32,
    max_steps: usize,
}

fn parse_args() -> CliArgs {
    let mut args = CliArgs {
        program: None,
        rows: 4,
        columns: 4,
        max_steps: 100_000,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--rows" => args.rows = expect_number(iter.next(), "--rows"),
            "--columns" => args.columns = expect_number(iter.next(), "--columns"),
            "--max-steps" => {
                args.max_steps = expect_number::<usize>(iter.next(), "--max-steps");
            }
            "--help" | "-h" => {
                eprintln!(
                    "usage: cgra-sim [program.yaml|program.asm] [--rows N] [--columns N] [--max-steps N]"
                );
                process::exit(0);
            }
            other if !other.starts_with('-') => args.program = Some(PathBuf::from(other)),
            other => {
                eprintln!("unknown option: {other}");
                process::exit(2);
            }
        }
    }
    args
}

fn expect_number<T: std::str::FromStr>(value: Option<String>, flag: &str) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or_else(|| {
        eprintln!("{flag} needs a numeric value");
        process::exit(2);
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = parse_args();
    match args.program.take() {
        Some(path) => verify_program(&path, &args),
        None => run_demo(),
    }
}

/// Load a program file, lint it, and dataflow-simulate it.
fn verify_program(path: &std::path::Path, args: &CliArgs) {
    let is_asm = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("asm") || ext.eq_ignore_ascii_case("s"));
    let loaded = if is_asm {
        format_cgra::load_asm_path(path)
    } else {
        format_cgra::load_yaml_path(path)
    };
    let programs = match loaded {
        Ok(programs) => programs,
        Err(error) => {
            eprintln!("failed to load {}: {error}", path.display());
            process::exit(1);
        }
    };
    println!("loaded {} tile program(s)", programs.len());

    let arch = Arch::mesh(args.rows, args.columns);
    let issues = lint(&programs, &arch);
    if issues.is_empty() {
        println!("lint: clean");
    } else {
        for issue in &issues {
            println!(
                "lint: {:?} at ({},{}) t={} op={}: {:?}",
                issue.category, issue.x, issue.y, issue.time, issue.op, issue.details
            );
        }
    }

    let report = simulate(&programs, &arch, args.max_steps);
    println!(
        "dataflow: {} executed, {} starved, {} error(s)",
        report.executed,
        report.unexecuted.len(),
        report.errors.len()
    );
    for at in &report.unexecuted {
        println!("  starved: ({},{}) t={} op={}", at.x, at.y, at.time, at.op);
    }
    for (at, error) in &report.errors {
        println!(
            "  error: ({},{}) t={} op={}: {error}",
            at.x, at.y, at.time, at.op
        );
    }
    if !issues.is_empty() || !report.errors.is_empty() {
        process::exit(1);
    }
}

/// The built-in demo: feed a stream into a 2x2 mesh, add 2, collect it.
fn run_demo() {
    let mut device = Device::new(2, 2, ExecMode::Sync);
    let west = Operand::Port {
        side: Side::West,
        color: Color::R,
    };
    let east = Operand::Port {
        side: Side::East,
        color: Color::R,
    };
    for y in 0..2 {
        device
            .tile_mut(0, y)
            .map_program(Program::single_block(vec![InstructionGroup::new(vec![
                Operation::new(
                    Opcode::Add,
                    vec![west.clone(), Operand::Immediate(2)],
                    vec![east.clone()],
                ),
            ])]));
        device
            .tile_mut(1, y)
            .map_program(Program::single_block(vec![InstructionGroup::new(vec![
                Operation::new(Opcode::Mov, vec![west.clone()], vec![east.clone()]),
            ])]));
    }

    let mut driver = Driver::new(device);
    let input: Vec<u32> = (0..16).collect();
    driver.add_feed_task(input.clone(), Side::West, 0..2, 2, Color::R);
    let out = driver.add_collect_task(16, Side::East, 0..2, 2, Color::R);

    match driver.run(10_000) {
        Ok(ticks) => {
            println!("demo finished in {} ticks", ticks.get());
            println!("input:  {input:?}");
            println!("output: {:?}", driver.collect_task(out).values());
        }
        Err(error) => {
            eprintln!("demo failed: {error}");
            process::exit(1);
        }
    }
}
