// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ssmd_engine::{
    EngineContext, ExecuteOptions, FailurePolicy, Interpreter, Lanes, Package, disassemble,
};

const EXIT_FAILURE: i32 = 1;

#[macro_export]
macro_rules! die(
    ($($arg:tt)*) => { {
        eprintln!($($arg)*);
        std::process::exit(EXIT_FAILURE)
    } }
);

#[derive(Parser, Debug)]
#[command(name = "ssmd", version, about = "Run batched bytecode packages over lanes of data")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a package over the lanes of a CSV file and print each lane's data
    /// segment as TSV
    Run {
        /// Package JSON
        package: PathBuf,
        /// One row per lane, one column per data slot (header row required)
        lanes: PathBuf,
        /// JSON execute options; flags below override it
        #[arg(long)]
        options: Option<PathBuf>,
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Skip exhaustive shape checks
        #[arg(long)]
        silent: bool,
        /// Route every assignment through the scratch register
        #[arg(long)]
        no_write_through: bool,
        /// Seed every lane from the package's initial data instead of the CSV
        #[arg(long)]
        seed: bool,
    },
    /// Print a package's code segment one token per line
    Disasm {
        /// Package JSON
        package: PathBuf,
    },
}

fn read_to_string(path: &Path) -> String {
    let mut contents = String::new();
    let result = File::open(path).and_then(|mut f| f.read_to_string(&mut contents));
    if let Err(err) = result {
        die!("error: reading '{}': {}", path.display(), err);
    }
    contents
}

fn load_package(path: &Path) -> Package {
    match Package::from_json(&read_to_string(path)) {
        Ok(package) => package,
        Err(err) => die!("error: package '{}': {}", path.display(), err),
    }
}

/// Read lane rows, padding or truncating each to `data_size` columns.
fn load_lanes(path: &Path, data_size: usize) -> Vec<Vec<f32>> {
    let mut rdr = match csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path) {
        Ok(rdr) => rdr,
        Err(err) => die!("error: lanes '{}': {}", path.display(), err),
    };
    let mut rows = vec![];
    for (lane, record) in rdr.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => die!("error: lane {}: {}", lane, err),
        };
        let mut row = vec![0.0f32; data_size];
        for (slot, field) in record.iter().enumerate().take(data_size) {
            row[slot] = match field.parse::<f32>() {
                Ok(n) => n,
                Err(err) => die!("error: lane {} slot {}: invalid '{}': {}", lane, slot, field, err),
            };
        }
        rows.push(row);
    }
    rows
}

fn run(
    package_path: &Path,
    lanes_path: &Path,
    options: ExecuteOptions,
    seed: bool,
) {
    let package = load_package(package_path);
    let rows = load_lanes(lanes_path, package.data_size);
    let stride = package.row_len();

    let mut arena = vec![0.0f32; stride * rows.len()];
    for (lane, row) in rows.iter().enumerate() {
        arena[lane * stride..lane * stride + row.len()].copy_from_slice(row);
    }

    let mut interpreter = Interpreter::new(options);
    if let Err(err) = interpreter.set_package(&package) {
        die!("error: {}", err);
    }
    let ctx = EngineContext::new();
    let mut lanes = Lanes::strided(&mut arena, stride, rows.len());
    match interpreter.execute(&ctx, None, &mut lanes, !seed) {
        Ok(summary) => tracing::info!(
            iterations = summary.iterations,
            final_stack_offset = summary.final_stack_offset,
            "execution finished"
        ),
        Err(err) => die!("error: {} (status {})", err, err.status()),
    }

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let header: Vec<String> = (0..package.data_size).map(|slot| format!("slot{slot}")).collect();
    let mut lines = vec![format!("lane\t{}", header.join("\t"))];
    for lane in 0..lanes.len() {
        let values = lanes.slot(lane, 0, package.data_size).unwrap_or(&[]);
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        lines.push(format!("{lane}\t{}", values.join("\t")));
    }
    for line in lines {
        if let Err(err) = writeln!(out, "{line}") {
            die!("error: writing output: {}", err);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            package,
            lanes,
            options,
            max_iterations,
            silent,
            no_write_through,
            seed,
        } => {
            let mut opts = match options {
                Some(path) => match serde_json::from_str::<ExecuteOptions>(&read_to_string(&path)) {
                    Ok(opts) => opts,
                    Err(err) => die!("error: options '{}': {}", path.display(), err),
                },
                None => ExecuteOptions::default(),
            };
            if let Some(max) = max_iterations {
                opts.max_iterations = max;
            }
            if silent {
                opts.failure_policy = FailurePolicy::Silent;
            }
            if no_write_through {
                opts.write_through = false;
            }
            run(&package, &lanes, opts, seed);
        }
        Command::Disasm { package } => {
            let package = load_package(&package);
            match disassemble(&package.code) {
                Ok(listing) => print!("{listing}"),
                Err(err) => die!("error: {}", err),
            }
        }
    }
}
