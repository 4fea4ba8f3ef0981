use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use pimexec_error::{PimexecError, Result};
use pimexec_execution::fleet::{Fleet, FleetConfig};
use pimexec_execution::join::merge_join;
use pimexec_execution::plan::PartitionPlan;
use pimexec_execution::reduce::merge_runs;
use pimexec_execution::table::{SelectPredicate, Table};
use pimexec_execution::unit::DEFAULT_CACHE_BLOCK_BYTES;
use tracing::info;

#[derive(Parser)]
#[clap(name = "pimexec_bin")]
struct Arguments {
    /// CSV file holding the left table.
    left: PathBuf,

    /// CSV file holding the right table.
    right: PathBuf,

    /// Number of compute units in the fleet.
    #[clap(long, default_value_t = 4)]
    units: usize,

    /// Cooperative threads per unit.
    #[clap(long, default_value_t = 2)]
    threads: usize,

    /// Cache block size per thread, in bytes.
    #[clap(long, default_value_t = DEFAULT_CACHE_BLOCK_BYTES)]
    cache_bytes: usize,

    /// Column the select predicate filters on, left table.
    #[clap(long, default_value_t = 1)]
    left_select_column: usize,

    /// Keep left rows whose select column exceeds this value.
    #[clap(long, default_value_t = 0)]
    left_select_value: i64,

    /// Column the select predicate filters on, right table.
    #[clap(long, default_value_t = 1)]
    right_select_column: usize,

    /// Keep right rows whose select column exceeds this value.
    #[clap(long, default_value_t = 0)]
    right_select_value: i64,

    /// Join key column in the left table.
    #[clap(long, default_value_t = 0)]
    left_key: usize,

    /// Join key column in the right table.
    #[clap(long, default_value_t = 0)]
    right_key: usize,

    /// Emit logs as json.
    #[clap(long)]
    json_logs: bool,
}

/// Simple binary for running a filter-sort-join over two CSV files.
fn main() {
    let args = Arguments::parse();
    let format = if args.json_logs {
        logutil::LogFormat::Json
    } else {
        logutil::LogFormat::HumanReadable
    };
    logutil::configure_global_logger(tracing::Level::ERROR, format);

    if let Err(e) = inner(args) {
        println!("ERROR: {e}");
        std::process::exit(1);
    }
}

/// Read a headered CSV of integers into a table.
///
/// The header row only determines the column count; names are ignored.
fn read_csv_table(path: &PathBuf) -> Result<Table> {
    let contents = fs::read_to_string(path).map_err(|e| {
        PimexecError::with_source(format!("Failed to read '{}'", path.display()), Box::new(e))
    })?;

    let mut lines = lines_with_content(&contents);
    let header = lines
        .next()
        .ok_or_else(|| PimexecError::new(format!("'{}' is empty", path.display())))?;
    let column_count = header.split(',').count();

    let mut table = Table::empty(column_count);
    let mut row = Vec::with_capacity(column_count);
    for line in lines {
        row.clear();
        for field in line.split(',') {
            row.push(field.trim().parse::<i64>()?);
        }
        table.push_row(&row)?;
    }
    Ok(table)
}

fn lines_with_content(contents: &str) -> impl Iterator<Item = &str> {
    contents.lines().filter(|line| !line.trim().is_empty())
}

fn inner(args: Arguments) -> Result<()> {
    let left = read_csv_table(&args.left)?;
    let right = read_csv_table(&args.right)?;
    info!(
        left_rows = left.row_count(),
        right_rows = right.row_count(),
        "tables loaded"
    );

    let fleet = Fleet::try_new(FleetConfig {
        fleet_size: args.units,
        threads_per_unit: args.threads,
        cache_block_bytes: args.cache_bytes,
    })?;
    let mut plan = PartitionPlan::try_new(left.shape(), right.shape(), args.units)?;

    fleet.load_plan(&plan, &left, &right)?;
    let (left_total, right_total) = fleet.run_select(
        &mut plan,
        SelectPredicate::new(args.left_select_column, args.left_select_value),
        SelectPredicate::new(args.right_select_column, args.right_select_value),
    )?;
    let (selected_left, selected_right) = fleet.read_tables(&plan)?;

    plan.replan_for_sort(left_total, right_total);
    fleet.load_plan(&plan, &selected_left, &selected_right)?;
    fleet.run_sort(args.left_key, args.right_key)?;

    let (left_runs, right_runs) = fleet.read_sorted_runs(&plan)?;
    let sorted_left = merge_runs(left_runs, left.column_count(), args.left_key)?;
    let sorted_right = merge_runs(right_runs, right.column_count(), args.right_key)?;

    let joined = merge_join(&sorted_left, &sorted_right, args.left_key, args.right_key)?;

    let mut stdout = BufWriter::new(std::io::stdout());
    for row in joined.rows() {
        let fields: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(stdout, "{}", fields.join(","))?;
    }
    writeln!(
        stdout,
        "{} rows joined ({} left, {} right after select)",
        joined.row_count(),
        left_total,
        right_total,
    )?;
    stdout.flush()?;

    Ok(())
}
