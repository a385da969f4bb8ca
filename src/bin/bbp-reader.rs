//! Lists the columns of a persisted MonetDB buffer pool, or dumps one of
//! them. All the work happens in the `libbbp` library; this binary only
//! parses arguments and formats output.

use clap::Parser;
use libbbp::{Column, OpenOptionsBuilder, Pool, SqlName};
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(
    name = "bbp-reader",
    version,
    about = "Read-only browser for a MonetDB database's persisted column store"
)]
struct Args {
    /// Database farm directory (the one containing BACKUP/BBP.dir)
    pool: PathBuf,

    /// Show a single column, named as [schema.]table.column
    #[arg(long, value_name = "NAME", conflicts_with = "physical")]
    column: Option<String>,

    /// Show a single column, by physical name (e.g. 07/701)
    #[arg(long, value_name = "NAME")]
    physical: Option<String>,

    /// Also print the column's decoded values, one per line
    #[arg(long, short)]
    dump: bool,

    /// Do not resolve SQL names from the pool's catalog
    #[arg(long)]
    no_sql_index: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(message) = run(&args) {
        eprintln!("bbp-reader: {}", message);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), String> {
    let options = OpenOptionsBuilder::default()
        .sql_name_index(!args.no_sql_index)
        .build()
        .map_err(|e| e.to_string())?;
    let pool = Pool::open_with(&args.pool, &options).map_err(|e| e.to_string())?;

    if let Some(name) = &args.column {
        let name = parse_sql_name(name)?;
        let index = pool
            .find_by_sql_name(&name)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no column named {} in this pool", name))?;
        return show_column(pool.at(index).map_err(|e| e.to_string())?, args.dump);
    }
    if let Some(physical) = &args.physical {
        let index = pool
            .find_by_physical_name(physical)
            .ok_or_else(|| format!("no column with physical name {} in this pool", physical))?;
        return show_column(pool.at(index).map_err(|e| e.to_string())?, args.dump);
    }

    list_all_columns(&pool);
    Ok(())
}

fn parse_sql_name(text: &str) -> Result<SqlName, String> {
    let parts: Vec<&str> = text.split('.').collect();
    match parts.as_slice() {
        [table, column] => Ok(SqlName::new("", *table, *column)),
        [schema, table, column] => Ok(SqlName::new(*schema, *table, *column)),
        _ => Err(format!("malformed column name {:?}; use [schema.]table.column", text)),
    }
}

fn list_all_columns(pool: &Pool) {
    let mut valid = 0usize;
    println!("Columns in the buffer pool:");
    for column in pool.columns() {
        if !column.is_valid() {
            continue;
        }
        valid += 1;
        let sql_name =
            column.sql_name().map(|n| n.to_string()).unwrap_or_else(|| "(unset)".to_owned());
        println!(
            "index: {:5}  | logical: {:24} | physical: {:10} | type: {:9} | count: {:8} | SQL: {}",
            column.index(),
            column.logical_name().unwrap_or("(none)"),
            column.physical_name().unwrap_or("(none)"),
            column.type_name(),
            column.length(),
            sql_name,
        );
    }
    println!();
    println!("Number of buffer pool entries:  {}", pool.size());
    println!("Number of valid columns:        {}", valid);
}

fn show_column(column: Column, dump: bool) -> Result<(), String> {
    println!("index:     {}", column.index());
    println!("logical:   {}", column.logical_name().unwrap_or("(none)"));
    println!("physical:  {}", column.physical_name().unwrap_or("(none)"));
    match column.sql_name() {
        Some(name) => println!("SQL name:  {}", name),
        None => println!("SQL name:  (unset)"),
    }
    println!("type:      {}", column.type_name());
    println!("width:     {}", column.width());
    println!("count:     {}", column.length());
    println!("capacity:  {}", column.capacity());
    println!("storage:   {}", column.storage_mode());
    println!("dense:     {}", column.is_dense());
    if dump {
        println!();
        for value in column.values() {
            println!("{}", value.map_err(|e| e.to_string())?);
        }
    }
    Ok(())
}
