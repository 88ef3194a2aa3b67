//! Terminal driver for the lazygrid engine.
//!
//! Builds a synthetic remote table, stacks the caching and sorting wrappers
//! on it, fetches the window for one viewport position and prints it.

mod synthetic;

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lazygrid_lib::cache::CachedFrame;
use lazygrid_lib::frame::DataFrame;
use lazygrid_lib::frame::LoaderFrame;
use lazygrid_lib::model::Direction;
use lazygrid_lib::model::OrderBy;
use lazygrid_lib::sort::SortableFrame;
use lazygrid_lib::viewport::ViewportConfig;
use lazygrid_lib::viewport::WindowFetcher;
use simplelog::{Config, LevelFilter, WriteLogger};

use synthetic::SyntheticLoader;

#[derive(Parser)]
#[command(name = "lazygrid")]
#[command(about = "Fetch and print one viewport of a large synthetic table", long_about = None)]
struct Args {
    /// Number of rows in the table.
    #[arg(long, default_value_t = 100_000)]
    rows: usize,
    /// Scroll offset of the viewport in pixels.
    #[arg(long, default_value_t = 0.0)]
    scroll_top: f64,
    /// Height of the viewport in pixels.
    #[arg(long, default_value_t = 500.0)]
    client_height: f64,
    /// Sort clause as `column` or `column:desc`. Repeat for secondary sorts.
    #[arg(long = "sort", value_parser = parse_sort_clause)]
    sort: Vec<(String, Direction)>,
    /// Rows fetched beyond each end of the visible window.
    #[arg(long, default_value_t = 20)]
    overscan: usize,
    /// Simulated latency of every backend call in milliseconds.
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
    /// Seed of the synthetic data.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Log file.
    #[arg(long, default_value = "lazygrid.log")]
    log_file: PathBuf,
    /// Log level (off, error, warn, info, debug, trace).
    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

fn parse_sort_clause(raw: &str) -> Result<(String, Direction), String> {
    let (column, direction) = match raw.rsplit_once(':') {
        Some((column, "asc")) => (column, Direction::Asc),
        Some((column, "desc")) => (column, Direction::Desc),
        Some((_, other)) => return Err(format!("unknown direction '{other}', expected asc or desc")),
        None => (raw, Direction::Asc),
    };
    if column.is_empty() {
        return Err("empty column name".to_string());
    }
    Ok((column.to_string(), direction))
}

type Stack = SortableFrame<CachedFrame<LoaderFrame<SyntheticLoader>>>;

fn render(frame: &Stack, order_by: &OrderBy, rows: std::ops::Range<usize>) {
    let columns = frame.columns().to_names();
    print!("{:>8} {:>8}", "row", "#");
    for column in &columns {
        print!(" {column:>14}");
    }
    println!();

    for row in rows {
        let number = match frame.get_row_number(row, order_by) {
            Ok(Some(boxed)) => boxed.value.to_string(),
            Ok(None) => "…".to_string(),
            Err(e) => format!("!{e}"),
        };
        print!("{row:>8} {number:>8}");
        for column in &columns {
            let cell = match frame.get_cell(row, column, order_by) {
                Ok(Some(boxed)) => boxed.value.to_string(),
                Ok(None) => "…".to_string(),
                Err(_) => "!error".to_string(),
            };
            print!(" {cell:>14.14}");
        }
        println!();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_file = File::create(&args.log_file)
        .with_context(|| format!("Failed to create log file {}", args.log_file.display()))?;
    WriteLogger::init(args.log_level, Config::default(), log_file).context("Failed to initialize logger")?;

    let order_by = args
        .sort
        .iter()
        .fold(OrderBy::none(), |order, (column, direction)| {
            order.then(column.clone(), *direction)
        });

    let loader = SyntheticLoader::new(args.seed).with_latency_ms(args.latency_ms);
    let source = LoaderFrame::new(SyntheticLoader::columns(), args.rows, loader)?;
    let frame = Arc::new(SortableFrame::new(CachedFrame::new(source)));
    log::info!("Serving {} synthetic rows (seed {})", args.rows, args.seed);

    let config = ViewportConfig::default().with_overscan(args.overscan);
    let mut fetcher = WindowFetcher::new(frame.clone(), config)
        .with_order_by(order_by.clone())
        .on_error(|e| eprintln!("Fetch failed: {e}"));

    let window = match fetcher.scroll(args.scroll_top, args.client_height)? {
        Some(handle) => {
            handle.await.context("Fetch task panicked")?;
            fetcher.window().cloned()
        }
        None => fetcher.window().cloned(),
    }
    .context("No fetch window")?;

    println!(
        "Visible rows {}..{} of {} (fetched {}..{}, order: {})",
        window.visible.start,
        window.visible.end,
        frame.num_rows(),
        window.fetch.start,
        window.fetch.end,
        if order_by.is_empty() { "natural".to_string() } else { order_by.to_string() }
    );
    render(&frame, &order_by, window.visible.clone());

    let stats = frame.inner().stats();
    let loader = frame.inner().inner().loader();
    println!();
    println!(
        "Cache: {} ({:.0}% hits); backend: {} calls, {} rows",
        stats,
        stats.hit_ratio().unwrap_or(0.0) * 100.0,
        loader.calls(),
        loader.rows_loaded()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sort_clause() {
        assert_eq!(parse_sort_clause("score"), Ok(("score".to_string(), Direction::Asc)));
        assert_eq!(parse_sort_clause("score:desc"), Ok(("score".to_string(), Direction::Desc)));
        assert!(parse_sort_clause("score:sideways").is_err());
        assert!(parse_sort_clause(":desc").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "lazygrid",
            "--rows",
            "10",
            "--sort",
            "city",
            "--sort",
            "score:desc",
        ])
        .unwrap();
        assert_eq!(args.rows, 10);
        assert_eq!(
            args.sort,
            vec![
                ("city".to_string(), Direction::Asc),
                ("score".to_string(), Direction::Desc)
            ]
        );
        assert_eq!(args.log_level, LevelFilter::Info);
    }
}
