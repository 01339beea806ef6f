//! colexpr - evaluate column expressions over a generated table

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use colexpr::access::{Column, Table};
use colexpr::expression::{Datum, EvaluationContext, ExprArena};
use colexpr::EvalConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// colexpr - columnar expression evaluation demo
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of rows to generate
    #[arg(short, long, default_value = "1000000")]
    rows: usize,

    /// Fraction of generated values that are null
    #[arg(short = 'n', long, default_value = "0.1")]
    null_ratio: f64,

    /// Random seed; omit for a fresh table on every run
    #[arg(short, long)]
    seed: Option<u64>,

    /// Rows per worker chunk (overrides COLEXPR_CHUNK_SIZE)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Worker threads (overrides COLEXPR_THREADS)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Only reduce over rows where x > 0
    #[arg(long)]
    filter_positive: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    anyhow::ensure!(
        (0.0..=1.0).contains(&args.null_ratio),
        "--null-ratio must be between 0 and 1, got {}",
        args.null_ratio
    );

    let mut config = EvalConfig::from_env();
    if let Some(chunk_size) = args.chunk_size {
        config = config.with_chunk_size(chunk_size);
    }
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let table = generate_table(&mut rng, args.rows, args.null_ratio)
        .context("Failed to generate input table")?;
    println!(
        "📊 Generated table: {} rows, columns x (float64), y (int32), null ratio {}",
        args.rows, args.null_ratio
    );

    let mut arena = ExprArena::new();
    let x = arena.col("x");
    let y = arena.col("y");
    let sum = arena.add(x, y);
    let zero = arena.lit(0);
    let positive = arena.gt(x, zero);
    let missing = arena.isna(x);
    let reducers = [
        arena.mean(x),
        arena.min(x),
        arena.max(x),
        arena.sd(x),
        arena.count(x),
        arena.sum(y),
    ];

    // Elementwise expressions over every row
    let started = Instant::now();
    let context = EvaluationContext::bind_with_config(
        &arena,
        &table,
        &[sum, positive, missing],
        None,
        config.clone(),
    )
    .context("Failed to bind elementwise expressions")?;
    let results = context
        .evaluate()
        .context("Failed to evaluate elementwise expressions")?;
    println!("⚙️  Elementwise ({:?})", started.elapsed());
    for (root, result) in [sum, positive, missing].iter().zip(&results) {
        println!("   {:<12} {}", arena.display(*root), preview(result, 5));
    }

    // Reductions, optionally over the rows where x > 0
    let filter = args.filter_positive.then_some(positive);

    let started = Instant::now();
    let context = EvaluationContext::bind_with_config(&arena, &table, &reducers, filter, config)
        .context("Failed to bind reductions")?;
    let results = context
        .evaluate()
        .context("Failed to evaluate reductions")?;
    println!(
        "📈 Reductions ({:?}{})",
        started.elapsed(),
        if filter.is_some() { ", rows where x > 0" } else { "" }
    );
    for (root, result) in reducers.iter().zip(&results) {
        println!("   {:<12} {}", arena.display(*root), preview(result, 1));
    }

    let stats = context.stats();
    log::debug!(
        "{} nodes evaluated, {} cache hits",
        stats.evaluations,
        stats.cache_hits
    );

    Ok(())
}

fn generate_table(rng: &mut StdRng, rows: usize, null_ratio: f64) -> Result<Table> {
    let x: Vec<Option<f64>> = (0..rows)
        .map(|_| (!rng.gen_bool(null_ratio)).then(|| rng.gen_range(-100.0..100.0)))
        .collect();
    let y: Vec<Option<i32>> = (0..rows)
        .map(|_| (!rng.gen_bool(null_ratio)).then(|| rng.gen_range(-1000..1000)))
        .collect();
    let table = Table::new(vec![
        ("x", Column::from_options(x)),
        ("y", Column::from_options(y)),
    ])?;
    Ok(table)
}

fn preview(datum: &Datum, limit: usize) -> String {
    match datum {
        Datum::Scalar(value) => value.to_string(),
        Datum::Column(col) => {
            let head: Vec<String> = (0..col.len().min(limit))
                .map(|i| col.value(i).to_string())
                .collect();
            let more = if col.len() > limit { ", ..." } else { "" };
            format!("[{}{}] ({} rows)", head.join(", "), more, col.len())
        }
    }
}
