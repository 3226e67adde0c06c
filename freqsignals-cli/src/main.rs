//! FreqSignals CLI: token, polling, backfill, publish and projection commands.
//!
//! Commands:
//! - `token`: obtain a bearer token and report when it is due for refresh
//! - `signals`: poll the live signal list and print it as JSON lines
//! - `history`: backfill historical signals for one symbol and dataset
//! - `publish`: post a new signal
//! - `project`: annotate a CSV/Parquet series with stored signals

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use freqsignals_core::series_io::{read_csv, read_parquet, write_csv, write_parquet};
use freqsignals_core::{
    BackfillOutcome, ClientConfig, NewSignal, ProjectionOptions, ReqwestTransport, RunMode, Scalar,
    Series, SignalPublisher, SignalSession, SystemClock, TokenManager,
};
use log::info;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "freqsignals",
    about = "FreqSignals CLI: publish, fetch and project trading signals"
)]
struct Cli {
    /// TOML config file. Environment variables override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obtain a bearer token and print its refresh time.
    Token,
    /// Poll the live signal list and print every stored signal.
    Signals {
        /// Restrict to these dataset ids. Defaults to the configured list.
        #[arg(long = "data-set")]
        data_sets: Vec<String>,
    },
    /// Backfill historical signals for one symbol and dataset.
    History {
        #[arg(long)]
        symbol: String,

        /// Dataset id. Defaults to FREQSIGNALS_DATA_SET_ID.
        #[arg(long = "data-set")]
        data_set: Option<String>,

        /// Extra history query filters as key=value (repeatable).
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Print every loaded signal as a JSON line.
        #[arg(long, default_value_t = false)]
        print: bool,
    },
    /// Publish a signal.
    Publish {
        #[arg(long)]
        symbol: String,

        #[arg(long, allow_hyphen_values = true)]
        value: f64,

        /// Validity in minutes.
        #[arg(long, default_value_t = 60)]
        ttl: u32,

        /// Dataset id. Defaults to FREQSIGNALS_DATA_SET_ID.
        #[arg(long = "data-set")]
        data_set: Option<String>,

        /// Extra context fields as key=value (repeatable).
        #[arg(long = "context", value_parser = parse_key_value)]
        context: Vec<(String, Scalar)>,

        /// Attempt budget for this post.
        #[arg(long, default_value_t = 1)]
        attempts: u32,
    },
    /// Annotate a series file with signals for one pair.
    Project {
        /// Input series (.csv or .parquet) with a date column.
        #[arg(long)]
        series: PathBuf,

        #[arg(long)]
        pair: String,

        /// Output column name. Defaults to the dataset name mapping.
        #[arg(long)]
        column: Option<String>,

        /// Only project this dataset.
        #[arg(long = "data-set")]
        data_set: Option<String>,

        /// Also write `{column}_{key}` context columns.
        #[arg(long, default_value_t = false)]
        include_context: bool,

        /// Backfill history for the pair first (requires --data-set or a default).
        #[arg(long, default_value_t = false)]
        history: bool,

        /// Poll the live signal list first.
        #[arg(long, default_value_t = false)]
        live: bool,

        /// Output file (.csv or .parquet).
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Token => run_token(config),
        Commands::Signals { data_sets } => run_signals(config, data_sets),
        Commands::History {
            symbol,
            data_set,
            filters,
            print,
        } => run_history(config, &symbol, data_set, &filters, print),
        Commands::Publish {
            symbol,
            value,
            ttl,
            data_set,
            context,
            attempts,
        } => run_publish(config, symbol, value, ttl, data_set, context, attempts),
        Commands::Project {
            series,
            pair,
            column,
            data_set,
            include_context,
            history,
            live,
            out,
        } => run_project(
            config,
            &series,
            &pair,
            ProjectionOptions {
                column_name: column,
                data_set_id: data_set,
                include_context,
            },
            history,
            live,
            &out,
        ),
    }
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let config = match path {
        Some(p) => ClientConfig::from_toml_file(p)?,
        None => ClientConfig::from_env()?,
    };
    Ok(config)
}

fn run_token(config: ClientConfig) -> Result<()> {
    config.validate()?;
    let transport = ReqwestTransport::new(config.request_timeout())?;
    let mut tokens = TokenManager::new(&config);
    let token = tokens.token(&transport, &SystemClock)?;
    println!("token obtained, refresh due at {}", token.expires_at);
    Ok(())
}

fn run_signals(config: ClientConfig, data_sets: Vec<String>) -> Result<()> {
    let filter = if data_sets.is_empty() {
        config.data_set_ids.clone()
    } else {
        data_sets
    };
    let mut session = SignalSession::from_config(config)?;
    let summary = session.poll(&filter)?;
    for signal in session.store().iter() {
        println!("{}", serde_json::to_string(signal)?);
    }
    info!(
        "{} signal(s) received, {} stored",
        summary.received,
        session.store().len()
    );
    Ok(())
}

fn run_history(
    config: ClientConfig,
    symbol: &str,
    data_set: Option<String>,
    filters: &[(String, String)],
    print: bool,
) -> Result<()> {
    let data_set = resolve_data_set(&config, data_set)?;
    let mut session = SignalSession::from_config(config)?;
    match session.ensure_history_filtered(symbol, &data_set, filters)? {
        BackfillOutcome::Loaded {
            pages,
            fetched,
            inserted,
        } => println!("{symbol}/{data_set}: {fetched} record(s), {pages} page(s), {inserted} new"),
        BackfillOutcome::AlreadyLoaded => println!("{symbol}/{data_set}: already loaded"),
    }
    if print {
        for signal in session.store().signals_for(symbol, Some(&data_set)) {
            println!("{}", serde_json::to_string(signal)?);
        }
    }
    Ok(())
}

fn run_publish(
    config: ClientConfig,
    symbol: String,
    value: f64,
    ttl: u32,
    data_set: Option<String>,
    context: Vec<(String, Scalar)>,
    attempts: u32,
) -> Result<()> {
    if attempts == 0 {
        bail!("--attempts must be at least 1");
    }
    let mut signal = NewSignal::new(symbol, value, ttl);
    signal.data_set_id = data_set;
    signal.context.extend(context);

    let mut session = SignalSession::from_config(config)?
        .with_publisher(SignalPublisher::new().with_max_attempts(attempts));
    let ack = session.publish(&signal)?;
    println!("{ack}");
    Ok(())
}

fn run_project(
    config: ClientConfig,
    input: &Path,
    pair: &str,
    options: ProjectionOptions,
    history: bool,
    live: bool,
    out: &Path,
) -> Result<()> {
    let mut series = read_series(input)?;
    series.sort();

    let history_data_set = if history {
        Some(resolve_data_set(&config, options.data_set_id.clone())?)
    } else {
        None
    };

    let mut session = SignalSession::from_config(config)?;
    if live {
        session.on_tick(RunMode::Live)?;
    }
    if let Some(ds) = history_data_set {
        session.ensure_history(pair, &ds)?;
    }

    let summary = session.annotate(&mut series, pair, &options);
    info!(
        "projected {} signal(s) onto {} row(s), {} cell(s) written",
        summary.signals,
        series.len(),
        summary.cells_written
    );

    write_series(&series, out)
}

fn resolve_data_set(config: &ClientConfig, explicit: Option<String>) -> Result<String> {
    match explicit.or_else(|| config.default_data_set_id.clone()) {
        Some(ds) => Ok(ds),
        None => bail!("no dataset given; pass --data-set or set FREQSIGNALS_DATA_SET_ID"),
    }
}

fn is_parquet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"))
}

fn read_series(path: &Path) -> Result<Series> {
    let series = if is_parquet(path) {
        read_parquet(path)
    } else {
        read_csv(path)
    };
    series.with_context(|| format!("reading series from {}", path.display()))
}

fn write_series(series: &Series, path: &Path) -> Result<()> {
    let result = if is_parquet(path) {
        write_parquet(series, path)
    } else {
        write_csv(series, path)
    };
    result.with_context(|| format!("writing series to {}", path.display()))
}

fn parse_filter(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, Scalar), String> {
    let (key, value) = parse_filter(raw)?;
    let scalar = if let Ok(n) = value.parse::<f64>() {
        Scalar::Number(n)
    } else if let Ok(b) = value.parse::<bool>() {
        Scalar::Bool(b)
    } else {
        Scalar::Text(value)
    };
    Ok((key, scalar))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_parsing() {
        assert_eq!(
            parse_key_value("rsi=61.5").unwrap(),
            ("rsi".to_string(), Scalar::Number(61.5))
        );
        assert_eq!(
            parse_key_value("overbought=true").unwrap(),
            ("overbought".to_string(), Scalar::Bool(true))
        );
        assert_eq!(
            parse_key_value("note=a=b").unwrap(),
            ("note".to_string(), Scalar::Text("a=b".into()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=1").is_err());
    }

    #[test]
    fn history_accepts_repeated_filters() {
        let cli = Cli::try_parse_from([
            "freqsignals",
            "history",
            "--symbol",
            "SPY",
            "--filter",
            "t__gte=2024-01-01",
            "--filter",
            "t__lt=2024-02-01",
        ])
        .unwrap();
        match cli.command {
            Commands::History { filters, .. } => {
                assert_eq!(filters.len(), 2);
                assert_eq!(filters[1], ("t__lt".to_string(), "2024-02-01".to_string()));
            }
            _ => panic!("expected history command"),
        }
    }

    #[test]
    fn parquet_detected_by_extension() {
        assert!(is_parquet(Path::new("a/b.PARQUET")));
        assert!(!is_parquet(Path::new("a/b.csv")));
        assert!(!is_parquet(Path::new("a/b")));
    }

    #[test]
    fn cli_parses_project_command() {
        let cli = Cli::try_parse_from([
            "freqsignals",
            "project",
            "--series",
            "in.csv",
            "--pair",
            "BTC/USD",
            "--column",
            "sig",
            "--include-context",
            "--out",
            "out.csv",
        ])
        .unwrap();
        match cli.command {
            Commands::Project {
                pair,
                column,
                include_context,
                ..
            } => {
                assert_eq!(pair, "BTC/USD");
                assert_eq!(column.as_deref(), Some("sig"));
                assert!(include_context);
            }
            _ => panic!("expected project command"),
        }
    }

    #[test]
    fn cli_accepts_negative_publish_value() {
        let cli = Cli::try_parse_from([
            "freqsignals",
            "publish",
            "--symbol",
            "SPY",
            "--value",
            "-0.05",
            "--context",
            "rsi=40",
        ])
        .unwrap();
        match cli.command {
            Commands::Publish { value, context, .. } => {
                assert_eq!(value, -0.05);
                assert_eq!(context.len(), 1);
            }
            _ => panic!("expected publish command"),
        }
    }
}
