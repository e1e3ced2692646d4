use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::{Style, Term};
use llm_prices_core::{
    extract_usage, AsyncSource, DataSnapshot, ModelInfo, ModelPrice, ModelPrices, PriceCalculation, Provenance,
    ProviderSelector, Rate, SourceConfig, Usage,
};
use rust_decimal::Decimal;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── Styles ───────────────────────────────────────────────────────────

#[rustfmt::skip]
fn s_header() -> Style { Style::new().color256(252).bold() }  // bright gray, bold
#[rustfmt::skip]
fn s_dim() -> Style    { Style::new().color256(248) }         // light gray
#[rustfmt::skip]
fn s_tree() -> Style   { Style::new().color256(245) }         // mid gray
#[rustfmt::skip]
fn s_hint() -> Style   { Style::new().color256(243) }         // soft gray
#[rustfmt::skip]
fn s_hot() -> Style    { Style::new().color256(114) }         // green
#[rustfmt::skip]
fn s_warm() -> Style   { Style::new().color256(214) }         // amber
#[rustfmt::skip]
fn s_err() -> Style    { Style::new().color256(167) }         // red
#[rustfmt::skip]
fn s_price() -> Style  { Style::new().color256(109) }         // teal
#[rustfmt::skip]
fn s_bold() -> Style   { Style::new().bold() }
#[rustfmt::skip]
fn s_label() -> Style  { Style::new().color256(146) }         // muted lavender

fn sep(width: usize) -> String {
    s_tree().apply_to("\u{2500}".repeat(width)).to_string()
}

fn fmt_usd(d: Decimal) -> String {
    format!("${}", d.round_dp(8).normalize())
}

fn fmt_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}k", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

// ── CLI Args ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "llm-prices",
    about = "Calculate what an LLM API call costs from its token usage",
    version,
    after_help = "examples:\n  \
        llm-prices calc gpt-4o --input 1000 --output 100\n  \
        llm-prices calc gemini-2.5-pro --provider gemini --input 250000\n  \
        llm-prices calc claude-sonnet-4 --url https://api.anthropic.com/v1/messages --input 5000\n  \
        llm-prices calc deepseek-chat --input 1000000 --at 2025-03-01T18:00:00Z\n  \
        llm-prices calc gpt-4o --input 1000 --auto-update --json\n  \
        llm-prices extract openai response.json --flavor chat\n  \
        llm-prices list                         (all providers)\n  \
        llm-prices list google                  (models and prices)\n  \
        llm-prices fetch                        (download the latest data)"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/llm-prices/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log refresh decisions to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Price one call.
    Calc {
        /// Model name as sent to or returned by the API
        model: String,
        /// Provider id or alias, e.g. openai, gemini
        #[arg(long, short, conflicts_with = "url")]
        provider: Option<String>,
        /// API URL the request went to
        #[arg(long, short)]
        url: Option<String>,
        #[command(flatten)]
        usage: UsageArgs,
        /// Request time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Download the latest prices before calculating
        #[arg(long)]
        auto_update: bool,
        #[arg(long, short)]
        json: bool,
    },
    /// Read usage from a saved API response and price it.
    Extract {
        /// Provider id or alias whose response format to read
        provider: String,
        /// JSON response body, `-` for stdin
        file: PathBuf,
        /// Which of the provider's API formats the response uses
        #[arg(long, short)]
        flavor: Option<String>,
        #[arg(long)]
        auto_update: bool,
        #[arg(long, short)]
        json: bool,
    },
    /// List providers, or the models and prices of one provider.
    List {
        provider: Option<String>,
        #[arg(long)]
        auto_update: bool,
    },
    /// Download the latest price data into the local cache.
    Fetch,
}

#[derive(clap::Args)]
struct UsageArgs {
    #[arg(long, short)]
    input: Option<u64>,
    #[arg(long, short)]
    output: Option<u64>,
    #[arg(long)]
    cache_read: Option<u64>,
    #[arg(long)]
    cache_write: Option<u64>,
    #[arg(long)]
    input_audio: Option<u64>,
    #[arg(long)]
    cache_audio_read: Option<u64>,
    #[arg(long)]
    output_audio: Option<u64>,
    #[arg(long)]
    requests: Option<u64>,
}

impl UsageArgs {
    fn to_usage(&self) -> Usage {
        Usage {
            input_tokens: self.input,
            output_tokens: self.output,
            cache_read_tokens: self.cache_read,
            cache_write_tokens: self.cache_write,
            input_audio_tokens: self.input_audio,
            cache_audio_read_tokens: self.cache_audio_read,
            output_audio_tokens: self.output_audio,
            requests: self.requests,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Calc {
            model,
            provider,
            url,
            usage,
            at,
            auto_update,
            json,
        } => {
            let selector = match (provider, url) {
                (Some(id), _) => Some(ProviderSelector::id(&id)),
                (None, Some(url)) => Some(ProviderSelector::api_url(&url)),
                (None, None) => None,
            };
            let snapshot = load_snapshot(&config, auto_update).await?;
            cmd_calc(&snapshot, &model, selector.as_ref(), &usage.to_usage(), at, json)?;
        }
        Commands::Extract {
            provider,
            file,
            flavor,
            auto_update,
            json,
        } => {
            let snapshot = load_snapshot(&config, auto_update).await?;
            cmd_extract(&snapshot, &provider, &file, flavor.as_deref(), json)?;
        }
        Commands::List { provider, auto_update } => {
            let snapshot = load_snapshot(&config, auto_update).await?;
            match provider {
                Some(id) => cmd_provider(&snapshot, &id)?,
                None => cmd_list(&snapshot),
            }
        }
        Commands::Fetch => {
            cmd_fetch(&config).await?;
        }
    }
    Ok(())
}

// ── Setup ────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "llm_prices_core=debug,warn" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SourceConfig> {
    let config = match path {
        Some(p) => SourceConfig::load(p)?.with_env_overrides(),
        None => SourceConfig::discover()?,
    };
    Ok(config)
}

/// Latest data when asked for, else whatever was last fetched, else the
/// bundled data.
async fn load_snapshot(config: &SourceConfig, auto_update: bool) -> anyhow::Result<Arc<DataSnapshot>> {
    if auto_update {
        let term = Term::stderr();
        term.write_line(&format!("{}", s_dim().apply_to("fetching latest prices...")))?;
        let fetched = AsyncSource::new(config.clone())?.fetch().await;
        term.clear_last_lines(1)?;
        match fetched {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => warn!(error = %e, "using local price data"),
        }
    }
    Ok(Arc::new(DataSnapshot::local()?))
}

// ── Calc ─────────────────────────────────────────────────────────────

fn cmd_calc(
    snapshot: &DataSnapshot,
    model: &str,
    selector: Option<&ProviderSelector>,
    usage: &Usage,
    at: Option<DateTime<Utc>>,
    json: bool,
) -> anyhow::Result<()> {
    if usage.is_empty() && usage.requests.is_none() {
        eprintln!(
            "{}",
            s_warm().apply_to("warning: no usage given, only per-request fees are counted")
        );
    }
    let calc = snapshot.calc(usage, model, selector, at)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&calc_json(&calc, usage))?);
    } else {
        print_calc(&calc, usage);
    }
    Ok(())
}

fn calc_json(calc: &PriceCalculation<'_>, usage: &Usage) -> serde_json::Value {
    serde_json::json!({
        "provider": calc.provider.id,
        "model": calc.model.id,
        "usage": usage,
        "input_price": calc.input_price,
        "output_price": calc.output_price,
        "total_price": calc.total_price,
        "auto_update_timestamp": calc.auto_update_timestamp,
    })
}

fn print_calc(calc: &PriceCalculation<'_>, usage: &Usage) {
    println!();
    println!(
        "{}  {}",
        s_bold().apply_to(calc.model.display_name()),
        s_dim().apply_to(format!("via {}", calc.provider.name))
    );
    println!("{}", sep(48));
    let counts = [
        ("input", usage.input_tokens),
        ("cache read", usage.cache_read_tokens),
        ("cache write", usage.cache_write_tokens),
        ("input audio", usage.input_audio_tokens),
        ("audio cached", usage.cache_audio_read_tokens),
        ("output", usage.output_tokens),
        ("output audio", usage.output_audio_tokens),
    ];
    for (label, count) in counts {
        if let Some(n) = count {
            println!("  {:<14} {}", s_label().apply_to(label), s_dim().apply_to(fmt_count(n)));
        }
    }
    if let Some(n) = usage.requests {
        println!("  {:<14} {}", s_label().apply_to("requests"), s_dim().apply_to(n));
    }
    println!("{}", sep(48));
    println!("  {:<14} {}", s_label().apply_to("input"), s_price().apply_to(fmt_usd(calc.input_price)));
    println!("  {:<14} {}", s_label().apply_to("output"), s_price().apply_to(fmt_usd(calc.output_price)));
    println!("  {:<14} {}", s_header().apply_to("total"), s_hot().apply_to(fmt_usd(calc.total_price)));
    println!("{}", sep(48));
    let source = match calc.auto_update_timestamp {
        Some(ts) => format!("  prices fetched {}", ts.format("%Y-%m-%d %H:%M UTC")),
        None => "  local prices".to_string(),
    };
    println!("{}", s_hint().apply_to(source));
    if let Some(comment) = calc.model.price_comments.as_deref().or(calc.provider.price_comments.as_deref()) {
        println!("{}", s_hint().apply_to(format!("  {comment}")));
    }
    println!();
}

// ── Extract ──────────────────────────────────────────────────────────

fn cmd_extract(
    snapshot: &DataSnapshot,
    provider: &str,
    file: &Path,
    flavor: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let text = if file == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?
    };
    let body: serde_json::Value = serde_json::from_str(&text).context("response is not JSON")?;

    let selector = ProviderSelector::id(provider);
    let owner = snapshot.provider_by(&selector)?;
    let (model, usage) = extract_usage(owner, &body, flavor)?;
    let calc = snapshot.calc(&usage, &model, Some(&selector), None)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&calc_json(&calc, &usage))?);
    } else {
        print_calc(&calc, &usage);
    }
    Ok(())
}

// ── List ─────────────────────────────────────────────────────────────

fn cmd_list(snapshot: &DataSnapshot) {
    println!();
    println!("{}", s_header().apply_to("providers"));
    println!("{}", sep(64));
    for p in snapshot.providers() {
        println!(
            "  {:<14} {:<18} {}",
            s_bold().apply_to(&p.id),
            s_dim().apply_to(&p.name),
            s_dim().apply_to(format!("{} models", p.models.len()))
        );
    }
    println!("{}", sep(64));
    let origin = match snapshot.provenance() {
        Provenance::Bundled => "local data".to_string(),
        Provenance::Fetched => format!("fetched {}", snapshot.created_at().format("%Y-%m-%d %H:%M UTC")),
    };
    println!(
        "{}",
        s_hint().apply_to(format!(
            "  {} providers   {origin}   llm-prices list <provider> for prices",
            snapshot.providers().len()
        ))
    );
    println!();
}

fn cmd_provider(snapshot: &DataSnapshot, id: &str) -> anyhow::Result<()> {
    let provider = snapshot.provider_by(&ProviderSelector::id(id))?;
    let now = Utc::now();

    println!();
    println!("{}  {}", s_bold().apply_to(&provider.name), s_dim().apply_to(&provider.id));
    if let Some(desc) = &provider.description {
        println!("{}", s_dim().apply_to(desc));
    }

    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("  Model").fg(Color::AnsiValue(243)),
        Cell::new("Input").fg(Color::AnsiValue(243)),
        Cell::new("Cache read").fg(Color::AnsiValue(243)),
        Cell::new("Output").fg(Color::AnsiValue(243)),
        Cell::new("Context").fg(Color::AnsiValue(243)),
        Cell::new("").fg(Color::AnsiValue(243)),
    ]);
    for m in &provider.models {
        let Some(price) = m.prices.at(now) else { continue };
        let name_color = if m.deprecated { Color::AnsiValue(245) } else { Color::AnsiValue(252) };
        table.add_row(vec![
            Cell::new(format!("  {}", m.id)).fg(name_color),
            Cell::new(fmt_rate(price.input_mtok.as_ref())).fg(Color::AnsiValue(109)),
            Cell::new(fmt_rate(price.cache_read_mtok.as_ref())).fg(Color::AnsiValue(248)),
            Cell::new(fmt_rate(price.output_mtok.as_ref())).fg(Color::AnsiValue(109)),
            Cell::new(m.context_window.map(fmt_count).unwrap_or_default()).fg(Color::AnsiValue(248)),
            Cell::new(model_notes(m, price)).fg(Color::AnsiValue(214)),
        ]);
    }
    println!("{}", sep(72));
    println!("{table}");
    println!("{}", sep(72));
    println!(
        "{}",
        s_hint().apply_to(format!("  {} models   prices in USD per million tokens", provider.models.len()))
    );
    if !provider.fallback_model_providers.is_empty() {
        println!(
            "{}",
            s_hint().apply_to(format!("  also serves models from {}", provider.fallback_model_providers.join(", ")))
        );
    }
    println!();
    Ok(())
}

fn fmt_rate(rate: Option<&Rate>) -> String {
    match rate {
        None => "-".to_string(),
        Some(Rate::Flat(p)) => fmt_usd(*p),
        Some(Rate::Tiered(t)) => {
            let top = t.tiers.last().map(|tier| tier.price).unwrap_or(t.base);
            format!("{} - {}", fmt_usd(t.base), fmt_usd(top))
        }
    }
}

fn model_notes(m: &ModelInfo, price: &ModelPrice) -> String {
    let mut notes = Vec::new();
    if matches!(m.prices, ModelPrices::Conditional(_)) {
        notes.push("time-based".to_string());
    }
    if let Some(fee) = price.requests_kcount {
        notes.push(format!("{}/1k req", fmt_usd(fee)));
    }
    if m.deprecated {
        notes.push("deprecated".to_string());
    }
    notes.join(", ")
}

// ── Fetch ────────────────────────────────────────────────────────────

async fn cmd_fetch(config: &SourceConfig) -> anyhow::Result<()> {
    let term = Term::stderr();
    term.write_line(&format!("{}", s_dim().apply_to("downloading latest prices...")))?;

    let result = match llm_prices_core::sync::sync_data(config).await {
        Ok(r) => r,
        Err(e) => {
            term.clear_last_lines(1)?;
            eprintln!("{}", s_err().apply_to(format!("error: {e}")));
            eprintln!("{}", s_dim().apply_to(format!("  source: {}", config.url)));
            std::process::exit(1);
        }
    };

    term.clear_last_lines(1)?;
    println!();
    println!("  {}", s_hot().apply_to("synced"));
    println!(
        "  {}",
        s_dim().apply_to(format!(
            "{} providers   {} models",
            result.provider_count, result.model_count
        ))
    );
    println!("  {}", s_hint().apply_to(format!("cached in {}", result.path.display())));
    println!();
    Ok(())
}
