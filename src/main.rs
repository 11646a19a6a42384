use clap::{Parser, Subcommand};
use payslip_extract::BoxError;
use payslip_extract::config::{Config, DEFAULT_CONFIG_PATH, VisionBackend};
use payslip_extract::payslip::{self, LineItem, ParseResult, ParserConfig, PayslipKind};
use payslip_extract::settings::{CustomItem, SettingsStore, SettingsUpdate, parse_custom_item};
use payslip_extract::source::{self, Mode, SourceDocument};
use payslip_extract::store::{self, PayslipStore};
use payslip_extract::vision::{TextRecognizer, VisionClient};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{Instrument, info, info_span};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "payslip", version, about = "Extract and keep Japanese payslip figures")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a document and print the result
    Parse {
        file: PathBuf,
        /// lines, totals or structured
        #[arg(long, default_value = "lines")]
        mode: Mode,
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Parse a document and store it
    Save {
        file: PathBuf,
        #[arg(long, default_value = "lines")]
        mode: Mode,
        /// YYYY-MM or YYYY-MM-DD; inferred from the text when omitted
        #[arg(long)]
        period: Option<String>,
        /// salary or bonus; inferred from the text when omitted
        #[arg(long)]
        kind: Option<PayslipKind>,
    },
    /// List stored payslips
    List,
    /// Show one stored payslip with its items
    Show { id: i64 },
    /// Delete a stored payslip
    Delete { id: i64 },
    /// Totals per year
    Summary,
    /// Net pay statistics
    Stats,
    /// Export every payslip as JSON
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show or change user settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Switch the vision backend and model in the config file
    SetModel { backend: VisionBackend, model: String },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        theme_color: Option<String>,
        #[arg(long)]
        dark_mode: Option<bool>,
        /// NAME=CATEGORY; replaces the custom item list when given
        #[arg(long = "item", value_parser = parse_custom_item)]
        items: Vec<CustomItem>,
    },
}

fn open_store(cfg: &Config) -> Result<PayslipStore, BoxError> {
    if let Some(parent) = Path::new(&cfg.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(PayslipStore::new(&cfg.db_path)?)
}

/// File tunables plus the user's category rules.
fn parser_config(cfg: &Config, db: &PayslipStore) -> Result<ParserConfig, BoxError> {
    Ok(db.load_settings()?.parser_config(cfg.parser_config()))
}

async fn parse_file(
    path: &Path,
    mode: Mode,
    cfg: &Config,
    parser: &ParserConfig,
) -> Result<(SourceDocument, ParseResult), BoxError> {
    let doc = SourceDocument::read(path)?;
    let span = info_span!("document", filename = %doc.filename);

    let result = async {
        let content = source::read_content(&doc)?;
        let client = if content.needs_vision() && cfg.vision.backend != VisionBackend::None {
            Some(VisionClient::connect(&cfg.vision).await?)
        } else {
            None
        };
        let recognizer = client.as_ref().map(|c| c as &dyn TextRecognizer);

        let result = source::parse_content(&content, mode, recognizer, parser).await?;
        info!(
            items = result.items.len(),
            attendance = result.attendance.len(),
            gross = ?result.gross_amount,
            deduction = ?result.deduction_amount,
            net = ?result.net_amount,
            warnings = result.warnings.len(),
            "Parse complete"
        );
        Ok::<_, BoxError>(result)
    }
    .instrument(span)
    .await?;

    Ok((doc, result))
}

fn amount(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn print_lines(items: &[LineItem], attendance: &BTreeMap<String, i64>) {
    for item in items {
        println!("{:<10} {:<20} {:>12}", item.category, item.name, item.amount);
    }
    for (name, value) in attendance {
        println!("{:<10} {:<20} {:>12}", "attendance", name, value);
    }
}

fn print_totals(gross: Option<i64>, deduction: Option<i64>, net: Option<i64>, warnings: &[String]) {
    println!("gross:     {}", amount(gross));
    println!("deduction: {}", amount(deduction));
    println!("net:       {}", amount(net));
    for warning in warnings {
        println!("warning: {warning}");
    }
}

fn print_result(result: &ParseResult) {
    print_lines(&result.items, &result.attendance);
    print_totals(
        result.gross_amount,
        result.deduction_amount,
        result.net_amount,
        &result.warnings,
    );
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)?;

    match cli.command {
        Command::Parse { file, mode, json } => {
            let db = open_store(&cfg)?;
            let parser = parser_config(&cfg, &db)?;
            let (_, result) = parse_file(&file, mode, &cfg, &parser).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Command::Save {
            file,
            mode,
            period,
            kind,
        } => {
            let db = open_store(&cfg)?;
            let parser = parser_config(&cfg, &db)?;
            let (doc, result) = parse_file(&file, mode, &cfg, &parser).await?;

            let period = match period {
                Some(p) => store::parse_period(&p).map_err(|e| format!("Invalid period {p:?}: {e}"))?,
                None => payslip::extract_period(&result.raw_text)
                    .ok_or("Could not find the pay period in the document; pass --period")?,
            };
            let kind = kind.unwrap_or_else(|| payslip::infer_kind(&result.raw_text));

            let id = db.save(&doc.filename, period, kind, &result)?;
            print_result(&result);
            println!("saved as #{id} ({period}, {})", kind.as_str());
        }
        Command::List => {
            let db = open_store(&cfg)?;
            for p in db.list()? {
                println!(
                    "#{:<4} {} {:<6} gross {:>10} deduction {:>10} net {:>10}  {}",
                    p.id,
                    p.period,
                    p.kind.as_str(),
                    amount(p.gross),
                    amount(p.deduction),
                    amount(p.net),
                    p.filename
                );
            }
        }
        Command::Show { id } => {
            let db = open_store(&cfg)?;
            let detail = db.get(id)?.ok_or_else(|| format!("No payslip with id {id}"))?;
            println!(
                "#{} {} {} ({})",
                detail.payslip.id,
                detail.payslip.period,
                detail.payslip.kind.as_str(),
                detail.payslip.filename
            );
            print_lines(&detail.items, &detail.attendance);
            let p = &detail.payslip;
            print_totals(p.gross, p.deduction, p.net, &p.warnings);
        }
        Command::Delete { id } => {
            let db = open_store(&cfg)?;
            if !db.delete(id)? {
                return Err(format!("No payslip with id {id}").into());
            }
            info!(id, "Payslip deleted");
        }
        Command::Summary => {
            let db = open_store(&cfg)?;
            for year in db.summary_by_year()? {
                println!(
                    "{}  {:>3} slips  gross {:>12}  deduction {:>12}  net {:>12}",
                    year.year, year.count, year.gross, year.deduction, year.net
                );
            }
        }
        Command::Stats => {
            let db = open_store(&cfg)?;
            let stats = db.net_stats()?;
            println!("count:   {}", stats.count);
            println!(
                "average: {}",
                stats
                    .average
                    .map_or_else(|| "-".to_string(), |a| format!("{a:.0}"))
            );
            println!("max:     {}", amount(stats.max));
            println!("min:     {}", amount(stats.min));
        }
        Command::Export { output } => {
            let db = open_store(&cfg)?;
            let payslips = db.export()?;
            let json = serde_json::to_string_pretty(&payslips)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    info!(count = payslips.len(), path = %path.display(), "Exported");
                }
                None => println!("{json}"),
            }
        }
        Command::Settings { action } => {
            let db = open_store(&cfg)?;
            let settings = match action {
                SettingsAction::Show => db.load_settings()?,
                SettingsAction::Set {
                    theme_color,
                    dark_mode,
                    items,
                } => db.update_settings(SettingsUpdate {
                    theme_color,
                    dark_mode,
                    items: (!items.is_empty()).then_some(items),
                })?,
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::SetModel { backend, model } => {
            Config::update_vision_model(&cli.config, backend, &model)?;
            info!(backend = backend.as_str(), model = %model, "Vision model updated");
        }
    }

    Ok(())
}
