use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use survey_pulse::config::{ConstructConfig, Settings, SourceKind, View};
use survey_pulse::convert::{Conversion, ConversionQueue, DateFormat, SourceTable};
use survey_pulse::db;
use survey_pulse::milestone::MilestoneChart;
use survey_pulse::models::OrgId;
use survey_pulse::orgs::OrgDirectory;
use survey_pulse::report::{self, ScatterSection};
use survey_pulse::scatter::{SelectorCatalog, SCORE_MAX, SCORE_MIN};
use survey_pulse::session::{AnalysisSession, RequestContext};
use survey_pulse::source::{CsvDirSource, RowSource};

#[derive(Parser)]
#[command(name = "survey-pulse")]
#[command(about = "Monthly survey analytics across partner organizations", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo survey rows for every organization
    Seed,
    /// Import a converted survey CSV for one organization
    Import {
        /// Locator template the file belongs to, e.g. orgdata/{org}_teacher_survey.csv
        #[arg(long)]
        locator: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Convert a raw survey export into the canonical layout
    Convert {
        #[arg(long)]
        input: PathBuf,
        /// Name part of the output file, written as <org>_<name>.csv
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0)]
        date_column: usize,
        #[arg(long, default_value_t = DateFormat::Mdy)]
        date_format: DateFormat,
        /// Source column mapped to question text, as COLUMN=TEXT
        #[arg(long = "map", value_name = "COLUMN=TEXT")]
        mappings: Vec<String>,
        /// Source columns kept under their own header
        #[arg(long = "select", value_delimiter = ',')]
        selected: Vec<usize>,
        /// Source rows left out of the output (0-based)
        #[arg(long = "exclude", value_delimiter = ',')]
        excluded: Vec<usize>,
        /// Cell corrections applied before converting, as ROW:COLUMN=VALUE
        #[arg(long = "edit", value_name = "ROW:COLUMN=VALUE")]
        edits: Vec<String>,
        /// Folder that receives <org>/<file>; only a preview is printed without it
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List organizations and the acting one
    Orgs,
    /// Monthly org and baseline series per survey set
    Trend,
    /// Whole-period org and peer scores per survey set
    Radar,
    /// Milestone series with optional goals
    Milestone {
        /// Goal as SET:CONDITION[@MONTH], e.g. "0:> 3.5" or "1:>= 4@May 2026"
        #[arg(long = "goal")]
        goals: Vec<String>,
    },
    /// Relationship between two measures
    Scatter {
        /// Print the available selector ids and exit
        #[arg(long)]
        list: bool,
        #[arg(long, required_unless_present = "list")]
        x: Option<String>,
        #[arg(long, required_unless_present = "list")]
        y: Option<String>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long = "goal")]
        goals: Vec<String>,
        #[arg(long, requires = "y")]
        x: Option<String>,
        #[arg(long, requires = "x")]
        y: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

async fn connect(settings: &Settings) -> anyhow::Result<PgPool> {
    let database_url = settings
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance")?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn row_source(settings: &Settings) -> anyhow::Result<Arc<dyn RowSource>> {
    Ok(match settings.source {
        SourceKind::Csv => Arc::new(CsvDirSource::new(&settings.data_dir)),
        SourceKind::Postgres => Arc::new(db::PgRowSource::new(connect(settings).await?)),
    })
}

async fn directory(settings: &Settings) -> OrgDirectory {
    match &settings.usermap {
        Some(path) => OrgDirectory::load(path).await,
        None => OrgDirectory::default(),
    }
}

struct Workspace {
    construct_id: String,
    construct: ConstructConfig,
    session: AnalysisSession,
    ctx: RequestContext,
}

async fn workspace(settings: &Settings) -> anyhow::Result<Workspace> {
    let catalog = settings.construct_catalog()?;
    let (construct_id, construct) = catalog.get(&settings.construct)?;
    let directory = directory(settings).await;
    let organizations = directory.all_org_ids();
    let acting = directory.resolve_current(settings.org.as_deref(), settings.user.as_deref());

    let session = AnalysisSession::new(row_source(settings).await?);
    let ctx = session.begin(&acting, &organizations, settings.baseline);
    Ok(Workspace {
        construct_id: construct_id.to_string(),
        construct: construct.clone(),
        session,
        ctx,
    })
}

fn superseded() -> anyhow::Error {
    anyhow!("request was superseded before it finished")
}

fn apply_goals(chart: &mut MilestoneChart, goals: &[String]) -> anyhow::Result<()> {
    for goal in goals {
        let (index, rest) = goal
            .split_once(':')
            .with_context(|| format!("goal {goal:?} must look like SET:CONDITION[@MONTH]"))?;
        let index: usize = index
            .trim()
            .parse()
            .with_context(|| format!("goal {goal:?} does not start with a set index"))?;
        let (condition, month) = match rest.split_once('@') {
            Some((condition, month)) => (condition, Some(month)),
            None => (rest, None),
        };
        chart.add_goal(index, condition, month)?;
    }
    Ok(())
}

fn format_value(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&settings).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&settings).await?;
            let catalog = settings.construct_catalog()?;
            let (construct_id, construct) = catalog.get(&settings.construct)?;
            let organizations = directory(&settings).await.all_org_ids();
            let inserted = db::seed(&pool, construct, &organizations).await?;
            println!(
                "Seeded {inserted} rows for {} organizations ({construct_id}).",
                organizations.len()
            );
        }
        Commands::Import { locator, csv } => {
            let pool = connect(&settings).await?;
            let directory = directory(&settings).await;
            let org = directory.resolve_current(settings.org.as_deref(), settings.user.as_deref());
            let locator = locator.replace("{org}", &org);
            let inserted = db::import_csv(&pool, &org, &locator, &csv).await?;
            println!("Imported {inserted} rows into {locator} from {}.", csv.display());
        }
        Commands::Convert {
            input,
            name,
            date_column,
            date_format,
            mappings,
            selected,
            excluded,
            edits,
            out,
        } => {
            let mut table = SourceTable::load(&input)?;
            for edit in &edits {
                let (cell, value) = edit
                    .split_once('=')
                    .with_context(|| format!("edit {edit:?} must look like ROW:COLUMN=VALUE"))?;
                let (row, column) = cell
                    .split_once(':')
                    .with_context(|| format!("edit {edit:?} must look like ROW:COLUMN=VALUE"))?;
                table.edit_cell(row.trim().parse()?, column.trim().parse()?, value)?;
            }

            let org: OrgId = match settings.org.as_deref() {
                Some(org) => org.to_string(),
                None => directory(&settings)
                    .await
                    .resolve_current(None, settings.user.as_deref()),
            };
            let mut conversion = Conversion::new(&org, &name);
            conversion.date_column = date_column;
            conversion.date_format = date_format;
            conversion.select_columns(&table, &selected);
            for mapping in &mappings {
                let (column, question) = mapping
                    .split_once('=')
                    .with_context(|| format!("mapping {mapping:?} must look like COLUMN=TEXT"))?;
                conversion.map_column(column.trim().parse()?, question);
            }
            for row in excluded {
                conversion.toggle_row_exclusion(row);
            }

            let converted = conversion.run(&table)?;
            println!("{} ({} rows)", converted.file_name, converted.rows.len());
            println!("{}", converted.headers.join(" | "));
            for row in converted.preview() {
                println!("{}", row.join(" | "));
            }

            if let Some(dir) = out {
                let mut queue = ConversionQueue::new();
                queue.push(converted);
                for path in queue.write_all(&dir)? {
                    println!("Wrote {}.", path.display());
                }
            }
        }
        Commands::Orgs => {
            let directory = directory(&settings).await;
            let acting = directory.resolve_current(settings.org.as_deref(), settings.user.as_deref());
            for org in directory.all_org_ids() {
                let marker = if org == acting { " (acting)" } else { "" };
                println!("- {org}{marker}");
            }
        }
        Commands::Trend => {
            let ws = workspace(&settings).await?;
            let sets = ws.construct.survey_sets(View::Overall);
            let view = ws.session.trend(&ws.ctx, sets).await.ok_or_else(superseded)?;

            if view.months.is_empty() {
                println!("No survey responses for {}.", view.organization);
                return Ok(());
            }
            println!(
                "{} vs {} ({}):",
                view.organization,
                view.policy.describe(),
                ws.construct_id
            );
            for set in &view.sets {
                println!("{}", set.label);
                for (index, month) in view.months.iter().enumerate() {
                    println!(
                        "  {:<15} org {:>5}  baseline {:>5}",
                        month.to_string(),
                        format_value(set.org[index]),
                        format_value(set.baseline[index])
                    );
                }
            }
        }
        Commands::Radar => {
            let ws = workspace(&settings).await?;
            let sets = ws.construct.survey_sets(View::Radar);
            let axes = ws.session.radar(&ws.ctx, sets).await.ok_or_else(superseded)?;
            for axis in axes {
                let marker = if axis.org_leads { "+" } else { "-" };
                println!(
                    "{marker} {}: org {} vs {}",
                    axis.label,
                    format_value(axis.org_score),
                    format_value(axis.peer_score)
                );
            }
        }
        Commands::Milestone { goals } => {
            let ws = workspace(&settings).await?;
            let sets = ws.construct.survey_sets(View::Milestone);
            let mut chart = ws
                .session
                .milestone_chart(&ws.ctx, sets)
                .await
                .ok_or_else(superseded)?;
            apply_goals(&mut chart, &goals)?;

            for (index, line) in chart.lines().iter().enumerate() {
                let values: Vec<String> = line.values.iter().map(|v| format_value(*v)).collect();
                println!("[{index}] {}: {}", line.label, values.join(" "));
            }
            let months: Vec<String> = chart.axis().iter().map(|m| m.to_string()).collect();
            println!("Months: {}", months.join(", "));
            for goal in chart.goals() {
                let at = goal
                    .marker
                    .month
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{} -> {} at {} ({:.2})", goal.label(), goal.state.note(), at, goal.marker.value);
            }
        }
        Commands::Scatter { list, x, y } => {
            let ws = workspace(&settings).await?;
            let catalog = SelectorCatalog::new(ws.construct.survey_sets(View::Scatter).to_vec());
            if list {
                for entry in catalog.entries() {
                    println!("{:<10} {} — {}", entry.id, entry.source, entry.question);
                }
                return Ok(());
            }
            let x = catalog.resolve(x.as_deref().unwrap_or_default())?;
            let y = catalog.resolve(y.as_deref().unwrap_or_default())?;
            let pairs = ws
                .session
                .pair_series(&ws.ctx, &catalog, x, y)
                .await?
                .ok_or_else(superseded)?;

            println!("Pairing by {:?}", pairs.pairing);
            for (who, points, fit) in [
                ("Org", &pairs.org_points, &pairs.org_fit),
                ("Peers", &pairs.peer_points, &pairs.peer_fit),
            ] {
                println!("{who}: {} points", points.len());
                for point in points {
                    println!("  ({:.2}, {:.2})", point.x, point.y);
                }
                if let Some(fit) = fit {
                    let [start, end] = fit.segment();
                    println!(
                        "  fit y = {:.3}x + {:.3}, from ({SCORE_MIN}, {:.2}) to ({SCORE_MAX}, {:.2})",
                        fit.slope, fit.intercept, start.1, end.1
                    );
                }
            }
        }
        Commands::Report { goals, x, y, out } => {
            let ws = workspace(&settings).await?;
            let trend = ws
                .session
                .trend(&ws.ctx, ws.construct.survey_sets(View::Overall))
                .await
                .ok_or_else(superseded)?;
            let radar = ws
                .session
                .radar(&ws.ctx, ws.construct.survey_sets(View::Radar))
                .await
                .ok_or_else(superseded)?;
            let mut chart = ws
                .session
                .milestone_chart(&ws.ctx, ws.construct.survey_sets(View::Milestone))
                .await
                .ok_or_else(superseded)?;
            apply_goals(&mut chart, &goals)?;

            let catalog = SelectorCatalog::new(ws.construct.survey_sets(View::Scatter).to_vec());
            let scatter = match (x, y) {
                (Some(x), Some(y)) => {
                    let (sx, sy) = (catalog.resolve(&x)?, catalog.resolve(&y)?);
                    let pairs = ws
                        .session
                        .pair_series(&ws.ctx, &catalog, sx, sy)
                        .await?
                        .ok_or_else(superseded)?;
                    Some((x, y, pairs))
                }
                _ => None,
            };

            let report = report::build_report(
                &ws.construct_id,
                &trend,
                &radar,
                &chart,
                scatter.as_ref().map(|(x, y, pairs)| ScatterSection {
                    x_label: x,
                    y_label: y,
                    pairs,
                }),
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
