mod analyzer;
mod error;
mod loader;
mod logging;
mod models;
mod report;

use analyzer::AdmissionAnalyzer;
use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use loader::{CutoffTable, DataSource, TableLoader};
use models::{Config, DataSourceMode, StudentProfile, DEFAULT_DATA_FILE, PREDICTIONS_MIME_TYPE};
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const MAX_STUDENT_RANK: u32 = 500_000;

fn build_cli() -> Command {
    Command::new("college-predictor")
        .version("1.0")
        .about("Predicts college admission chances from closing rank cutoffs")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_FILE),
        )
        .arg(
            Arg::new("data")
                .long("data")
                .value_name("FILE")
                .help("Cutoff CSV file (overrides the configured source)")
                .conflicts_with("url"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .value_name("URL")
                .help("Fetch the cutoff CSV from a URL (overrides the configured source)"),
        )
        .arg(
            Arg::new("rank")
                .short('r')
                .long("rank")
                .value_name("N")
                .help("Your exam rank")
                .value_parser(value_parser!(u32).range(1..=MAX_STUDENT_RANK as i64)),
        )
        .arg(Arg::new("quota").long("quota").value_name("QUOTA").help("Quota, e.g. AI, HS, OS"))
        .arg(
            Arg::new("seat-type")
                .long("seat-type")
                .value_name("SEAT")
                .help("Seat type, e.g. OPEN, OBC-NCL"),
        )
        .arg(Arg::new("gender").long("gender").value_name("GENDER").help("Gender category"))
        .arg(
            Arg::new("institute")
                .long("institute")
                .value_name("TEXT")
                .help("Only institutes containing this text (case-insensitive)"),
        )
        .arg(
            Arg::new("program")
                .long("program")
                .value_name("TEXT")
                .help("Only programs containing this text (case-insensitive)"),
        )
        .arg(
            Arg::new("max-predicted-rank")
                .long("max-predicted-rank")
                .value_name("N")
                .help("Maximum predicted closing rank, 0 for no limit")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory"),
        )
        .arg(
            Arg::new("list-options")
                .long("list-options")
                .help("List the quota, seat type and gender values in the data and exit")
                .action(ArgAction::SetTrue),
        )
}

/// Command line source wins over the configured one.
fn resolve_source(config: &Config, matches: &ArgMatches) -> Result<DataSource> {
    if let Some(path) = matches.get_one::<String>("data") {
        return Ok(DataSource::File(PathBuf::from(path)));
    }
    if let Some(url) = matches.get_one::<String>("url") {
        return Ok(DataSource::Url(url.clone()));
    }

    match config.data_source_mode {
        DataSourceMode::Local => Ok(DataSource::File(PathBuf::from(
            config.data_file.as_deref().unwrap_or(DEFAULT_DATA_FILE),
        ))),
        DataSourceMode::Internet => config
            .data_url
            .clone()
            .map(DataSource::Url)
            .ok_or_else(|| {
                anyhow::Error::from(error::DataLoadError::NoSource("data_url is not set".to_string()))
            }),
    }
}

fn apply_overrides(profile: &StudentProfile, matches: &ArgMatches) -> StudentProfile {
    let mut profile = profile.clone();

    if let Some(rank) = matches.get_one::<u32>("rank") {
        profile.rank = *rank;
    }
    if let Some(quota) = matches.get_one::<String>("quota") {
        profile.quota = quota.clone();
    }
    if let Some(seat_type) = matches.get_one::<String>("seat-type") {
        profile.seat_type = seat_type.clone();
    }
    if let Some(gender) = matches.get_one::<String>("gender") {
        profile.gender = gender.clone();
    }
    if let Some(institute) = matches.get_one::<String>("institute") {
        profile.institute_filter = institute.clone();
    }
    if let Some(program) = matches.get_one::<String>("program") {
        profile.program_filter = program.clone();
    }
    if let Some(max) = matches.get_one::<u32>("max-predicted-rank") {
        profile.max_predicted_rank = *max;
    }

    profile
}

fn print_options(table: &CutoffTable) {
    println!("📋 Available values in the cutoff table:");
    println!("   Quota: {}", table.quota_options().join(", "));
    println!("   Seat Type: {}", table.seat_type_options().join(", "));
    println!("   Gender: {}", table.gender_options().join(", "));
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let matches = build_cli().get_matches();
    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_FILE);

    // Load or create configuration
    let config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration: {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        Config::default().save_to_file(config_file)?;
        println!(
            "⚠️  Please edit {} and set your rank and categories, then run the program again.",
            config_file
        );
        return Ok(());
    };

    let source = resolve_source(&config, &matches)?;
    let loader = TableLoader::new();

    println!("📂 Reading cutoff data from: {}", source);
    let table = match loader::cached_table(&loader, &source).await {
        Ok(table) => table,
        Err(err) => {
            tracing::error!(source = %source, error = %err, "cutoff table unavailable");
            println!("❌ Error loading data: {}", err);
            println!(
                "   Please make sure the '{}' file is available and has the required columns.",
                source
            );
            return Err(err).context("cutoff table could not be loaded");
        }
    };

    if table.skipped_rows() > 0 {
        println!("   ⚠️  Skipped {} invalid rows", table.skipped_rows());
        for row in table.rejected_rows().iter().take(5) {
            println!("      line {}: {}", row.line, row.reason);
        }
    }
    println!("   ✅ Loaded {} program offerings", table.len());

    if matches.get_flag("list-options") {
        print_options(table);
        return Ok(());
    }

    let query = apply_overrides(&config.student, &matches).to_query();
    let analyzer = AdmissionAnalyzer::new(table);

    println!(
        "🔍 Rank {} | Quota {} | Seat Type {} | Gender {}",
        query.rank, query.quota, query.seat_type, query.gender
    );
    let analysis = analyzer.analyze(&query);
    if let Some(rejection) = &analysis.rejection {
        println!("❌ {}", rejection);
        print_options(table);
    }
    if analysis.is_empty() {
        println!("⚠️  No matching programs found. Try changing your inputs.");
        return Ok(());
    }

    report::print_summary(&analysis);

    let output_dir = config.output_directory.as_deref().unwrap_or("output");
    let output_dir = matches
        .get_one::<String>("output")
        .map(String::as_str)
        .unwrap_or(output_dir);

    let written = report::write_outputs(&analysis, Path::new(output_dir))?;
    info!(mime = PREDICTIONS_MIME_TYPE, "prediction download ready");

    println!("\n✅ Analysis complete!");
    for path in written {
        println!("📄 {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_for(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["college-predictor"];
        argv.extend_from_slice(args);
        build_cli().try_get_matches_from(argv).unwrap()
    }

    #[test]
    fn cli_overrides_profile_fields() {
        let matches = matches_for(&[
            "--rank",
            "4321",
            "--quota",
            "HS",
            "--program",
            "computer",
            "--max-predicted-rank",
            "9000",
        ]);
        let profile = apply_overrides(&Config::default().student, &matches);

        assert_eq!(profile.rank, 4321);
        assert_eq!(profile.quota, "HS");
        assert_eq!(profile.seat_type, "OPEN");
        assert_eq!(profile.program_filter, "computer");
        assert_eq!(profile.to_query().max_predicted_rank, Some(9000));
    }

    #[test]
    fn rank_outside_accepted_range_is_rejected() {
        assert!(build_cli().try_get_matches_from(["college-predictor", "--rank", "0"]).is_err());
        assert!(build_cli()
            .try_get_matches_from(["college-predictor", "--rank", "500001"])
            .is_err());
    }

    #[test]
    fn data_and_url_are_exclusive() {
        let result = build_cli().try_get_matches_from([
            "college-predictor",
            "--data",
            "a.csv",
            "--url",
            "https://example.com/a.csv",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn source_follows_flags_then_config() {
        let config = Config::default();
        assert_eq!(
            resolve_source(&config, &matches_for(&[])).unwrap(),
            DataSource::File(PathBuf::from(DEFAULT_DATA_FILE))
        );
        assert_eq!(
            resolve_source(&config, &matches_for(&["--data", "cutoffs.csv"])).unwrap(),
            DataSource::File(PathBuf::from("cutoffs.csv"))
        );

        let mut internet = Config::default();
        internet.data_source_mode = DataSourceMode::Internet;
        internet.data_url = None;
        assert!(resolve_source(&internet, &matches_for(&[])).is_err());
        assert_eq!(
            resolve_source(&internet, &matches_for(&["--url", "https://example.com/c.csv"])).unwrap(),
            DataSource::Url("https://example.com/c.csv".to_string())
        );
    }
}
