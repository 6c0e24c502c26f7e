use crate::analyzer::{
    rank_distribution, rank_trends, ChanceAnalysis, RANK_DISTRIBUTION_LIMIT, RANK_TREND_LIMIT,
};
use crate::models::{ChanceTier, ClassifiedOffering, PREDICTIONS_FILE_NAME};
use anyhow::{anyhow, Context, Result};
use csv::Writer;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const RANK_DISTRIBUTION_FILE_NAME: &str = "rank_distribution.csv";
pub const RANK_TRENDS_FILE_NAME: &str = "rank_trends.csv";
pub const SUMMARY_FILE_NAME: &str = "summary.txt";

pub const PREDICTION_HEADERS: [&str; 7] = [
    "Institute",
    "Program",
    "Rank 2022",
    "Rank 2023",
    "Rank 2024",
    "Predicted 2025",
    "Your Chance",
];

/// Serialize the user-facing columns of a classified sequence as CSV.
pub fn to_csv(classified: &[ClassifiedOffering]) -> Result<Vec<u8>> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(PREDICTION_HEADERS)?;

    for entry in classified {
        let offering = &entry.offering;
        writer.write_record([
            offering.institute.clone(),
            offering.program_name.clone(),
            optional_rank(offering.closing_rank_2022),
            optional_rank(offering.closing_rank_2023),
            optional_rank(offering.closing_rank_2024),
            offering.predicted_closing_rank_2025.to_string(),
            entry.chance_tier.label().to_string(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush CSV buffer: {}", err.error()))
}

fn optional_rank(rank: Option<u32>) -> String {
    rank.map(|r| r.to_string()).unwrap_or_default()
}

/// Write every result file for one analysis into `output_dir`.
pub fn write_outputs(analysis: &ChanceAnalysis, output_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    clean_output_directory(output_dir)?;

    let mut written = Vec::new();

    let predictions_path = output_dir.join(PREDICTIONS_FILE_NAME);
    fs::write(&predictions_path, to_csv(&analysis.classified)?)
        .with_context(|| format!("Failed to write {}", predictions_path.display()))?;
    written.push(predictions_path);

    written.push(generate_rank_distribution_csv(analysis, output_dir)?);
    written.push(generate_rank_trends_csv(analysis, output_dir)?);

    let summary_path = output_dir.join(SUMMARY_FILE_NAME);
    fs::write(&summary_path, render_summary(analysis))
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;
    written.push(summary_path);

    info!(files = written.len(), dir = %output_dir.display(), "results written");
    Ok(written)
}

fn generate_rank_distribution_csv(analysis: &ChanceAnalysis, output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join(RANK_DISTRIBUTION_FILE_NAME);
    let mut writer = Writer::from_path(&path)?;

    writer.write_record(["Program", "Institute", "Predicted Closing Rank 2025"])?;
    for bar in rank_distribution(&analysis.classified, RANK_DISTRIBUTION_LIMIT) {
        writer.write_record([
            bar.program_name,
            bar.institute,
            bar.predicted_closing_rank.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(path)
}

fn generate_rank_trends_csv(analysis: &ChanceAnalysis, output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join(RANK_TRENDS_FILE_NAME);
    let mut writer = Writer::from_path(&path)?;

    writer.write_record(["Program", "Year", "Closing Rank"])?;
    for point in rank_trends(&analysis.classified, RANK_TREND_LIMIT) {
        writer.write_record([
            point.program_name,
            point.year.to_string(),
            point.closing_rank.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(path)
}

fn clean_output_directory(output_dir: &Path) -> Result<()> {
    let items_to_clean = [
        PREDICTIONS_FILE_NAME,
        RANK_DISTRIBUTION_FILE_NAME,
        RANK_TRENDS_FILE_NAME,
        SUMMARY_FILE_NAME,
    ];

    for item in &items_to_clean {
        let item_path = output_dir.join(item);
        if item_path.exists() {
            debug!(path = %item_path.display(), "removing previous result");
            fs::remove_file(&item_path)
                .with_context(|| format!("Failed to remove {}", item_path.display()))?;
        }
    }

    Ok(())
}

fn tier_marker(tier: ChanceTier) -> &'static str {
    match tier {
        ChanceTier::High => "✅",
        ChanceTier::Good => "👍",
        ChanceTier::Tough => "⚠️",
        ChanceTier::NoChance => "❌",
    }
}

/// Plain-text summary: tier counts, top recommendation, result table.
pub fn render_summary(analysis: &ChanceAnalysis) -> String {
    let summary = &analysis.summary;
    let mut content = String::new();

    content.push_str(&format!("Summary for Rank {}\n", analysis.query.rank));
    content.push_str("==========================\n\n");
    content.push_str(&format!("Programs matched: {}\n", summary.total()));

    for tier in ChanceTier::ALL {
        content.push_str(&format!(
            "{} {}: {}\n",
            tier_marker(tier),
            tier.label(),
            summary.count_for(tier)
        ));
    }

    match &summary.top_recommendation {
        Some(top) => {
            content.push_str("\nTop Recommendation\n");
            content.push_str(&format!("   Institute: {}\n", top.offering.institute));
            content.push_str(&format!("   Program: {}\n", top.offering.program_name));
            content.push_str(&format!(
                "   Predicted Rank 2025: {}\n",
                top.offering.predicted_closing_rank_2025
            ));
            content.push_str(&format!("   Your Chance: {}\n", top.chance_tier));
        }
        None => {
            content.push_str("\n⚠️  No matching programs found. Try changing your inputs.\n");
            return content;
        }
    }

    content.push_str("\nDetailed Prediction Results\n");
    for (i, entry) in analysis.classified.iter().enumerate() {
        let offering = &entry.offering;
        content.push_str(&format!(
            "   {}. {} | {} | {} / {} / {} | predicted {} | {} {}\n",
            i + 1,
            offering.institute,
            offering.program_name,
            history_cell(offering.closing_rank_2022),
            history_cell(offering.closing_rank_2023),
            history_cell(offering.closing_rank_2024),
            offering.predicted_closing_rank_2025,
            tier_marker(entry.chance_tier),
            entry.chance_tier.label(),
        ));
    }

    content
}

fn history_cell(rank: Option<u32>) -> String {
    rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn print_summary(analysis: &ChanceAnalysis) {
    println!("\n📊 SUMMARY");
    println!("{}", render_summary(analysis));
}
