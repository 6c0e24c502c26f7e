use crate::error::InvalidQueryValue;
use crate::loader::{
    CutoffTable, COL_GENDER, COL_PREDICTED_2025, COL_QUOTA, COL_RANK_2022, COL_RANK_2023,
    COL_RANK_2024, COL_SEAT_TYPE,
};
use crate::models::{ChanceTier, ClassifiedOffering, ProgramOffering, StudentQuery, Summary};
use regex::Regex;
use tracing::{debug, info, warn};

pub const HIGH_CHANCE_FACTOR: f64 = 0.70;
pub const GOOD_CHANCE_FACTOR: f64 = 0.90;
pub const TOUGH_CHANCE_FACTOR: f64 = 1.05;

pub const RANK_DISTRIBUTION_LIMIT: usize = 15;
pub const RANK_TREND_LIMIT: usize = 5;

/// Columns feeding the trend series, oldest first.
const TREND_COLUMNS: [&str; 4] = [COL_RANK_2022, COL_RANK_2023, COL_RANK_2024, COL_PREDICTED_2025];

#[derive(Debug, Clone, PartialEq)]
pub struct ChanceAnalysis {
    pub query: StudentQuery,
    /// Best chance first, then lowest predicted closing rank.
    pub classified: Vec<ClassifiedOffering>,
    pub summary: Summary,
    /// Why the query was refused before filtering, if it was.
    pub rejection: Option<InvalidQueryValue>,
}

impl ChanceAnalysis {
    fn rejected(query: &StudentQuery, rejection: InvalidQueryValue) -> Self {
        Self {
            query: query.clone(),
            classified: Vec::new(),
            summary: Summary::default(),
            rejection: Some(rejection),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.classified.is_empty()
    }
}

/// One bar of the predicted closing rank chart.
#[derive(Debug, Clone, PartialEq)]
pub struct RankBar {
    pub program_name: String,
    pub institute: String,
    pub predicted_closing_rank: f64,
}

/// One point of a program's closing rank trend line.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendPoint {
    pub program_name: String,
    pub year: u16,
    pub closing_rank: f64,
}

pub struct AdmissionAnalyzer<'a> {
    pub table: &'a CutoffTable,
}

impl<'a> AdmissionAnalyzer<'a> {
    pub fn new(table: &'a CutoffTable) -> Self {
        Self { table }
    }

    /// Reject queries the table can never match before filtering.
    pub fn validate_query(&self, query: &StudentQuery) -> Result<(), InvalidQueryValue> {
        if query.rank == 0 {
            return Err(InvalidQueryValue::NonPositiveRank);
        }

        let checks = [
            (COL_QUOTA, &query.quota, self.table.quota_options()),
            (COL_SEAT_TYPE, &query.seat_type, self.table.seat_type_options()),
            (COL_GENDER, &query.gender, self.table.gender_options()),
        ];
        for (column, value, known) in checks {
            if !known.contains(value) {
                return Err(InvalidQueryValue::UnknownCategory {
                    column,
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }

    /// Full pipeline: validate, filter, classify, sort, summarize.
    ///
    /// An invalid query yields an empty analysis instead of an error.
    pub fn analyze(&self, query: &StudentQuery) -> ChanceAnalysis {
        if let Err(err) = self.validate_query(query) {
            warn!(error = %err, "query cannot match any offering");
            return ChanceAnalysis::rejected(query, err);
        }

        let filtered = filter(self.table.offerings(), query);
        debug!(
            table_rows = self.table.len(),
            retained = filtered.len(),
            "offerings filtered"
        );

        let classified = classify_and_rank(filtered, query.rank);
        let summary = summarize(&classified);
        info!(
            rank = query.rank,
            matches = classified.len(),
            high = summary.high_count,
            good = summary.good_count,
            tough = summary.tough_count,
            none = summary.none_count,
            "admission chances computed"
        );

        ChanceAnalysis {
            query: query.clone(),
            classified,
            summary,
            rejection: None,
        }
    }
}

/// Bucket a student rank against a predicted closing rank.
///
/// Lower ranks are better. Each threshold is inclusive and the first match
/// wins, so a rank of exactly 70% of the prediction is still `High`.
pub fn classify(rank: u32, predicted_closing_rank: f64) -> ChanceTier {
    let rank = f64::from(rank);
    if rank <= HIGH_CHANCE_FACTOR * predicted_closing_rank {
        ChanceTier::High
    } else if rank <= GOOD_CHANCE_FACTOR * predicted_closing_rank {
        ChanceTier::Good
    } else if rank <= TOUGH_CHANCE_FACTOR * predicted_closing_rank {
        ChanceTier::Tough
    } else {
        ChanceTier::NoChance
    }
}

/// Keep the offerings that satisfy every active predicate, in table order.
pub fn filter(offerings: &[ProgramOffering], query: &StudentQuery) -> Vec<ProgramOffering> {
    let institute_filter = query.institute_filter().map(str::to_lowercase);
    let program_filter = query.program_filter().map(str::to_lowercase);
    let max_predicted_rank = query.max_predicted_rank().map(f64::from);

    offerings
        .iter()
        .filter(|o| o.quota == query.quota && o.seat_type == query.seat_type && o.gender == query.gender)
        .filter(|o| match &institute_filter {
            Some(needle) => o.institute.to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .filter(|o| match &program_filter {
            Some(needle) => o.program_name.to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .filter(|o| match max_predicted_rank {
            Some(max) => o.predicted_closing_rank_2025 <= max,
            None => true,
        })
        .cloned()
        .collect()
}

pub fn classify_and_rank(filtered: Vec<ProgramOffering>, student_rank: u32) -> Vec<ClassifiedOffering> {
    let mut classified: Vec<ClassifiedOffering> = filtered
        .into_iter()
        .map(|offering| {
            let tier = classify(student_rank, offering.predicted_closing_rank_2025);
            ClassifiedOffering::new(offering, tier)
        })
        .collect();

    // Stable, so equal keys keep table order
    classified.sort_by(|a, b| {
        a.chance_priority.cmp(&b.chance_priority).then_with(|| {
            a.offering
                .predicted_closing_rank_2025
                .total_cmp(&b.offering.predicted_closing_rank_2025)
        })
    });
    classified
}

pub fn summarize(classified: &[ClassifiedOffering]) -> Summary {
    let mut summary = Summary::default();
    for entry in classified {
        match entry.chance_tier {
            ChanceTier::High => summary.high_count += 1,
            ChanceTier::Good => summary.good_count += 1,
            ChanceTier::Tough => summary.tough_count += 1,
            ChanceTier::NoChance => summary.none_count += 1,
        }
    }
    summary.top_recommendation = classified.first().cloned();
    summary
}

/// Bar chart data: the `limit` most attainable programs by predicted rank.
pub fn rank_distribution(classified: &[ClassifiedOffering], limit: usize) -> Vec<RankBar> {
    let mut bars: Vec<RankBar> = classified
        .iter()
        .map(|entry| RankBar {
            program_name: entry.offering.program_name.clone(),
            institute: entry.offering.institute.clone(),
            predicted_closing_rank: entry.offering.predicted_closing_rank_2025,
        })
        .collect();

    bars.sort_by(|a, b| a.predicted_closing_rank.total_cmp(&b.predicted_closing_rank));
    bars.truncate(limit);
    bars
}

/// Trend chart data: the first `limit` recommendations, one point per year
/// that has a closing rank.
pub fn rank_trends(classified: &[ClassifiedOffering], limit: usize) -> Vec<TrendPoint> {
    let years: Vec<Option<u16>> = TREND_COLUMNS.iter().map(|column| year_of(column)).collect();

    classified
        .iter()
        .take(limit)
        .flat_map(|entry| {
            let program_name = &entry.offering.program_name;
            years
                .iter()
                .zip(entry.offering.rank_history())
                .filter_map(move |(year, rank)| {
                    Some(TrendPoint {
                        program_name: program_name.clone(),
                        year: (*year)?,
                        closing_rank: rank?,
                    })
                })
        })
        .collect()
}

fn year_of(column: &str) -> Option<u16> {
    let year_regex = Regex::new(r"(\d{4})").ok()?;
    year_regex
        .captures(column)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
}
