use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_DATA_FILE: &str = "predicted_cutoffs_2025_2.csv";
pub const PREDICTIONS_FILE_NAME: &str = "college_predictions_2025.csv";
pub const PREDICTIONS_MIME_TYPE: &str = "text/csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Data source configuration
    pub data_source_mode: DataSourceMode,
    pub data_file: Option<String>,
    pub data_url: Option<String>,
    pub output_directory: Option<String>,
    pub student: StudentProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSourceMode {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "internet")]
    Internet,
}

/// Student section of the configuration file. Every field can be
/// overridden from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub rank: u32,
    pub quota: String,
    pub seat_type: String,
    pub gender: String,
    #[serde(default)]
    pub institute_filter: String,
    #[serde(default)]
    pub program_filter: String,
    #[serde(default)]
    pub max_predicted_rank: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_source_mode: DataSourceMode::Local,
            data_file: Some(DEFAULT_DATA_FILE.to_string()),
            data_url: Some(format!("https://example.com/{}", DEFAULT_DATA_FILE)),
            output_directory: Some("output".to_string()),
            student: StudentProfile {
                rank: 1000,
                quota: "AI".to_string(),
                seat_type: "OPEN".to_string(),
                gender: "Gender-Neutral".to_string(),
                institute_filter: String::new(),
                program_filter: String::new(),
                max_predicted_rank: 0,
            },
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }
}

impl StudentProfile {
    pub fn to_query(&self) -> StudentQuery {
        StudentQuery {
            rank: self.rank,
            quota: self.quota.clone(),
            seat_type: self.seat_type.clone(),
            gender: self.gender.clone(),
            institute_filter: non_empty(&self.institute_filter),
            program_filter: non_empty(&self.program_filter),
            max_predicted_rank: (self.max_predicted_rank > 0).then_some(self.max_predicted_rank),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// One row of the cutoff table after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramOffering {
    pub institute: String,
    pub program_name: String,
    pub quota: String,
    pub seat_type: String,
    pub gender: String,
    // Blank history cells are kept as None
    pub closing_rank_2022: Option<u32>,
    pub closing_rank_2023: Option<u32>,
    pub closing_rank_2024: Option<u32>,
    pub predicted_closing_rank_2025: f64,
}

impl ProgramOffering {
    /// Historical ranks followed by the prediction, oldest first.
    pub fn rank_history(&self) -> [Option<f64>; 4] {
        [
            self.closing_rank_2022.map(f64::from),
            self.closing_rank_2023.map(f64::from),
            self.closing_rank_2024.map(f64::from),
            Some(self.predicted_closing_rank_2025),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentQuery {
    pub rank: u32,
    pub quota: String,
    pub seat_type: String,
    pub gender: String,
    pub institute_filter: Option<String>,
    pub program_filter: Option<String>,
    /// `None` and `Some(0)` both mean unbounded.
    pub max_predicted_rank: Option<u32>,
}

impl StudentQuery {
    #[cfg(test)]
    pub fn new(rank: u32, quota: &str, seat_type: &str, gender: &str) -> Self {
        Self {
            rank,
            quota: quota.to_string(),
            seat_type: seat_type.to_string(),
            gender: gender.to_string(),
            institute_filter: None,
            program_filter: None,
            max_predicted_rank: None,
        }
    }

    pub fn institute_filter(&self) -> Option<&str> {
        self.institute_filter.as_deref().filter(|f| !f.is_empty())
    }

    pub fn program_filter(&self) -> Option<&str> {
        self.program_filter.as_deref().filter(|f| !f.is_empty())
    }

    pub fn max_predicted_rank(&self) -> Option<u32> {
        self.max_predicted_rank.filter(|&max| max > 0)
    }
}

/// Admission likelihood bucket. Declaration order is best chance first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChanceTier {
    High,
    Good,
    Tough,
    NoChance,
}

impl ChanceTier {
    pub const ALL: [ChanceTier; 4] = [
        ChanceTier::High,
        ChanceTier::Good,
        ChanceTier::Tough,
        ChanceTier::NoChance,
    ];

    pub fn priority(self) -> u8 {
        match self {
            ChanceTier::High => 1,
            ChanceTier::Good => 2,
            ChanceTier::Tough => 3,
            ChanceTier::NoChance => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChanceTier::High => "High Chance",
            ChanceTier::Good => "Good Chance",
            ChanceTier::Tough => "Tough Chance",
            ChanceTier::NoChance => "No Chance",
        }
    }

    #[cfg(test)]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.label() == label)
    }
}

impl fmt::Display for ChanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedOffering {
    pub offering: ProgramOffering,
    pub chance_tier: ChanceTier,
    pub chance_priority: u8,
}

impl ClassifiedOffering {
    pub fn new(offering: ProgramOffering, chance_tier: ChanceTier) -> Self {
        Self {
            offering,
            chance_tier,
            chance_priority: chance_tier.priority(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub high_count: usize,
    pub good_count: usize,
    pub tough_count: usize,
    pub none_count: usize,
    pub top_recommendation: Option<ClassifiedOffering>,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.high_count + self.good_count + self.tough_count + self.none_count
    }

    pub fn count_for(&self, tier: ChanceTier) -> usize {
        match tier {
            ChanceTier::High => self.high_count,
            ChanceTier::Good => self.good_count,
            ChanceTier::Tough => self.tough_count,
            ChanceTier::NoChance => self.none_count,
        }
    }
}
