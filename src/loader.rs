use crate::error::{DataLoadError, RowError};
use crate::models::ProgramOffering;
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const COL_INSTITUTE: &str = "Institute";
pub const COL_PROGRAM: &str = "Academic Program Name";
pub const COL_QUOTA: &str = "Quota";
pub const COL_SEAT_TYPE: &str = "Seat Type";
pub const COL_GENDER: &str = "Gender";
pub const COL_RANK_2022: &str = "Closing Rank 2022";
pub const COL_RANK_2023: &str = "Closing Rank 2023";
pub const COL_RANK_2024: &str = "Closing Rank 2024";
pub const COL_PREDICTED_2025: &str = "Predicted Closing Rank 2025";

pub const REQUIRED_COLUMNS: [&str; 9] = [
    COL_INSTITUTE,
    COL_PROGRAM,
    COL_QUOTA,
    COL_SEAT_TYPE,
    COL_GENDER,
    COL_RANK_2022,
    COL_RANK_2023,
    COL_RANK_2024,
    COL_PREDICTED_2025,
];

static CUTOFF_TABLE: OnceCell<CutoffTable> = OnceCell::const_new();

/// Where the cutoff table comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    File(PathBuf),
    Url(String),
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::File(path) => write!(f, "{}", path.display()),
            DataSource::Url(url) => f.write_str(url),
        }
    }
}

/// Row shape as it sits in the CSV, before any validation.
#[derive(Debug, Deserialize)]
struct RawOfferingRow {
    #[serde(rename = "Institute")]
    institute: String,
    #[serde(rename = "Academic Program Name")]
    program_name: String,
    #[serde(rename = "Quota")]
    quota: String,
    #[serde(rename = "Seat Type")]
    seat_type: String,
    #[serde(rename = "Gender")]
    gender: String,
    #[serde(rename = "Closing Rank 2022")]
    closing_rank_2022: String,
    #[serde(rename = "Closing Rank 2023")]
    closing_rank_2023: String,
    #[serde(rename = "Closing Rank 2024")]
    closing_rank_2024: String,
    #[serde(rename = "Predicted Closing Rank 2025")]
    predicted_closing_rank_2025: String,
}

impl TryFrom<RawOfferingRow> for ProgramOffering {
    type Error = RowError;

    fn try_from(row: RawOfferingRow) -> Result<Self, Self::Error> {
        Ok(ProgramOffering {
            institute: required_text(COL_INSTITUTE, row.institute)?,
            program_name: required_text(COL_PROGRAM, row.program_name)?,
            quota: row.quota,
            seat_type: row.seat_type,
            gender: row.gender,
            closing_rank_2022: parse_historical_rank(COL_RANK_2022, &row.closing_rank_2022)?,
            closing_rank_2023: parse_historical_rank(COL_RANK_2023, &row.closing_rank_2023)?,
            closing_rank_2024: parse_historical_rank(COL_RANK_2024, &row.closing_rank_2024)?,
            predicted_closing_rank_2025: parse_predicted_rank(&row.predicted_closing_rank_2025)?,
        })
    }
}

fn required_text(field: &'static str, value: String) -> Result<String, RowError> {
    if value.is_empty() {
        Err(RowError::MissingField { field })
    } else {
        Ok(value)
    }
}

/// Blank means "no history for that year"; anything else must be a
/// positive whole number (`1234` or `1234.0`).
fn parse_historical_rank(field: &'static str, value: &str) -> Result<Option<u32>, RowError> {
    if value.is_empty() {
        return Ok(None);
    }

    let invalid = || RowError::InvalidRank {
        field,
        value: value.to_string(),
    };

    let rank = match value.parse::<u32>() {
        Ok(rank) => rank,
        Err(_) => {
            let float = value.parse::<f64>().map_err(|_| invalid())?;
            if !float.is_finite() || float.fract() != 0.0 || float > u32::MAX as f64 {
                return Err(invalid());
            }
            float as u32
        }
    };

    if rank == 0 {
        return Err(invalid());
    }
    Ok(Some(rank))
}

fn parse_predicted_rank(value: &str) -> Result<f64, RowError> {
    if value.is_empty() {
        return Err(RowError::MissingField {
            field: COL_PREDICTED_2025,
        });
    }

    match value.parse::<f64>() {
        Ok(rank) if rank.is_finite() && rank > 0.0 => Ok(rank),
        _ => Err(RowError::InvalidNumber {
            field: COL_PREDICTED_2025,
            value: value.to_string(),
        }),
    }
}

/// A source row left out of the table, by the line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub line: u64,
    pub reason: String,
}

/// Validated, read-only cutoff table.
#[derive(Debug, Clone)]
pub struct CutoffTable {
    offerings: Vec<ProgramOffering>,
    rejected: Vec<RejectedRow>,
}

impl CutoffTable {
    #[cfg(test)]
    pub fn from_offerings(offerings: Vec<ProgramOffering>) -> Self {
        Self {
            offerings,
            rejected: Vec::new(),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DataLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DataLoadError::FileNotFound(path.display().to_string()));
        }

        let file = File::open(path).map_err(|source| DataLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataLoadError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|column| !headers.iter().any(|header| header == **column))
            .map(|column| column.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DataLoadError::MissingColumns(missing));
        }

        let mut offerings = Vec::new();
        let mut rejected = Vec::new();

        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => return Err(err.into()),
                Err(err) => {
                    let line = err.position().map(|pos| pos.line()).unwrap_or_default();
                    warn!(line, error = %err, "skipping unreadable row");
                    rejected.push(RejectedRow {
                        line,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            // Quoted fields may span lines, so take the line from the reader
            let line = record.position().map(|pos| pos.line()).unwrap_or_default();
            let converted: Result<ProgramOffering, String> = record
                .deserialize(Some(&headers))
                .map_err(|err: csv::Error| err.to_string())
                .and_then(|raw: RawOfferingRow| {
                    ProgramOffering::try_from(raw).map_err(|err| err.to_string())
                });

            match converted {
                Ok(offering) => offerings.push(offering),
                Err(reason) => {
                    warn!(line, error = %reason, "skipping invalid row");
                    rejected.push(RejectedRow { line, reason });
                }
            }
        }

        if offerings.is_empty() {
            return Err(DataLoadError::EmptyTable {
                skipped: rejected.len(),
            });
        }

        debug!(rows = offerings.len(), skipped_rows = rejected.len(), "cutoff table parsed");
        Ok(Self {
            offerings,
            rejected,
        })
    }

    pub fn offerings(&self) -> &[ProgramOffering] {
        &self.offerings
    }

    pub fn len(&self) -> usize {
        self.offerings.len()
    }

    pub fn skipped_rows(&self) -> usize {
        self.rejected.len()
    }

    pub fn rejected_rows(&self) -> &[RejectedRow] {
        &self.rejected
    }

    pub fn quota_options(&self) -> Vec<String> {
        self.distinct(|o| &o.quota)
    }

    pub fn seat_type_options(&self) -> Vec<String> {
        self.distinct(|o| &o.seat_type)
    }

    pub fn gender_options(&self) -> Vec<String> {
        self.distinct(|o| &o.gender)
    }

    fn distinct<F>(&self, column: F) -> Vec<String>
    where
        F: Fn(&ProgramOffering) -> &String,
    {
        self.offerings
            .iter()
            .map(column)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect()
    }
}

pub struct TableLoader {
    client: reqwest::Client,
}

impl TableLoader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn load_file(&self, path: &Path) -> Result<CutoffTable, DataLoadError> {
        info!(path = %path.display(), "loading cutoff table");
        let table = CutoffTable::from_path(path)?;
        log_loaded(&table);
        Ok(table)
    }

    pub async fn load_url(&self, url: &str) -> Result<CutoffTable, DataLoadError> {
        info!(url, "fetching cutoff table");

        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|source| DataLoadError::Fetch {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(DataLoadError::HttpStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let body = response.bytes().await.map_err(|source| DataLoadError::Fetch {
            url: url.to_string(),
            source,
        })?;

        let table = CutoffTable::from_reader(&body[..])?;
        log_loaded(&table);
        Ok(table)
    }

    pub async fn load(&self, source: &DataSource) -> Result<CutoffTable, DataLoadError> {
        match source {
            DataSource::File(path) => self.load_file(path),
            DataSource::Url(url) => self.load_url(url).await,
        }
    }
}

impl Default for TableLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn log_loaded(table: &CutoffTable) {
    if table.skipped_rows() > 0 {
        warn!(
            rows = table.len(),
            skipped = table.skipped_rows(),
            "cutoff table loaded with rejected rows"
        );
    } else {
        info!(rows = table.len(), "cutoff table loaded");
    }
}

/// Process-wide table, loaded on first access and never replaced.
///
/// A failed load leaves the cache empty, so a later call retries.
pub async fn cached_table(
    loader: &TableLoader,
    source: &DataSource,
) -> Result<&'static CutoffTable, DataLoadError> {
    CUTOFF_TABLE.get_or_try_init(|| loader.load(source)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const HEADER: &str = "Institute,Academic Program Name,Quota,Seat Type,Gender,Closing Rank 2022,Closing Rank 2023,Closing Rank 2024,Predicted Closing Rank 2025";

    fn table_from(lines: &[&str]) -> Result<CutoffTable, DataLoadError> {
        let mut content = String::from(HEADER);
        for line in lines {
            content.push('\n');
            content.push_str(line);
        }
        CutoffTable::from_reader(content.as_bytes())
    }

    #[test]
    fn parses_typed_rows() {
        let table = table_from(&[
            "IIT Bombay,Computer Science and Engineering (4 Years),AI,OPEN,Gender-Neutral,67,68,66,65.5",
            "\"NIT Trichy, Tiruchirappalli\",Civil Engineering,HS,OBC-NCL,Female-only,,12040.0,11800,11650",
        ])
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.skipped_rows(), 0);

        let first = &table.offerings()[0];
        assert_eq!(first.institute, "IIT Bombay");
        assert_eq!(first.closing_rank_2022, Some(67));
        assert_eq!(first.predicted_closing_rank_2025, 65.5);

        let second = &table.offerings()[1];
        assert_eq!(second.institute, "NIT Trichy, Tiruchirappalli");
        assert_eq!(second.closing_rank_2022, None);
        assert_eq!(second.closing_rank_2023, Some(12040));
    }

    #[test]
    fn reports_every_missing_column() {
        let content = "Institute,Quota,Seat Type,Gender,Closing Rank 2022,Closing Rank 2023\nA,AI,OPEN,Gender-Neutral,1,2\n";
        match CutoffTable::from_reader(content.as_bytes()) {
            Err(DataLoadError::MissingColumns(missing)) => assert_eq!(
                missing,
                vec![
                    COL_PROGRAM.to_string(),
                    COL_RANK_2024.to_string(),
                    COL_PREDICTED_2025.to_string()
                ]
            ),
            other => panic!("expected missing columns, got {:?}", other),
        }
    }

    #[test]
    fn skips_rows_with_bad_predictions_or_ranks() {
        logging::init_test();
        let table = table_from(&[
            "A,Prog,AI,OPEN,Gender-Neutral,1,2,3,100",
            "B,Prog,AI,OPEN,Gender-Neutral,1,2,3,",
            "C,Prog,AI,OPEN,Gender-Neutral,1,2,3,abc",
            "D,Prog,AI,OPEN,Gender-Neutral,1,2,3,-5",
            "E,Prog,AI,OPEN,Gender-Neutral,12P,2,3,100",
            "F,Prog,AI,OPEN,Gender-Neutral,1,2,3,NaN",
            "G,Prog,AI,OPEN",
            ",Prog,AI,OPEN,Gender-Neutral,1,2,3,100",
        ])
        .unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.offerings()[0].institute, "A");
        assert_eq!(table.skipped_rows(), 7);
        let lines: Vec<u64> = table.rejected_rows().iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn rejected_lines_follow_multiline_records() {
        let table = table_from(&[
            "A,\"Computer Science\nand Engineering\",AI,OPEN,Gender-Neutral,1,2,3,100",
            "\"B\nCampus\nNorth\",Prog,AI,OPEN,Gender-Neutral,1,2,3,abc",
            "C,Prog,AI,OPEN",
        ])
        .unwrap();

        assert_eq!(table.offerings()[0].program_name, "Computer Science\nand Engineering");
        let rejected = table.rejected_rows();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].line, 4);
        assert!(rejected[0].reason.contains(COL_PREDICTED_2025));
        assert_eq!(rejected[1].line, 7);
    }

    #[test]
    fn rejects_table_without_valid_rows() {
        match table_from(&["A,Prog,AI,OPEN,Gender-Neutral,1,2,3,zero"]) {
            Err(DataLoadError::EmptyTable { skipped }) => assert_eq!(skipped, 1),
            other => panic!("expected empty table, got {:?}", other),
        }
    }

    #[test]
    fn ignores_extra_columns_and_padding() {
        let content = format!(
            "Round, {} ,Notes\n6, X , Y , AI , OPEN , Gender-Neutral , 10 , 20 , 30 , 40 ,late\n",
            HEADER
        );
        let table = CutoffTable::from_reader(content.as_bytes()).unwrap();
        let offering = &table.offerings()[0];
        assert_eq!(offering.institute, "X");
        assert_eq!(offering.quota, "AI");
        assert_eq!(offering.predicted_closing_rank_2025, 40.0);
    }

    #[test]
    fn options_are_sorted_and_distinct() {
        let table = table_from(&[
            "A,P,OS,OPEN,Gender-Neutral,1,2,3,4",
            "B,P,AI,SC,Female-only,1,2,3,4",
            "C,P,HS,OPEN,Gender-Neutral,1,2,3,4",
            "D,P,AI,EWS,Gender-Neutral,1,2,3,4",
        ])
        .unwrap();

        assert_eq!(table.quota_options(), vec!["AI", "HS", "OS"]);
        assert_eq!(table.seat_type_options(), vec!["EWS", "OPEN", "SC"]);
        assert_eq!(table.gender_options(), vec!["Female-only", "Gender-Neutral"]);
    }

    #[test]
    fn missing_file_is_reported() {
        let loader = TableLoader::new();
        let result = loader.load_file(Path::new("definitely_missing_cutoffs.csv"));
        assert!(matches!(result, Err(DataLoadError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn cache_keeps_the_first_table() {
        let mut first = NamedTempFile::new().unwrap();
        writeln!(first, "{}", HEADER).unwrap();
        writeln!(first, "A,P,AI,OPEN,Gender-Neutral,1,2,3,4").unwrap();

        let mut second = NamedTempFile::new().unwrap();
        writeln!(second, "{}", HEADER).unwrap();
        writeln!(second, "B,P,AI,OPEN,Gender-Neutral,1,2,3,4").unwrap();
        writeln!(second, "C,P,AI,OPEN,Gender-Neutral,1,2,3,4").unwrap();

        let loader = TableLoader::new();
        let missing = DataSource::File(PathBuf::from("definitely_missing_cutoffs.csv"));
        assert!(cached_table(&loader, &missing).await.is_err());

        let table = cached_table(&loader, &DataSource::File(first.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(table.len(), 1);

        let again = cached_table(&loader, &DataSource::File(second.path().to_path_buf()))
            .await
            .unwrap();
        assert!(std::ptr::eq(table, again));
        assert_eq!(again.offerings()[0].institute, "A");
    }

    fn local_loader() -> TableLoader {
        TableLoader {
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
        }
    }

    /// Answer a single HTTP request on a loopback port and return its URL.
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{}/predicted_cutoffs_2025_2.csv", addr)
    }

    #[tokio::test]
    async fn url_source_loads_csv_body() {
        let body = format!(
            "{}\nIIT Kharagpur,Mining Engineering,AI,OPEN,Gender-Neutral,5400,5600,5550,5700\n",
            HEADER
        );
        let url = serve_once("200 OK", body).await;

        let table = local_loader().load(&DataSource::Url(url)).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.offerings()[0].institute, "IIT Kharagpur");
        assert_eq!(table.offerings()[0].predicted_closing_rank_2025, 5700.0);
    }

    #[tokio::test]
    async fn url_error_status_is_reported() {
        let url = serve_once("404 Not Found", "missing".to_string()).await;

        match local_loader().load_url(&url).await {
            Err(DataLoadError::HttpStatus { url: failed, status }) => {
                assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
                assert_eq!(failed, url);
            }
            other => panic!("expected HTTP status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_url_is_a_fetch_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = local_loader()
            .load_url(&format!("http://{}/cutoffs.csv", addr))
            .await;
        assert!(matches!(result, Err(DataLoadError::Fetch { .. })));
    }
}
