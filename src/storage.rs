//! Result persistence.
//!
//! Each `series` blob is
//!   [0..2]   schema version: u16 (LE)
//!   [2]      layout: u8 (0 = values, 1 = (t, value) pairs)
//!   [3..11]  element count: u64 (LE)
//!   [11..]   f64 (LE) payload, `count` or `2 * count` numbers
//!
//! Blobs live in an SQLite file with the tables `Vectors`, `SynVectors`,
//! `Timeseries` and a `Meta` table carrying the schema version.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;
use rusqlite::{params, Connection};
use simple_error::{SimpleError, SimpleResult};

use crate::error::{Result, SpineSyncError};
use crate::recorder::{StorageRecords, SynVectorRecord, TimeseriesRecord, VectorRecord};
use crate::stimulus::StimulusEvent;

pub const SCHEMA_VERSION: u16 = 1;
pub const DB_NAME: &str = "storage.sqlite";
pub const LOG_NAME: &str = "log.txt";

const LAYOUT_VALUES: u8 = 0;
const LAYOUT_PAIRS: u8 = 1;
const HEADER_LEN: usize = 11;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS Vectors (var TEXT NOT NULL, sec_name TEXT, vec BLOB NOT NULL);
CREATE TABLE IF NOT EXISTS SynVectors (var TEXT NOT NULL, chan_type TEXT NOT NULL,
    sec_name TEXT NOT NULL, vec BLOB NOT NULL);
CREATE TABLE IF NOT EXISTS Timeseries (var TEXT NOT NULL, pos REAL NOT NULL,
    parent TEXT NOT NULL, sec_name TEXT NOT NULL, vec BLOB NOT NULL);
";

fn write_header(w: &mut Vec<u8>, layout: u8, count: usize) {
    w.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    w.push(layout);
    w.extend_from_slice(&(count as u64).to_le_bytes());
}

pub fn encode_values(values: &[f64]) -> Vec<u8> {
    let mut w = Vec::with_capacity(HEADER_LEN + values.len() * 8);
    write_header(&mut w, LAYOUT_VALUES, values.len());
    for value in values {
        w.extend_from_slice(&value.to_le_bytes());
    }
    w
}

pub fn encode_pairs(pairs: &[(f64, f64)]) -> Vec<u8> {
    let mut w = Vec::with_capacity(HEADER_LEN + pairs.len() * 16);
    write_header(&mut w, LAYOUT_PAIRS, pairs.len());
    for (t, value) in pairs {
        w.extend_from_slice(&t.to_le_bytes());
        w.extend_from_slice(&value.to_le_bytes());
    }
    w
}

fn read_header(blob: &[u8], expected_layout: u8) -> SimpleResult<usize> {
    if blob.len() < HEADER_LEN {
        return Err(SimpleError::new("series blob is shorter than its header"));
    }

    let version = u16::from_le_bytes([blob[0], blob[1]]);
    if version != SCHEMA_VERSION {
        return Err(SimpleError::new(format!(
            "unsupported series schema version: {}",
            version
        )));
    }

    let layout = blob[2];
    if layout != expected_layout {
        return Err(SimpleError::new(format!(
            "unexpected series layout: {} (expected {})",
            layout, expected_layout
        )));
    }

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&blob[3..HEADER_LEN]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let numbers_per_element = if layout == LAYOUT_PAIRS { 2 } else { 1 };
    let expected_len = count
        .checked_mul(8 * numbers_per_element)
        .and_then(|payload| payload.checked_add(HEADER_LEN));

    if expected_len != Some(blob.len()) {
        return Err(SimpleError::new(format!(
            "series blob length {} does not match element count {}",
            blob.len(),
            count
        )));
    }

    Ok(count)
}

fn read_f64s(payload: &[u8]) -> impl Iterator<Item = f64> + '_ {
    payload.chunks_exact(8).map(|chunk| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        f64::from_le_bytes(bytes)
    })
}

pub fn decode_values(blob: &[u8]) -> SimpleResult<Vec<f64>> {
    read_header(blob, LAYOUT_VALUES)?;
    Ok(read_f64s(&blob[HEADER_LEN..]).collect())
}

pub fn decode_pairs(blob: &[u8]) -> SimpleResult<Vec<(f64, f64)>> {
    read_header(blob, LAYOUT_PAIRS)?;
    let numbers: Vec<f64> = read_f64s(&blob[HEADER_LEN..]).collect();
    Ok(numbers
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect())
}

/// Everything `log.txt` describes. Times are in the units the user typed:
/// seconds, except `dt_neuron` in milliseconds.
#[derive(Debug, Clone)]
pub struct RunLog {
    pub t_stop: f64,
    pub calcium_sampling: f64,
    pub dt_neuron: f64,
    pub t_equilibrium: f64,
    pub stimuli: Vec<StimulusEvent>,
}

impl RunLog {
    pub fn render(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = writeln!(out, "tStop [s]: {:.6}", self.t_stop);
        let _ = writeln!(out, "calciumSampling [s]: {:.6}", self.calcium_sampling);
        let _ = writeln!(out, "dtNeuron [ms]: {:.6}", self.dt_neuron);
        let _ = writeln!(out, "tEquilibrium [s]: {:.6}", self.t_equilibrium);
        for stimulus in &self.stimuli {
            out.push_str(&stimulus.to_log());
        }
        out
    }
}

pub fn write_run_log(dir: &Path, run_log: &RunLog) -> Result<PathBuf> {
    let path = dir.join(LOG_NAME);
    fs::write(&path, run_log.render())?;
    Ok(path)
}

/// Creates a fresh, timestamped directory below `parent`.
pub fn create_results_dir(parent: &Path) -> Result<PathBuf> {
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

    for attempt in 0..1000 {
        let name = if attempt == 0 {
            stamp.clone()
        } else {
            format!("{}_{}", stamp, attempt)
        };
        let dir = parent.join(name);

        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(SpineSyncError::Storage(format!(
        "could not create a results directory in {}",
        parent.display()
    )))
}

pub fn persist(db_path: &Path, records: &StorageRecords) -> Result<()> {
    let mut conn = Connection::open(db_path)?;
    conn.execute_batch(SCHEMA)?;

    let tx = conn.transaction()?;

    tx.execute(
        "INSERT OR REPLACE INTO Meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;

    {
        let mut stmt = tx.prepare("INSERT INTO Vectors (var, sec_name, vec) VALUES (?1, ?2, ?3)")?;
        for record in &records.vectors {
            stmt.execute(params![
                record.variable,
                record.section_name,
                encode_values(&record.series)
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO SynVectors (var, chan_type, sec_name, vec) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for record in &records.syn_vectors {
            stmt.execute(params![
                record.variable,
                record.channel_type,
                record.section_name,
                encode_values(&record.series)
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO Timeseries (var, pos, parent, sec_name, vec) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for record in &records.timeseries {
            stmt.execute(params![
                record.variable,
                record.position,
                record.parent_section,
                record.section_name,
                encode_pairs(&record.series)
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

pub fn load(db_path: &Path) -> Result<StorageRecords> {
    let conn = Connection::open(db_path)?;

    let version: String = conn.query_row(
        "SELECT value FROM Meta WHERE key = 'schema_version'",
        [],
        |row| row.get(0),
    )?;

    if version != SCHEMA_VERSION.to_string() {
        return Err(SpineSyncError::Storage(format!(
            "unsupported storage schema version: {}",
            version
        )));
    }

    let decode_err = |err: SimpleError| SpineSyncError::Storage(err.to_string());

    let mut records = StorageRecords::default();

    let mut stmt = conn.prepare("SELECT var, sec_name, vec FROM Vectors ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Vec<u8>>(2)?,
        ))
    })?;
    for row in rows {
        let (variable, section_name, blob) = row?;
        records.vectors.push(VectorRecord {
            variable,
            section_name,
            series: decode_values(&blob).map_err(decode_err)?,
        });
    }

    let mut stmt =
        conn.prepare("SELECT var, chan_type, sec_name, vec FROM SynVectors ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Vec<u8>>(3)?,
        ))
    })?;
    for row in rows {
        let (variable, channel_type, section_name, blob) = row?;
        records.syn_vectors.push(SynVectorRecord {
            variable,
            channel_type,
            section_name,
            series: decode_values(&blob).map_err(decode_err)?,
        });
    }

    let mut stmt = conn
        .prepare("SELECT var, pos, parent, sec_name, vec FROM Timeseries ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Vec<u8>>(4)?,
        ))
    })?;
    for row in rows {
        let (variable, position, parent_section, section_name, blob) = row?;
        records.timeseries.push(TimeseriesRecord {
            variable,
            position,
            parent_section,
            section_name,
            series: decode_pairs(&blob).map_err(decode_err)?,
        });
    }

    Ok(records)
}

/// Writes `log.txt` and then `storage.sqlite` into a new directory under
/// `parent`. The log is on disk before the database is touched; on a storage
/// failure the caller still holds `records` and may retry with [`persist`].
pub fn save_results(parent: &Path, records: &StorageRecords, run_log: &RunLog) -> Result<PathBuf> {
    let dir = create_results_dir(parent)?;
    write_run_log(&dir, run_log)?;
    persist(&dir.join(DB_NAME), records)?;

    info!("results saved in {}", dir.display());
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stimulus::StimulusTarget;

    fn sample_records() -> StorageRecords {
        StorageRecords {
            vectors: vec![
                VectorRecord {
                    variable: "t".to_string(),
                    section_name: None,
                    series: vec![0.0, 0.025, 0.05],
                },
                VectorRecord {
                    variable: "v".to_string(),
                    section_name: Some("soma".to_string()),
                    series: vec![-70.0, -69.5, f64::MIN_POSITIVE],
                },
            ],
            syn_vectors: vec![SynVectorRecord {
                variable: "weight".to_string(),
                channel_type: "ampa".to_string(),
                section_name: "spine0_head".to_string(),
                series: vec![1.0, 1.5, 1.0 / 3.0],
            }],
            timeseries: vec![TimeseriesRecord {
                variable: "CaMKIIbar".to_string(),
                position: 0.3,
                parent_section: "dend".to_string(),
                section_name: "spine0".to_string(),
                series: vec![(0.001, 0.1), (0.002, std::f64::consts::PI)],
            }],
        }
    }

    #[test]
    fn values_codec() {
        let values = [0.1, -2.5e-300, f64::MAX, 0.0, -0.0];
        let blob = encode_values(&values);
        assert_eq!(blob.len(), HEADER_LEN + 5 * 8);
        assert_eq!(&blob[0..2], &SCHEMA_VERSION.to_le_bytes());

        let decoded = decode_values(&blob).unwrap();
        for (a, b) in decoded.iter().zip(values.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn layout_mismatch_rejected() {
        let blob = encode_pairs(&[(0.0, 1.0)]);
        let result = decode_values(&blob);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().as_str(),
            "unexpected series layout: 1 (expected 0)"
        );
    }

    #[test]
    fn truncated_blob_rejected() {
        let mut blob = encode_values(&[1.0, 2.0]);
        blob.pop();
        assert!(decode_values(&blob).is_err());
        assert!(decode_values(&blob[..4]).is_err());
    }

    #[test]
    fn unknown_version_rejected() {
        let mut blob = encode_values(&[1.0]);
        blob[0] = 9;
        let result = decode_values(&blob);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().as_str(),
            "unsupported series schema version: 9"
        );
    }

    #[test]
    fn persisted_records_reload_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(DB_NAME);
        let records = sample_records();

        persist(&db_path, &records).unwrap();
        let reloaded = load(&db_path).unwrap();

        assert_eq!(reloaded, records);
        assert_eq!(
            reloaded.timeseries("CaMKIIbar", 0.3, "dend", "spine0").unwrap(),
            [(0.001, 0.1), (0.002, std::f64::consts::PI)]
        );
        assert_eq!(reloaded.time_base().unwrap(), [0.0, 0.025, 0.05]);
    }

    #[test]
    fn run_log_lines() {
        let run_log = RunLog {
            t_stop: 2.0,
            calcium_sampling: 0.001,
            dt_neuron: 0.025,
            t_equilibrium: 0.0,
            stimuli: vec![StimulusEvent {
                onset: 1000.0,
                duration: 1.0,
                target: StimulusTarget::electrical("spine0_head", "ampa", "drive"),
                amplitude: 1.0,
                baseline: 0.0,
            }],
        };

        let lines: Vec<String> = run_log.render().lines().map(String::from).collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "tStop [s]: 2.000000");
        assert_eq!(lines[1], "calciumSampling [s]: 0.001000");
        assert_eq!(lines[2], "dtNeuron [ms]: 0.025000");
        assert_eq!(lines[3], "tEquilibrium [s]: 0.000000");
        assert!(lines[4].starts_with("Stimulus target: spine0_head.ampa.drive"));
    }

    #[test]
    fn save_writes_log_and_database() {
        let parent = tempfile::tempdir().unwrap();
        let records = sample_records();
        let run_log = RunLog {
            t_stop: 1.0,
            calcium_sampling: 0.001,
            dt_neuron: 0.025,
            t_equilibrium: 0.0,
            stimuli: Vec::new(),
        };

        let first = save_results(parent.path(), &records, &run_log).unwrap();
        let second = save_results(parent.path(), &records, &run_log).unwrap();

        assert_ne!(first, second);
        assert!(first.join(LOG_NAME).exists());
        assert_eq!(load(&first.join(DB_NAME)).unwrap(), records);
    }

    #[test]
    fn storage_failure_leaves_log_behind() {
        let dir = tempfile::tempdir().unwrap();
        let run_log = RunLog {
            t_stop: 1.0,
            calcium_sampling: 0.001,
            dt_neuron: 0.025,
            t_equilibrium: 0.0,
            stimuli: Vec::new(),
        };

        write_run_log(dir.path(), &run_log).unwrap();
        // a directory where the database file should be
        let db_path = dir.path().join(DB_NAME);
        fs::create_dir(&db_path).unwrap();

        let result = persist(&db_path, &sample_records());
        assert!(matches!(result, Err(SpineSyncError::Storage(_))));
        assert!(dir.path().join(LOG_NAME).exists());
    }
}
