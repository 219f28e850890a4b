use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use super::format::{EdgeRecord, FormatError};
use super::FileIndex;

/// Result of checking a graph file without loading it into a graph.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub path: PathBuf,
    pub file_size: u64,
    pub header_ok: bool,
    pub node_count: u64,
    pub edge_count: u64,
    pub nodes_readable: u64,
    pub edges_readable: u64,
    /// Hierarchy children or edge endpoints naming keys the file lacks.
    pub dangling_references: u64,
    pub problems: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Validate the file at `path`: header, section offsets, every node and edge
/// record, and every key they reference.
///
/// Only an unreadable or missing file is an error; everything wrong with its
/// contents is listed in [`HealthReport::problems`].
pub fn check_file_health(path: impl AsRef<Path>) -> Result<HealthReport> {
    let path = path.as_ref();
    let file_size = std::fs::metadata(path)?.len();
    let mut report = HealthReport {
        path: path.to_path_buf(),
        file_size,
        header_ok: false,
        node_count: 0,
        edge_count: 0,
        nodes_readable: 0,
        edges_readable: 0,
        dangling_references: 0,
        problems: Vec::new(),
    };

    let mut index = match FileIndex::open(path) {
        Ok(index) => index,
        Err(e) => {
            report.problems.push(format!("{e:#}"));
            return Ok(report);
        }
    };
    let header = *index.header();
    report.header_ok = true;
    report.node_count = header.node_count;
    report.edge_count = header.edge_count;
    if header.edge_offset > file_size {
        report
            .problems
            .push(format!("edge section offset {} past end of file", header.edge_offset));
        return Ok(report);
    }

    let keys: Vec<u64> = index.keys().to_vec();
    let mut known: HashSet<u64> = HashSet::with_capacity(keys.len());
    for key in keys {
        match index.read_node(key) {
            Ok(Some(record)) => {
                report.nodes_readable += 1;
                report.dangling_references +=
                    record.children.iter().filter(|c| !known.contains(c)).count() as u64;
                known.insert(key);
            }
            Ok(None) => {}
            Err(e) => report.problems.push(format!("{e:#}")),
        }
    }

    let mut edges = index.edge_reader()?;
    for i in 0..header.edge_count {
        match EdgeRecord::read(&mut edges) {
            Ok(record) => {
                report.edges_readable += 1;
                for key in [record.from, record.to] {
                    if !known.contains(&key) {
                        report.dangling_references += 1;
                    }
                }
            }
            Err(FormatError::Truncated { .. }) => {
                report
                    .problems
                    .push(format!("edge section truncated after {i} of {} records", header.edge_count));
                break;
            }
            Err(e) => {
                report.problems.push(e.to_string());
                break;
            }
        }
    }

    if report.dangling_references > 0 {
        report
            .problems
            .push(format!("{} dangling node references", report.dangling_references));
    }
    Ok(report)
}
