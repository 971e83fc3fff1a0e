// Candidate path sources: wordlist files and inline lists

use crate::error::Result;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Lines};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Turns a raw wordlist line into a candidate path.
///
/// Blank lines and `#` comments yield `None`; everything else gets exactly one leading `/`.
pub fn normalize_candidate(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    Some(format!("/{}", trimmed.trim_start_matches('/')))
}

/// Lazily reads candidate paths from a newline-delimited file.
///
/// The file is streamed, so very large wordlists are never held in memory. Reads go
/// through blocking `std::fs` I/O on whichever task pulls the iterator, which for a run is
/// the scheduler's producer.
pub struct WordlistSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

impl WordlistSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        debug!("Opened wordlist {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for WordlistSource {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            self.line_number += 1;
            match self.lines.next()? {
                Ok(line) => {
                    if let Some(candidate) = normalize_candidate(&line) {
                        return Some(candidate);
                    }
                }
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    warn!(
                        "Skipping unreadable line {} in {}: {}",
                        self.line_number,
                        self.path.display(),
                        e
                    );
                }
                Err(e) => {
                    warn!(
                        "Stopped reading {} at line {}: {}",
                        self.path.display(),
                        self.line_number,
                        e
                    );
                    return None;
                }
            }
        }
    }
}

/// Candidates supplied directly, e.g. from the command line.
pub struct StaticSource {
    paths: std::vec::IntoIter<String>,
}

impl StaticSource {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths: Vec<String> = paths
            .into_iter()
            .filter_map(|p| normalize_candidate(p.as_ref()))
            .collect();

        Self {
            paths: paths.into_iter(),
        }
    }
}

impl Iterator for StaticSource {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.paths.next()
    }
}
