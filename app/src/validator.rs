// ==============================================================================
// validator.rs - Input File Validation
// ==============================================================================
// Description: Checks that a stage's raw inputs exist and look like what
//              they claim to be before any work is done
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-16
// Version: 2.0.0
// ==============================================================================

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

use crate::error::{PipelineError, Result};

const PEDIGREE_COLUMNS: [&str; 2] = ["Family_GUID", "Individual_ID"];
const REMAP_COLUMNS: [&str; 2] = ["s", "seqr_id"];

#[derive(Debug)]
pub struct ValidatedFile {
    pub name: String,
    pub extension: String,
    pub size: u64,
}

pub struct InputValidator {
    /// Callset extension to expected magic number (empty: plain text)
    callset_types: HashMap<String, Vec<u8>>,
}

impl InputValidator {
    pub fn new() -> Self {
        let mut callset_types = HashMap::new();
        callset_types.insert("vcf".to_string(), vec![]);
        callset_types.insert("vcf.gz".to_string(), vec![0x1f, 0x8b, 0x08]);
        callset_types.insert("vcf.bgz".to_string(), vec![0x1f, 0x8b, 0x08]);
        Self { callset_types }
    }

    /// A missing input leaves the stage incomplete rather than failed
    pub fn require_exists(&self, stage: &str, path: &Path) -> Result<()> {
        if path.exists() {
            Ok(())
        } else {
            Err(PipelineError::incomplete(
                stage,
                format!("{} does not exist", path.display()),
            ))
        }
    }

    pub fn validate_callset(&self, stage: &str, path: &Path) -> Result<ValidatedFile> {
        self.require_exists(stage, path)?;
        let name = file_name(path);
        let extension = get_extension(&name);

        let magic = self
            .callset_types
            .get(&extension)
            .ok_or_else(|| invalid(path, format!("unsupported callset type '{}'", extension)))?;
        if !magic.is_empty() && !verify_magic_number(magic, &read_magic_number(path)?) {
            return Err(invalid(path, format!("not a gzip file despite .{}", extension)));
        }

        let first_line = if magic.is_empty() {
            first_line(BufReader::new(File::open(path)?))?
        } else {
            first_line(BufReader::new(flate2::read::MultiGzDecoder::new(File::open(path)?)))?
        };
        if !first_line.starts_with("##fileformat=VCFv4.") {
            return Err(invalid(path, "missing fileformat header".to_string()));
        }

        let size = std::fs::metadata(path)?.len();
        debug!("Callset {} validated ({} bytes)", name, size);
        Ok(ValidatedFile {
            name,
            extension,
            size,
        })
    }

    pub fn validate_pedigree(&self, stage: &str, path: &Path) -> Result<()> {
        self.validate_header(stage, path, &PEDIGREE_COLUMNS)
    }

    pub fn validate_remap(&self, stage: &str, path: &Path) -> Result<()> {
        self.validate_header(stage, path, &REMAP_COLUMNS)
    }

    fn validate_header(&self, stage: &str, path: &Path, required: &[&str]) -> Result<()> {
        self.require_exists(stage, path)?;
        let header = first_line(BufReader::new(File::open(path)?))?;
        let columns: Vec<&str> = header.split('\t').map(|c| c.trim()).collect();
        for column in required {
            if !columns.contains(column) {
                return Err(invalid(path, format!("header has no '{}' column", column)));
            }
        }
        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(path: &Path, details: String) -> PipelineError {
    PipelineError::MalformedRow {
        source_name: path.display().to_string(),
        line: 1,
        details,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn get_extension(filename: &str) -> String {
    // Compound extensions first
    for compound in ["vcf.gz", "vcf.bgz"] {
        if filename.ends_with(&format!(".{}", compound)) {
            return compound.to_string();
        }
    }
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

fn read_magic_number(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; 4];
    let n = file.read(&mut buffer)?;
    buffer.truncate(n);
    Ok(buffer)
}

fn verify_magic_number(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() <= actual.len() && expected.iter().zip(actual.iter()).all(|(e, a)| e == a)
}

fn first_line<R: BufRead>(reader: R) -> Result<String> {
    let line = reader.lines().next().transpose()?.unwrap_or_default();
    Ok(line)
}
