// ==============================================================================
// parsers/mod.rs - File parser modules
// ==============================================================================
// Description: Parsers for callsets, pedigrees and sample id remap files
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-09-16
// Version: 2.0.0
// ==============================================================================

pub mod pedigree;
pub mod remap;
pub mod vcf;

pub use pedigree::{Family, Pedigree, PedigreeParser, Sample, SampleFileError};
pub use remap::{RemapEntry, RemapParser};
pub use vcf::{CallsetReader, VCFParseError};
