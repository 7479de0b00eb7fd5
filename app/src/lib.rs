// ==============================================================================
// lib.rs - Annotation Loader Library
// ==============================================================================
// Description: Library interface for incremental variant annotation loading
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-17
// Version: 2.0.0
// ==============================================================================

pub mod error;
pub mod models;
pub mod genotype_converter;
pub mod callset;
pub mod parsers;
pub mod config;
pub mod update_log;
pub mod metadata;
pub mod table;
pub mod fields;
pub mod lookup;
pub mod annotator;
pub mod reference_dataset;
pub mod sex_check;
pub mod relatedness;
pub mod admission;
pub mod merger;
pub mod store;
pub mod audit;
pub mod validator;
pub mod output;
pub mod processor;
