//! # Password Generator
//!
//! Random passwords drawn from the OS random source. The password is built
//! from the requested number of digits and symbols, filled up with letters
//! and shuffled.

use super::{parse_spec, Generator, GeneratorError, GeneratorOutput};
use crate::crd::PasswordSpec;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const DEFAULT_SYMBOLS: &str = "~!@#$%^&*()_+`-={}|[]\\:\"<>?,./";

/// Stateless password generator
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordGenerator;

#[async_trait]
impl Generator for PasswordGenerator {
    async fn generate(&self, spec: &serde_json::Value) -> Result<GeneratorOutput, GeneratorError> {
        let spec: PasswordSpec = parse_spec("Password", spec)?;
        let password = generate_password(&spec)?;
        let key = spec
            .secret_key
            .clone()
            .unwrap_or_else(|| "password".to_string());
        Ok(GeneratorOutput {
            data: [(key, password.into_bytes())].into_iter().collect(),
            state: None,
        })
    }

    async fn cleanup(
        &self,
        _spec: &serde_json::Value,
        _state: &serde_json::Value,
    ) -> Result<(), GeneratorError> {
        Ok(())
    }
}

/// Build one password for `spec`
///
/// # Errors
///
/// Fails when digits and symbols exceed the length, or when repeats are
/// disallowed and an alphabet runs out of characters.
pub fn generate_password(spec: &PasswordSpec) -> Result<String, GeneratorError> {
    let digits = spec.digits.unwrap_or(spec.length / 4);
    let symbols = spec.symbols.unwrap_or(spec.length / 4);
    if digits + symbols > spec.length {
        return Err(GeneratorError::Generate(format!(
            "{digits} digits and {symbols} symbols do not fit in length {}",
            spec.length
        )));
    }

    let mut letters: Vec<char> = LOWER.chars().collect();
    if !spec.no_upper {
        letters.extend(UPPER.chars());
    }
    let digit_chars: Vec<char> = DIGITS.chars().collect();
    let symbol_chars: Vec<char> = spec
        .symbol_characters
        .as_deref()
        .unwrap_or(DEFAULT_SYMBOLS)
        .chars()
        .collect();

    let mut used = BTreeSet::new();
    let mut out = Vec::with_capacity(spec.length);
    pick(digits, &digit_chars, spec.allow_repeat, &mut used, &mut out)?;
    pick(symbols, &symbol_chars, spec.allow_repeat, &mut used, &mut out)?;
    pick(
        spec.length - digits - symbols,
        &letters,
        spec.allow_repeat,
        &mut used,
        &mut out,
    )?;
    out.shuffle(&mut OsRng);
    Ok(out.into_iter().collect())
}

fn pick(
    count: usize,
    alphabet: &[char],
    allow_repeat: bool,
    used: &mut BTreeSet<char>,
    out: &mut Vec<char>,
) -> Result<(), GeneratorError> {
    for _ in 0..count {
        let candidates: Vec<char> = alphabet
            .iter()
            .copied()
            .filter(|c| allow_repeat || !used.contains(c))
            .collect();
        let c = *candidates.choose(&mut OsRng).ok_or_else(|| {
            GeneratorError::Generate("not enough unique characters, set allowRepeat".to_string())
        })?;
        used.insert(c);
        out.push(c);
    }
    Ok(())
}
