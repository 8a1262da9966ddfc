//! Postal address identity
//!
//! An [`Address`] is the identity key of every harvested row: postal code, house
//! number and optional house letter. Values are normalized on construction so that
//! `"1012 js"` and `"1012JS"` compare equal.

use crate::{Error, Result};
use std::fmt;

/// Normalized Dutch postal address identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    postal_code: String,
    house_number: u32,
    house_letter: Option<String>,
}

impl Address {
    /// Build a normalized address
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] when the postal code is not four digits followed
    /// by two letters, the house number is zero, or the house letter is not a single
    /// alphabetic character.
    pub fn new(postal_code: &str, house_number: u32, house_letter: Option<&str>) -> Result<Self> {
        let postal_code = normalize_postal_code(postal_code)?;

        if house_number == 0 {
            return Err(Error::InvalidInput(format!(
                "house number must be positive for postal code {}",
                postal_code
            )));
        }

        let house_letter = match house_letter.map(str::trim).filter(|l| !l.is_empty()) {
            None => None,
            Some(letter) => {
                let mut chars = letter.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphabetic() => {
                        Some(c.to_ascii_uppercase().to_string())
                    }
                    _ => {
                        return Err(Error::InvalidInput(format!(
                            "house letter '{}' is not a single letter",
                            letter
                        )))
                    }
                }
            }
        };

        Ok(Self {
            postal_code,
            house_number,
            house_letter,
        })
    }

    pub fn postal_code(&self) -> &str {
        &self.postal_code
    }

    pub fn house_number(&self) -> u32 {
        self.house_number
    }

    pub fn house_letter(&self) -> Option<&str> {
        self.house_letter.as_deref()
    }

    /// Free-text form used for suggestion queries, e.g. `1012JS 1A`
    pub fn query_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}",
            self.postal_code,
            self.house_number,
            self.house_letter.as_deref().unwrap_or("")
        )
    }
}

/// Upper-case, strip whitespace and validate the `9999AA` shape
fn normalize_postal_code(raw: &str) -> Result<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let bytes = compact.as_bytes();
    let valid = bytes.len() == 6
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4..].iter().all(u8::is_ascii_uppercase);

    if valid {
        Ok(compact)
    } else {
        Err(Error::InvalidInput(format!("invalid postal code '{}'", raw)))
    }
}
