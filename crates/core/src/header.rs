//! FITS header cards.
//!
//! Parses the primary header of a FITS file (80-character records until `END`)
//! into a keyword map that serializes to the JSON form stored with an image.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const RECORD_LEN: usize = 80;

/// Keywords that never carry WCS information.
const SKIPPED_KEYWORDS: [&str; 3] = ["HISTORY", "COMMENT", "ExifOffset"];

/// A typed header value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Logical(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl HeaderValue {
    /// Numeric view of the value. Text is accepted when it parses as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => parse_number(s.trim()),
            Self::Logical(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Header keyword map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderCards(BTreeMap<String, HeaderValue>);

impl HeaderCards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: HeaderValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.insert(key, HeaderValue::Float(value));
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.insert(key, HeaderValue::Integer(value));
    }

    pub fn set_text(&mut self, key: &str, value: &str) {
        self.insert(key, HeaderValue::Text(value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the cards describe a celestial WCS (reference value plus a
    /// linear transform).
    pub fn has_celestial_wcs(&self) -> bool {
        self.contains("CRVAL1") && (self.contains("CD1_1") || self.contains("CDELT1"))
    }

    /// Decode the JSON object stored in the database.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode as the JSON object stored in the database.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the primary header of a FITS file.
    ///
    /// Only the header is read; trailing padding and data units are ignored.
    pub fn parse_fits(bytes: &[u8]) -> Result<Self> {
        let mut cards = Self::new();
        let mut saw_end = false;

        for record in bytes.chunks(RECORD_LEN) {
            if record.len() < RECORD_LEN {
                break;
            }
            if !record.is_ascii() {
                return Err(Error::InvalidHeader(
                    "non-ASCII bytes in header record".to_string(),
                ));
            }
            // ASCII was checked above, so this cannot fail.
            let record = std::str::from_utf8(record)
                .map_err(|e| Error::InvalidHeader(e.to_string()))?;

            let keyword = record[..8].trim();
            if keyword == "END" {
                saw_end = true;
                break;
            }
            if keyword.is_empty() || SKIPPED_KEYWORDS.contains(&keyword) {
                continue;
            }
            if &record[8..10] == "= " {
                cards.insert(keyword, parse_value(&record[10..]));
            }
        }

        if !saw_end {
            return Err(Error::InvalidHeader("missing END card".to_string()));
        }
        if cards.is_empty() {
            return Err(Error::InvalidHeader("header has no value cards".to_string()));
        }

        Ok(cards)
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.replace(['D', 'd'], "E").parse::<f64>().ok()
}

/// Parse the value field of a card (columns 11-80).
fn parse_value(field: &str) -> HeaderValue {
    let field = field.trim_start();

    if let Some(rest) = field.strip_prefix('\'') {
        // Quoted string; '' is an escaped quote.
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return HeaderValue::Text(out.trim_end().to_string());
    }

    let value = match field.find('/') {
        Some(idx) => field[..idx].trim(),
        None => field.trim(),
    };

    match value {
        "T" => return HeaderValue::Logical(true),
        "F" => return HeaderValue::Logical(false),
        _ => {}
    }

    if let Ok(i) = value.parse::<i64>() {
        return HeaderValue::Integer(i);
    }
    if let Some(f) = parse_number(value) {
        return HeaderValue::Float(f);
    }

    HeaderValue::Text(value.to_string())
}

#[cfg(test)]
pub(crate) fn fits_record(keyword: &str, value: &str) -> String {
    let mut record = if value.is_empty() {
        format!("{keyword:<8}")
    } else {
        format!("{keyword:<8}= {value:>20}")
    };
    record.truncate(RECORD_LEN);
    format!("{record:<80}")
}
