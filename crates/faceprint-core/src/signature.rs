//! Signatures: the embedding matrix that stands for one enrolled identity.
//!
//! On disk a signature is plain text, one embedding per line, values
//! comma-separated in `%.18e` notation. Blank lines and `#` comments are
//! skipped on read.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureError {
    #[error("signature contains no embeddings")]
    Empty,
    #[error("signature embeddings have zero length")]
    ZeroDimension,
    #[error("row {row} has {found} values, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}, column {column}: {value:?} is not a number")]
    NotNumeric {
        line: usize,
        column: usize,
        value: String,
    },
    #[error("line {line}, column {column}: non-finite value")]
    NonFinite { line: usize, column: usize },
    #[error("signature data is not valid UTF-8")]
    Encoding,
}

/// Non-empty, rectangular collection of embeddings for one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    embeddings: Vec<Embedding>,
}

impl Signature {
    pub fn new(embeddings: Vec<Embedding>) -> Result<Self, SignatureError> {
        let first = embeddings.first().ok_or(SignatureError::Empty)?;
        let expected = first.len();
        if expected == 0 {
            return Err(SignatureError::ZeroDimension);
        }
        if let Some((row, e)) = embeddings
            .iter()
            .enumerate()
            .find(|(_, e)| e.len() != expected)
        {
            return Err(SignatureError::Ragged {
                row,
                expected,
                found: e.len(),
            });
        }
        Ok(Self { embeddings })
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    /// Number of stored embeddings (rows).
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Embedding length (columns), shared by every row.
    pub fn dimension(&self) -> usize {
        self.embeddings[0].len()
    }

    /// Element-wise mean across all rows. Recomputed on every call.
    pub fn mean_vector(&self) -> Embedding {
        let dim = self.dimension();
        let mut sums = vec![0.0f64; dim];
        for e in &self.embeddings {
            for (s, &v) in sums.iter_mut().zip(&e.values) {
                *s += v as f64;
            }
        }
        let n = self.embeddings.len() as f64;
        Embedding::new(sums.into_iter().map(|s| (s / n) as f32).collect())
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::with_capacity(self.len() * self.dimension() * 26);
        for e in &self.embeddings {
            let row: Vec<String> = e.values.iter().map(|&v| format_sci(v as f64)).collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }
        out
    }

    /// Parse the text matrix format. A single line yields a 1×N signature.
    pub fn from_csv(text: &str) -> Result<Self, SignatureError> {
        let mut rows = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let values = line
                .split(',')
                .enumerate()
                .map(|(col, field)| parse_value(field, idx + 1, col + 1))
                .collect::<Result<Vec<f32>, _>>()?;
            rows.push(Embedding::new(values));
        }
        Self::new(rows)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let text = std::str::from_utf8(bytes).map_err(|_| SignatureError::Encoding)?;
        Self::from_csv(text)
    }
}

fn parse_value(field: &str, line: usize, column: usize) -> Result<f32, SignatureError> {
    let field = field.trim();
    let value: f64 = field.parse().map_err(|_| SignatureError::NotNumeric {
        line,
        column,
        value: field.to_string(),
    })?;
    let value = value as f32;
    if !value.is_finite() {
        return Err(SignatureError::NonFinite { line, column });
    }
    Ok(value)
}

/// `1.500000000000000000e+00`: 18 fractional digits, signed two-digit exponent.
fn format_sci(v: f64) -> String {
    let s = format!("{v:.18e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => s,
    }
}
