//! Conversion between embedding vectors and their storage representation.
//!
//! One codec per backend, chosen statically. Decoding never fails: a null or
//! unreadable stored value comes back as `None` and the turn is treated as
//! not yet searchable.

use pgvector::Vector;

pub trait VectorCodec {
    /// Backend-native value
    type Stored;

    fn encode(vector: &[f32]) -> Self::Stored;

    fn decode(stored: Option<&Self::Stored>) -> Option<Vec<f32>>;
}

/// pgvector text literal, e.g. `[0.1,0.2,0.3]`
pub struct TextVectorCodec;

impl VectorCodec for TextVectorCodec {
    type Stored = String;

    fn encode(vector: &[f32]) -> String {
        let mut out = String::with_capacity(vector.len() * 10 + 2);
        out.push('[');
        for (i, v) in vector.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            // Display for f32 is the shortest repr that parses back exactly
            out.push_str(&v.to_string());
        }
        out.push(']');
        out
    }

    fn decode(stored: Option<&String>) -> Option<Vec<f32>> {
        let inner = stored?.trim().strip_prefix('[')?.strip_suffix(']')?.trim();
        if inner.is_empty() {
            return None;
        }

        let parsed: Result<Vec<f32>, _> =
            inner.split(',').map(|s| s.trim().parse::<f32>()).collect();
        match parsed {
            Ok(values) if values.iter().all(|v| v.is_finite()) => Some(values),
            _ => None,
        }
    }
}

/// Binary `pgvector::Vector`, bound directly through sqlx
pub struct PgVectorCodec;

impl VectorCodec for PgVectorCodec {
    type Stored = Vector;

    fn encode(vector: &[f32]) -> Vector {
        Vector::from(vector.to_vec())
    }

    fn decode(stored: Option<&Vector>) -> Option<Vec<f32>> {
        let values = stored?.to_vec();
        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }
}
