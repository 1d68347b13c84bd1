use anyhow::Result;

/// Calculate cosine similarity between two embedding vectors
/// Returns value between -1.0 (opposite) and 1.0 (identical)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        anyhow::bail!("Vector dimensions must match: {} != {}", a.len(), b.len());
    }

    if a.is_empty() {
        anyhow::bail!("Vectors cannot be empty");
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();

    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    // Avoid division by zero
    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot_product / (magnitude_a * magnitude_b);

    // Clamp to [-1, 1] to handle floating point errors
    Ok(similarity.clamp(-1.0, 1.0))
}

/// Cosine distance as pgvector's `<=>` defines it: `1 - cosine_similarity`.
/// Ranges over [0, 2]; lower is closer.
///
/// Undefined for a zero vector, where pgvector yields NaN, so that case is an
/// error here instead of the similarity's 0.0 fallback.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.iter().all(|x| *x == 0.0) || b.iter().all(|x| *x == 0.0) {
        anyhow::bail!("Cosine distance is undefined for a zero vector");
    }
    Ok(1.0 - cosine_similarity(a, b)?)
}
