//! Nearest-neighbour ranking over turns held in process memory.
//!
//! Mirrors what the Postgres backend gets from
//! `ORDER BY embedding <=> $q, created_at, id`.

use std::cmp::Ordering;

use crate::utils::similarity::cosine_distance;

use super::error::SearchError;
use super::types::{ScoredTurn, Turn};

/// Reject query vectors no backend could rank against
pub fn validate_query(query: &[f32]) -> Result<(), SearchError> {
    if query.is_empty() {
        return Err(SearchError::InvalidQuery("empty query vector".to_string()));
    }
    if query.iter().any(|v| !v.is_finite()) {
        return Err(SearchError::InvalidQuery(
            "query vector contains non-finite values".to_string(),
        ));
    }
    if query.iter().all(|v| *v == 0.0) {
        return Err(SearchError::InvalidQuery("query vector has zero magnitude".to_string()));
    }
    Ok(())
}

/// Treat a non-positive threshold as "no cutoff"
pub fn effective_cutoff(max_distance: Option<f32>) -> Option<f32> {
    max_distance.filter(|d| *d > 0.0)
}

/// Score, filter and order candidate turns.
///
/// Turns without an embedding, with a different dimensionality than the
/// query, or whose distance is undefined (zero vector, overflow) are
/// skipped. Result is ascending by distance, ties by `(created_at, id)`,
/// truncated to `top_k`.
pub fn rank<'a, I>(
    candidates: I,
    query: &[f32],
    top_k: usize,
    max_distance: Option<f32>,
) -> Result<Vec<ScoredTurn>, SearchError>
where
    I: IntoIterator<Item = &'a Turn>,
{
    validate_query(query)?;
    if top_k == 0 {
        return Ok(Vec::new());
    }
    let cutoff = effective_cutoff(max_distance);

    let mut scored: Vec<ScoredTurn> = candidates
        .into_iter()
        .filter_map(|turn| {
            let embedding = turn.embedding.as_deref()?;
            let distance = cosine_distance(query, embedding).ok()?;
            if !distance.is_finite() {
                return None;
            }
            match cutoff {
                Some(limit) if distance >= limit => None,
                _ => Some(ScoredTurn { turn: turn.clone(), distance }),
            }
        })
        .collect();

    scored.sort_by(compare_scored);
    scored.truncate(top_k);
    Ok(scored)
}

pub fn compare_scored(a: &ScoredTurn, b: &ScoredTurn) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.turn.order_key().cmp(&b.turn.order_key()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{ConversationId, Role};
    use chrono::{Duration, Utc};

    fn turn(id: i64, offset_secs: i64, embedding: Option<Vec<f32>>) -> Turn {
        Turn {
            id,
            conversation_id: ConversationId::new(),
            role: Role::User,
            content: format!("turn {}", id),
            embedding,
            created_at: Utc::now() + Duration::seconds(offset_secs),
            tool_metadata: None,
        }
    }

    #[test]
    fn test_orders_by_distance() {
        let turns = vec![
            turn(1, 0, Some(vec![0.0, 1.0])),
            turn(2, 1, Some(vec![1.0, 0.0])),
            turn(3, 2, Some(vec![1.0, 1.0])),
        ];

        let ranked = rank(&turns, &[1.0, 0.0], 10, None).unwrap();
        let ids: Vec<i64> = ranked.iter().map(|s| s.turn.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert!(ranked.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_ties_broken_chronologically() {
        // Same vector, later turns inserted first
        let turns = vec![
            turn(7, 30, Some(vec![1.0, 0.0])),
            turn(5, 10, Some(vec![1.0, 0.0])),
            turn(6, 20, Some(vec![1.0, 0.0])),
        ];

        let ranked = rank(&turns, &[2.0, 0.0], 10, None).unwrap();
        let ids: Vec<i64> = ranked.iter().map(|s| s.turn.id).collect();
        assert_eq!(ids, vec![5, 6, 7]);
    }

    #[test]
    fn test_skips_unembedded_and_mismatched() {
        let turns = vec![
            turn(1, 0, None),
            turn(2, 1, Some(vec![1.0, 0.0, 0.0])),
            turn(3, 2, Some(vec![1.0, 0.0])),
        ];

        let ranked = rank(&turns, &[1.0, 0.0], 10, None).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].turn.id, 3);
    }

    #[test]
    fn test_cutoff_is_strict() {
        let turns = vec![turn(1, 0, Some(vec![0.0, 1.0]))]; // distance 1.0

        assert!(rank(&turns, &[1.0, 0.0], 10, Some(1.0)).unwrap().is_empty());
        assert_eq!(rank(&turns, &[1.0, 0.0], 10, Some(1.01)).unwrap().len(), 1);
        // zero means no cutoff
        assert_eq!(rank(&turns, &[1.0, 0.0], 10, Some(0.0)).unwrap().len(), 1);
    }

    #[test]
    fn test_top_k_truncation() {
        let turns: Vec<Turn> = (0..10).map(|i| turn(i, i, Some(vec![1.0, i as f32]))).collect();

        assert_eq!(rank(&turns, &[1.0, 0.0], 3, None).unwrap().len(), 3);
        assert!(rank(&turns, &[1.0, 0.0], 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_query() {
        let turns = vec![turn(1, 0, Some(vec![1.0]))];
        assert!(matches!(rank(&turns, &[], 5, None), Err(SearchError::InvalidQuery(_))));
        assert!(matches!(rank(&turns, &[f32::NAN], 5, None), Err(SearchError::InvalidQuery(_))));
        assert!(matches!(rank(&turns, &[0.0], 5, None), Err(SearchError::InvalidQuery(_))));
    }

    #[test]
    fn test_overflowing_distance_never_passes_cutoff() {
        // Squared norms overflow to inf, so the cosine comes out as NaN
        let turns = vec![
            turn(1, 0, Some(vec![1e20, 0.0])),
            turn(2, 1, Some(vec![1.0, 0.0])),
        ];

        let ranked = rank(&turns, &[1e20, 0.0], 5, Some(0.5)).unwrap();
        assert!(ranked.is_empty());

        let unbounded = rank(&turns, &[1e20, 0.0], 5, None).unwrap();
        let ids: Vec<i64> = unbounded.iter().map(|s| s.turn.id).collect();
        assert_eq!(ids, vec![2]);
        assert!(unbounded.iter().all(|s| s.distance.is_finite()));
    }

    #[test]
    fn test_zero_embedding_is_skipped() {
        let turns = vec![
            turn(1, 0, Some(vec![0.0, 0.0])),
            turn(2, 1, Some(vec![0.0, 1.0])),
        ];

        let ranked = rank(&turns, &[1.0, 0.0], 5, None).unwrap();
        let ids: Vec<i64> = ranked.iter().map(|s| s.turn.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_compare_scored_is_total() {
        let mut scored = vec![
            ScoredTurn { turn: turn(1, 0, None), distance: 0.3 },
            ScoredTurn { turn: turn(2, 1, None), distance: f32::NAN },
            ScoredTurn { turn: turn(3, 2, None), distance: 0.1 },
        ];

        scored.sort_by(compare_scored);
        let ids: Vec<i64> = scored.iter().map(|s| s.turn.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }
}
