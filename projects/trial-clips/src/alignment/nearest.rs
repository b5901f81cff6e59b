// Nearest-timestamp search
//
// Ties are resolved to the first candidate in iteration order. Callers that
// need a deterministic choice between sources (sessions, cameras) control it
// through the order they pass candidates in.

use crate::alignment::timestamp::Timestamp;
use crate::error::AlignError;

/// Returns the candidate whose timestamp is closest to `query`.
///
/// Candidates need not be sorted. When several candidates are equally close,
/// the first one yielded by the iterator wins.
pub fn nearest_by<I, T, F>(query: Timestamp, candidates: I, key: F) -> Result<T, AlignError>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> Timestamp,
{
    // `min_by_key` keeps the first of equal minima.
    candidates
        .into_iter()
        .min_by_key(|c| key(c).distance_micros(query))
        .ok_or(AlignError::EmptyCandidateSet)
}

/// Convenience form over plain timestamps.
#[cfg(test)]
pub fn nearest_timestamp(query: Timestamp, candidates: &[Timestamp]) -> Result<Timestamp, AlignError> {
    nearest_by(query, candidates.iter().copied(), |t| *t)
}

/// Index of the closest element of a non-decreasing slice, with the same
/// tie-break as [`nearest_by`]: on equal distance the earlier position wins,
/// including the first of a run of duplicates.
pub fn nearest_sorted_index(query: Timestamp, sorted: &[Timestamp]) -> Result<usize, AlignError> {
    if sorted.is_empty() {
        return Err(AlignError::EmptyCandidateSet);
    }

    // First element >= query.
    let upper = sorted.partition_point(|t| *t < query);

    let best = if upper == 0 {
        0
    } else if upper == sorted.len() {
        upper - 1
    } else {
        let below = sorted[upper - 1];
        let above = sorted[upper];
        if below.distance_micros(query) <= above.distance_micros(query) {
            upper - 1
        } else {
            upper
        }
    };

    // Step back to the first occurrence of the chosen value.
    let value = sorted[best];
    Ok(sorted[..best].partition_point(|t| *t < value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: i64) -> Timestamp {
        Timestamp::parse("2022-09-02 10:00:00")
            .unwrap()
            .offset_millis(millis as f64)
    }

    #[test]
    fn test_nearest_basic() {
        let log = vec![ms(100), ms(150), ms(300)];
        assert_eq!(nearest_timestamp(ms(160), &log).unwrap(), ms(150));
        assert_eq!(nearest_timestamp(ms(0), &log).unwrap(), ms(100));
        assert_eq!(nearest_timestamp(ms(1000), &log).unwrap(), ms(300));
    }

    #[test]
    fn test_nearest_empty_is_error() {
        assert_eq!(
            nearest_timestamp(ms(0), &[]),
            Err(AlignError::EmptyCandidateSet)
        );
        assert_eq!(
            nearest_sorted_index(ms(0), &[]),
            Err(AlignError::EmptyCandidateSet)
        );
    }

    #[test]
    fn test_tie_prefers_first_in_iteration_order() {
        // 100 and 200 are both 50ms from 150.
        let forward = vec![ms(100), ms(200)];
        assert_eq!(nearest_timestamp(ms(150), &forward).unwrap(), ms(100));

        let reversed = vec![ms(200), ms(100)];
        assert_eq!(nearest_timestamp(ms(150), &reversed).unwrap(), ms(200));

        let tagged = vec![("a", ms(140)), ("b", ms(160)), ("c", ms(140))];
        let (tag, _) = nearest_by(ms(150), tagged, |(_, t)| *t).unwrap();
        assert_eq!(tag, "a");
    }

    #[test]
    fn test_sorted_index_matches_linear_scan() {
        let log = vec![
            ms(0),
            ms(33),
            ms(33),
            ms(66),
            ms(100),
            ms(100),
            ms(100),
            ms(133),
        ];

        for q in -20..160 {
            let query = ms(q);
            let linear = nearest_by(query, log.iter().enumerate(), |(_, t)| **t)
                .map(|(i, _)| i)
                .unwrap();
            assert_eq!(
                nearest_sorted_index(query, &log).unwrap(),
                linear,
                "query at {}ms",
                q
            );
        }
    }
}
