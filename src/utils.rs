use std::collections::HashMap;

/// Most frequent value in a count table as `(value, count)`.
/// Ties resolve to the lowest value.
pub fn majority(counts: &HashMap<i64, u64>) -> Option<(i64, u64)> {
    counts.iter().fold(None, |acc, (&value, &count)| match acc {
        None => Some((value, count)),
        Some((_, max_count)) if count > max_count => Some((value, count)),
        Some((max_value, max_count)) if count == max_count && value < max_value => {
            Some((value, count))
        }
        _ => acc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn test_majority_basic() {
        let counts = hashmap! { 21 => 3, 24 => 10, 23 => 4 };
        assert_eq!(majority(&counts), Some((24, 10)));
    }

    #[test]
    fn test_majority_empty() {
        let counts: HashMap<i64, u64> = HashMap::new();
        assert_eq!(majority(&counts), None);
    }

    #[test]
    fn test_majority_tie_takes_lowest() {
        let counts = hashmap! { 95 => 5, 22 => 5, 42 => 5, 0 => 1 };
        assert_eq!(majority(&counts), Some((22, 5)));
    }

    #[test]
    fn test_majority_negatives() {
        let counts = hashmap! { -5 => 2, -1 => 2 };
        assert_eq!(majority(&counts), Some((-5, 2)));
    }
}
