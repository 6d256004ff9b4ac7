//! The chunk plan: how an array of length `L` is split over `P` ranks.
//!
//! Every rank gets `L / P` elements and the first `L % P` ranks get one
//! more. Scatter and the sort's final merge both derive the plan from this
//! one function, so the two always agree.

/// Chunk length for every rank, in rank order.
///
/// Returns an empty plan when `participants` is zero.
pub fn chunk_sizes(len: usize, participants: usize) -> Vec<usize> {
    if participants == 0 {
        return Vec::new();
    }
    let base = len / participants;
    let remainder = len % participants;
    (0..participants)
        .map(|rank| base + usize::from(rank < remainder))
        .collect()
}

/// Start offset of every chunk in the original array.
pub fn chunk_offsets(sizes: &[usize]) -> Vec<usize> {
    sizes
        .iter()
        .scan(0usize, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(6, 3, vec![2, 2, 2])]
    #[case(100, 3, vec![34, 33, 33])]
    #[case(7, 4, vec![2, 2, 2, 1])]
    #[case(2, 4, vec![1, 1, 0, 0])]
    #[case(0, 2, vec![0, 0])]
    #[case(5, 1, vec![5])]
    fn known_plans(#[case] len: usize, #[case] p: usize, #[case] expected: Vec<usize>) {
        assert_eq!(chunk_sizes(len, p), expected);
    }

    #[test]
    fn plan_sums_to_length_and_is_balanced() {
        for len in 0..64 {
            for p in 1..9 {
                let sizes = chunk_sizes(len, p);
                assert_eq!(sizes.len(), p);
                assert_eq!(sizes.iter().sum::<usize>(), len);
                let floor = len / p;
                let ceil = len.div_ceil(p);
                assert!(sizes.iter().all(|&s| s == floor || s == ceil));
                // Larger chunks come first
                assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
            }
        }
    }

    #[test]
    fn zero_participants() {
        assert!(chunk_sizes(10, 0).is_empty());
    }

    #[test]
    fn offsets_are_prefix_sums() {
        assert_eq!(chunk_offsets(&[34, 33, 33]), vec![0, 34, 67]);
        assert!(chunk_offsets(&[]).is_empty());
    }
}
