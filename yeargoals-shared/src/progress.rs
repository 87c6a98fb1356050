/// The one observable lifecycle edge of a goal: progress crossing from
/// below 100 to exactly 100. Re-saving 100 or moving back down (correcting
/// a mistake) is not a completion.
pub fn did_complete(old: i32, new: i32) -> bool {
    old < 100 && new == 100
}

/// Progress is stored as an integer percentage.
pub fn valid_progress(value: i32) -> bool {
    (0..=100).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_edge() {
        assert!(did_complete(0, 100));
        assert!(did_complete(99, 100));
    }

    #[test]
    fn resaving_100_is_not_a_completion() {
        assert!(!did_complete(100, 100));
    }

    #[test]
    fn uncompletion_and_partial_updates() {
        assert!(!did_complete(100, 50));
        assert!(!did_complete(10, 99));
        assert!(!did_complete(0, 0));
    }

    #[test]
    fn progress_bounds() {
        assert!(valid_progress(0));
        assert!(valid_progress(100));
        assert!(!valid_progress(-1));
        assert!(!valid_progress(101));
    }
}
