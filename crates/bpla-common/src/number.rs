use std::cmp::Ordering;

/// Order board numbers like `"5.2"`, `"5.10"`, `"12.1"` segment by segment.
///
/// Numeric segments compare as integers; anything else falls back to a
/// plain string comparison for that segment. A number that is a prefix of
/// another sorts first.
pub fn compare_board_numbers(a: &str, b: &str) -> Ordering {
    let mut left = a.trim().split('.');
    let mut right = b.trim().split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.trim().parse::<u64>(), r.trim().parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.trim().cmp(r.trim()),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
