use itertools::{EitherOrBoth, Itertools};

/// Compares program output with the expected output.
///
/// Line endings are normalized and the whole text is trimmed; then both sides
/// must have the same number of lines and every pair of lines must be equal
/// once surrounding whitespace is removed.
pub fn is_match(expected: &str, actual: &str) -> bool {
    let expected = normalize(expected);
    let actual = normalize(actual);

    if expected.is_empty() && actual.is_empty() {
        return true;
    }

    expected
        .split('\n')
        .zip_longest(actual.split('\n'))
        .all(|pair| match pair {
            EitherOrBoth::Both(e, a) => e.trim() == a.trim(),
            _ => false,
        })
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}
