//! Ranked result sequences.

use taskflow_core::{CodeSnippet, SimilarTask};

/// Anything carrying a relevance score.
pub trait Scored {
    /// Relevance score, higher is better.
    fn score(&self) -> f64;
}

impl Scored for CodeSnippet {
    fn score(&self) -> f64 {
        self.score
    }
}

impl Scored for SimilarTask {
    fn score(&self) -> f64 {
        self.score
    }
}

/// A finite, single-pass sequence of hits in descending score order.
///
/// Consuming the sequence drains it; there is no way to rewind.
#[derive(Debug)]
pub struct RankedResults<T> {
    inner: std::vec::IntoIter<T>,
}

impl<T: Scored> RankedResults<T> {
    /// Rank `hits` and keep the best `top_k`. NaN scores sort last.
    pub fn new(mut hits: Vec<T>, top_k: usize) -> Self {
        hits.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or_else(|| a.score().is_nan().cmp(&b.score().is_nan()))
        });
        hits.truncate(top_k);
        Self {
            inner: hits.into_iter(),
        }
    }
}

impl<T> RankedResults<T> {
    /// Sequence with no hits.
    pub fn empty() -> Self {
        Self {
            inner: Vec::new().into_iter(),
        }
    }
}

impl<T> Iterator for RankedResults<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for RankedResults<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(path: &str, score: f64) -> CodeSnippet {
        CodeSnippet {
            path: path.to_string(),
            snippet: String::new(),
            score,
        }
    }

    #[test]
    fn test_descending_and_truncated() {
        let ranked = RankedResults::new(
            vec![snippet("a", 0.1), snippet("b", 0.9), snippet("c", 0.5)],
            2,
        );
        assert_eq!(ranked.len(), 2);
        let paths: Vec<_> = ranked.map(|s| s.path).collect();
        assert_eq!(paths, vec!["b", "c"]);
    }

    #[test]
    fn test_nan_sorts_last() {
        let ranked = RankedResults::new(vec![snippet("nan", f64::NAN), snippet("ok", 0.2)], 5);
        let paths: Vec<_> = ranked.map(|s| s.path).collect();
        assert_eq!(paths, vec!["ok", "nan"]);
    }

    #[test]
    fn test_single_pass() {
        let mut ranked = RankedResults::new(vec![snippet("a", 1.0)], 3);
        assert!(ranked.next().is_some());
        assert!(ranked.next().is_none());
        assert!(ranked.next().is_none());
    }
}
