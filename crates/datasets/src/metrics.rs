//! Pure metric functions consumed by the dataset strategies.
//!
//! All functions take already-aligned (target, prediction) data and return
//! percentages in [0, 100] where applicable.

use std::collections::HashMap;

/// Fraction of exact (case-insensitive, trimmed) label matches, as a percent.
pub fn accuracy(pairs: &[(String, String)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let correct = pairs
        .iter()
        .filter(|(target, pred)| target.trim().eq_ignore_ascii_case(pred.trim()))
        .count();
    100.0 * correct as f64 / pairs.len() as f64
}

/// Macro-averaged F1 over the label classes present in the targets.
pub fn macro_f1(pairs: &[(String, String)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }

    let norm = |s: &str| s.trim().to_lowercase();
    let mut classes: Vec<String> = pairs.iter().map(|(t, _)| norm(t)).collect();
    classes.sort();
    classes.dedup();

    let mut f1_sum = 0.0;
    for class in &classes {
        let tp = pairs
            .iter()
            .filter(|(t, p)| &norm(t) == class && &norm(p) == class)
            .count() as f64;
        let fp = pairs
            .iter()
            .filter(|(t, p)| &norm(t) != class && &norm(p) == class)
            .count() as f64;
        let fn_ = pairs
            .iter()
            .filter(|(t, p)| &norm(t) == class && &norm(p) != class)
            .count() as f64;

        let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        f1_sum += f1;
    }

    100.0 * f1_sum / classes.len() as f64
}

/// SQuAD-style answer normalization: lowercase, strip punctuation and
/// articles, collapse whitespace.
fn normalize_answer(s: &str) -> Vec<String> {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .filter(|w| !matches!(*w, "a" | "an" | "the"))
        .map(|w| w.to_string())
        .collect()
}

/// Token-overlap F1 for a single answer pair.
pub fn answer_f1(target: &str, prediction: &str) -> f64 {
    let target_tokens = normalize_answer(target);
    let pred_tokens = normalize_answer(prediction);

    if target_tokens.is_empty() || pred_tokens.is_empty() {
        // Both empty counts as a match, otherwise a miss.
        return if target_tokens == pred_tokens { 1.0 } else { 0.0 };
    }

    let mut target_counts: HashMap<&str, usize> = HashMap::new();
    for token in &target_tokens {
        *target_counts.entry(token.as_str()).or_insert(0) += 1;
    }

    let mut overlap = 0usize;
    for token in &pred_tokens {
        if let Some(count) = target_counts.get_mut(token.as_str()) {
            if *count > 0 {
                *count -= 1;
                overlap += 1;
            }
        }
    }

    if overlap == 0 {
        return 0.0;
    }
    let precision = overlap as f64 / pred_tokens.len() as f64;
    let recall = overlap as f64 / target_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Mean token-overlap F1 across aligned answer pairs, as a percent.
pub fn squad_f1(pairs: &[(String, String)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let total: f64 = pairs.iter().map(|(t, p)| answer_f1(t, p)).sum();
    100.0 * total / pairs.len() as f64
}

/// Fraction of normalized exact matches, as a percent.
pub fn exact_match(pairs: &[(String, String)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let correct = pairs
        .iter()
        .filter(|(t, p)| normalize_answer(t) == normalize_answer(p))
        .count();
    100.0 * correct as f64 / pairs.len() as f64
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts: HashMap<&[String], usize> = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }
    counts
}

/// Corpus BLEU (up to 4-grams, uniform weights, brevity penalty) against a
/// single reference per hypothesis, scaled to [0, 100].
pub fn corpus_bleu(pairs: &[(String, String)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }

    let tokenized: Vec<(Vec<String>, Vec<String>)> = pairs
        .iter()
        .map(|(reference, hypothesis)| {
            (
                reference.split_whitespace().map(|w| w.to_lowercase()).collect(),
                hypothesis.split_whitespace().map(|w| w.to_lowercase()).collect(),
            )
        })
        .collect();

    let ref_len: usize = tokenized.iter().map(|(r, _)| r.len()).sum();
    let hyp_len: usize = tokenized.iter().map(|(_, h)| h.len()).sum();
    if hyp_len == 0 {
        return 0.0;
    }

    let mut log_precision_sum = 0.0;
    for n in 1..=4 {
        let mut matched = 0usize;
        let mut total = 0usize;
        for (reference, hypothesis) in &tokenized {
            let ref_counts = ngram_counts(reference, n);
            let hyp_counts = ngram_counts(hypothesis, n);
            for (ngram, count) in &hyp_counts {
                total += count;
                if let Some(rc) = ref_counts.get(ngram) {
                    matched += (*count).min(*rc);
                }
            }
        }
        if matched == 0 || total == 0 {
            return 0.0;
        }
        log_precision_sum += (matched as f64 / total as f64).ln();
    }

    let brevity_penalty = if hyp_len >= ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / hyp_len as f64).exp()
    };

    100.0 * brevity_penalty * (log_precision_sum / 4.0).exp()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(t, p)| (t.to_string(), p.to_string()))
            .collect()
    }

    #[test]
    fn accuracy_counts_case_insensitive_matches() {
        let p = pairs(&[
            ("entailment", "Entailment"),
            ("neutral", "neutral"),
            ("contradiction", "neutral"),
            ("entailment", "contradiction"),
        ]);
        assert_eq!(accuracy(&p), 50.0);
    }

    #[test]
    fn accuracy_empty_is_zero() {
        assert_eq!(accuracy(&[]), 0.0);
    }

    #[test]
    fn perfect_accuracy_is_one_hundred() {
        let p = pairs(&[("positive", "positive")]);
        assert_eq!(accuracy(&p), 100.0);
    }

    #[test]
    fn macro_f1_perfect_predictions() {
        let p = pairs(&[("hate", "hate"), ("not-hate", "not-hate")]);
        assert!((macro_f1(&p) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn macro_f1_all_wrong_is_zero() {
        let p = pairs(&[("hate", "not-hate"), ("not-hate", "hate")]);
        assert_eq!(macro_f1(&p), 0.0);
    }

    #[test]
    fn answer_f1_ignores_articles_and_punctuation() {
        assert!((answer_f1("the Eiffel Tower", "Eiffel Tower.") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn answer_f1_partial_overlap() {
        // target tokens {new, york}, prediction {new, york, city}:
        // precision 2/3, recall 1 => F1 = 0.8
        assert!((answer_f1("New York", "New York City") - 0.8).abs() < 1e-9);
    }

    #[test]
    fn exact_match_normalized() {
        let p = pairs(&[("The answer", "answer!"), ("42", "41")]);
        assert_eq!(exact_match(&p), 50.0);
    }

    #[test]
    fn bleu_identity_is_one_hundred() {
        let p = pairs(&[(
            "the quick brown fox jumps over the lazy dog",
            "the quick brown fox jumps over the lazy dog",
        )]);
        assert!((corpus_bleu(&p) - 100.0).abs() < 1e-6);
    }

    #[test]
    fn bleu_disjoint_is_zero() {
        let p = pairs(&[("aaa bbb ccc ddd", "www xxx yyy zzz")]);
        assert_eq!(corpus_bleu(&p), 0.0);
    }

    #[test]
    fn bleu_short_hypothesis_penalized() {
        let full = pairs(&[(
            "the quick brown fox jumps over the lazy dog",
            "the quick brown fox jumps over the lazy dog",
        )]);
        let short = pairs(&[(
            "the quick brown fox jumps over the lazy dog",
            "the quick brown fox jumps",
        )]);
        assert!(corpus_bleu(&short) < corpus_bleu(&full));
    }

    #[test]
    fn mean_and_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), 5.0);
        assert!((std_dev(&values) - 2.0).abs() < 1e-9);
        assert_eq!(std_dev(&[1.0]), 0.0);
    }
}
