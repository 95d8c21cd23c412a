//! Maximal marginal relevance diversity selection (spec section 4.3),
//! grounded 1:1 on `app/rag/service.py::_apply_mmr`/`_text_overlap`.

use crate::models::DocumentMetadata;

const DIVERSITY_THRESHOLD: f32 = 0.5;

/// Word-set overlap ratio (intersection over the smaller set), matching
/// the original's "overlap > 0.5" diversity rejection.
pub fn text_overlap(text1: &str, text2: &str) -> f32 {
    use std::collections::HashSet;

    let words1: HashSet<&str> = text1.split_whitespace().collect();
    let words2: HashSet<&str> = text2.split_whitespace().collect();

    if words1.is_empty() || words2.is_empty() {
        return 0.0;
    }

    let intersection = words1.intersection(&words2).count();
    intersection as f32 / words1.len().min(words2.len()) as f32
}

/// Greedily selects up to `k` diverse documents: always keeps the best
/// match (index 0), rejects any candidate overlapping more than
/// `DIVERSITY_THRESHOLD` with an already-selected document, then fills
/// any remaining slots with the best-ranked unselected documents.
pub fn apply_mmr(
    documents: Vec<String>,
    distances: Vec<f32>,
    metadatas: Vec<DocumentMetadata>,
    k: usize,
) -> (Vec<String>, Vec<f32>, Vec<DocumentMetadata>) {
    if documents.len() <= k {
        return (documents, distances, metadatas);
    }

    let lower: Vec<String> = documents.iter().map(|d| d.to_lowercase()).collect();

    let mut selected_indices = vec![0usize];

    for i in 1..documents.len() {
        if selected_indices.len() >= k {
            break;
        }

        let is_diverse = selected_indices
            .iter()
            .all(|&sel_idx| text_overlap(&lower[i], &lower[sel_idx]) <= DIVERSITY_THRESHOLD);

        if is_diverse {
            selected_indices.push(i);
        }
    }

    if selected_indices.len() < k {
        for i in 0..documents.len() {
            if !selected_indices.contains(&i) {
                selected_indices.push(i);
                if selected_indices.len() >= k {
                    break;
                }
            }
        }
    }

    let sel_docs = selected_indices.iter().map(|&i| documents[i].clone()).collect();
    let sel_dists = selected_indices.iter().map(|&i| distances[i]).collect();
    let sel_metas = selected_indices.iter().map(|&i| metadatas[i].clone()).collect();

    (sel_docs, sel_dists, sel_metas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> DocumentMetadata {
        DocumentMetadata::default()
    }

    #[test]
    fn text_overlap_of_identical_text_is_one() {
        assert!((text_overlap("alpha beta gamma", "alpha beta gamma") - 1.0).abs() < 1e-6);
    }

    #[test]
    fn text_overlap_of_disjoint_text_is_zero() {
        assert_eq!(text_overlap("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn mmr_keeps_first_and_rejects_near_duplicates() {
        let docs = vec![
            "the quick brown fox jumps".to_string(),
            "the quick brown fox leaps".to_string(),
            "completely unrelated content here".to_string(),
        ];
        let dists = vec![0.1, 0.15, 0.5];
        let metas = vec![meta(), meta(), meta()];

        let (sel_docs, _, _) = apply_mmr(docs, dists, metas, 2);
        assert_eq!(sel_docs.len(), 2);
        assert_eq!(sel_docs[0], "the quick brown fox jumps");
        assert_eq!(sel_docs[1], "completely unrelated content here");
    }

    #[test]
    fn mmr_fills_remainder_with_best_ranked_when_not_diverse_enough() {
        let docs = vec![
            "alpha alpha alpha".to_string(),
            "alpha alpha beta".to_string(),
            "alpha alpha gamma".to_string(),
        ];
        let dists = vec![0.1, 0.2, 0.3];
        let metas = vec![meta(), meta(), meta()];

        let (sel_docs, _, _) = apply_mmr(docs, dists, metas, 2);
        assert_eq!(sel_docs.len(), 2);
        assert_eq!(sel_docs[0], "alpha alpha alpha");
        assert_eq!(sel_docs[1], "alpha alpha beta");
    }

    #[test]
    fn mmr_is_noop_when_fewer_documents_than_k() {
        let docs = vec!["only one".to_string()];
        let dists = vec![0.1];
        let metas = vec![meta()];
        let (sel_docs, _, _) = apply_mmr(docs, dists, metas, 5);
        assert_eq!(sel_docs.len(), 1);
    }
}
