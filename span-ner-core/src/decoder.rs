//! # Decodificação Gulosa de Spans
//!
//! Converte os scores por slot em um conjunto final de entidades sem redundância.
//!
//! ## Algoritmo
//!
//! ```text
//! 1. Para cada span candidato: (label, score) = argmax(softmax(logits))
//! 2. Ordena os candidatos por score decrescente (empates mantêm a ordem dos slots)
//! 3. Percorre em ordem:
//!      aceita se label != O  E  (sobreposição permitida OU nenhuma palavra já marcada)
//!      ao aceitar (sem sobreposição): marca as palavras [início, fim) como ocupadas
//! ```
//!
//! É um guloso por prioridade de score, **não** o escalonamento de intervalos
//! ponderado ótimo: um span de score alto pode bloquear dois spans menores cuja
//! soma seria maior. Esse comportamento é intencional e observável na saída.
//!
//! ## Garantias
//! - Sem sobreposição, as entidades aceitas são disjuntas palavra a palavra.
//! - Todo span aceito tem score maior (ou igual e slot anterior) que os spans que ele excluiu.
//! - Com sobreposição permitida, todo span cujo argmax não é `O` é emitido uma vez.

use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Um span candidato já pontuado.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredSpan {
    /// Posição do span na ordem de enumeração (slot achatado).
    pub slot: usize,
    pub word_start: usize,
    pub word_end: usize,
    pub label_id: usize,
    /// Probabilidade softmax do label vencedor.
    pub score: f32,
}

/// Resultado da avaliação de um candidato durante a decodificação.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    /// Argmax é o label outside.
    Outside,
    /// Alguma palavra já pertence a um span aceito de score maior.
    Overlap,
}

/// Converte scores brutos em probabilidades (softmax numericamente estável).
pub fn scores_to_probs(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return vec![];
    }
    let max_score = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|&s| (s - max_score).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![1.0 / scores.len() as f32; scores.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}

/// Label de maior probabilidade para cada linha de `logits` (`slots × num_labels`).
///
/// Em caso de empate, vence o menor id.
pub fn argmax_probs(logits: ArrayView2<f32>) -> Vec<(usize, f32)> {
    logits
        .axis_iter(Axis(0))
        .map(|row| {
            let probs = scores_to_probs(&row.to_vec());
            probs
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (id, &p)| {
                    if p > best.1 {
                        (id, p)
                    } else {
                        best
                    }
                })
        })
        .collect()
}

/// Junta spans e `(label, score)` por slot. Slots além do número de spans são padding.
pub fn score_spans(spans: &[(usize, usize)], predictions: &[(usize, f32)]) -> Vec<ScoredSpan> {
    spans
        .iter()
        .zip(predictions)
        .enumerate()
        .map(|(slot, (&(word_start, word_end), &(label_id, score)))| ScoredSpan {
            slot,
            word_start,
            word_end,
            label_id,
            score,
        })
        .collect()
}

/// Decodificação gulosa; retorna os spans aceitos em ordem de score.
pub fn decode(
    candidates: &[ScoredSpan],
    outside_id: usize,
    num_words: usize,
    allow_overlapping: bool,
) -> Vec<ScoredSpan> {
    decode_with(candidates, outside_id, num_words, allow_overlapping, |_, _| {})
}

/// Igual a [`decode`], chamando `on_decision` para cada candidato avaliado.
///
/// Todo candidato deve ter `word_start < word_end`; o pipeline valida os spans
/// do tokenizador antes de decodificar.
pub fn decode_with<F>(
    candidates: &[ScoredSpan],
    outside_id: usize,
    num_words: usize,
    allow_overlapping: bool,
    mut on_decision: F,
) -> Vec<ScoredSpan>
where
    F: FnMut(&ScoredSpan, Decision),
{
    let mut ordered: Vec<ScoredSpan> = candidates.to_vec();
    // sort_by é estável: empates preservam a ordem original dos slots
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mask_len = candidates
        .iter()
        .map(|c| c.word_end)
        .max()
        .unwrap_or(0)
        .max(num_words);
    let mut word_selected = vec![false; mask_len];
    let mut accepted = Vec::new();

    for candidate in ordered {
        let range = candidate.word_start..candidate.word_end;
        let decision = if candidate.label_id == outside_id {
            Decision::Outside
        } else if !allow_overlapping && word_selected[range.clone()].iter().any(|&s| s) {
            Decision::Overlap
        } else {
            Decision::Accepted
        };

        on_decision(&candidate, decision);

        if decision == Decision::Accepted {
            if !allow_overlapping {
                word_selected[range].iter_mut().for_each(|s| *s = true);
            }
            accepted.push(candidate);
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const O: usize = 0;
    const ORG: usize = 1;
    const PER: usize = 2;

    fn span(slot: usize, start: usize, end: usize, label_id: usize, score: f32) -> ScoredSpan {
        ScoredSpan {
            slot,
            word_start: start,
            word_end: end,
            label_id,
            score,
        }
    }

    fn disjoint(spans: &[ScoredSpan]) -> bool {
        spans.iter().enumerate().all(|(i, a)| {
            spans[i + 1..]
                .iter()
                .all(|b| a.word_end <= b.word_start || b.word_end <= a.word_start)
        })
    }

    #[test]
    fn test_scores_to_probs_sum_to_one() {
        let probs = scores_to_probs(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_argmax_probs_ties_pick_lowest_id() {
        let logits = array![[0.0f32, 0.0, 0.0], [1.0, 5.0, 5.0]];
        let preds = argmax_probs(logits.view());
        assert_eq!(preds[0].0, 0);
        assert!((preds[0].1 - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(preds[1].0, 1);
    }

    #[test]
    fn test_score_spans_drops_padding_slots() {
        let spans = vec![(0, 1), (0, 2)];
        let preds = vec![(1, 0.9), (0, 0.8), (2, 0.7), (2, 0.6)];
        let scored = score_spans(&spans, &preds);
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[1], span(1, 0, 2, 0, 0.8));
    }

    #[test]
    fn test_overlapping_spans_keep_highest_score() {
        // ORG cobre as palavras 1..3 com 0.9; PER cobre 2..3 com 0.6
        let candidates = vec![span(0, 1, 3, ORG, 0.9), span(1, 2, 3, PER, 0.6)];

        let accepted = decode(&candidates, O, 4, false);
        assert_eq!(accepted, vec![span(0, 1, 3, ORG, 0.9)]);

        let accepted = decode(&candidates, O, 4, true);
        assert_eq!(accepted.len(), 2);
    }

    #[test]
    fn test_lower_score_first_in_slot_order_is_still_blocked() {
        let candidates = vec![span(0, 0, 2, PER, 0.5), span(1, 1, 2, ORG, 0.8)];
        let accepted = decode(&candidates, O, 2, false);
        assert_eq!(accepted, vec![span(1, 1, 2, ORG, 0.8)]);
    }

    #[test]
    fn test_ties_resolved_by_slot_order() {
        let candidates = vec![span(0, 0, 2, PER, 0.7), span(1, 1, 3, ORG, 0.7)];
        let accepted = decode(&candidates, O, 3, false);
        assert_eq!(accepted, vec![span(0, 0, 2, PER, 0.7)]);

        let swapped = vec![span(0, 1, 3, ORG, 0.7), span(1, 0, 2, PER, 0.7)];
        let accepted = decode(&swapped, O, 3, false);
        assert_eq!(accepted, vec![span(0, 1, 3, ORG, 0.7)]);
    }

    #[test]
    fn test_greedy_is_not_optimal_weight() {
        // O span longo (0.9) bloqueia dois spans (0.8 + 0.8) de soma maior
        let candidates = vec![
            span(0, 0, 1, PER, 0.8),
            span(1, 0, 2, ORG, 0.9),
            span(2, 1, 2, PER, 0.8),
        ];
        let accepted = decode(&candidates, O, 2, false);
        assert_eq!(accepted, vec![span(1, 0, 2, ORG, 0.9)]);
    }

    #[test]
    fn test_outside_spans_never_claim_words() {
        let candidates = vec![span(0, 0, 2, O, 0.99), span(1, 0, 1, PER, 0.6)];
        let accepted = decode(&candidates, O, 2, false);
        assert_eq!(accepted, vec![span(1, 0, 1, PER, 0.6)]);
    }

    #[test]
    fn test_all_outside_is_empty() {
        let candidates = vec![span(0, 0, 1, O, 0.9)];
        assert!(decode(&candidates, O, 1, false).is_empty());
        assert!(decode(&[], O, 0, false).is_empty());
    }

    #[test]
    fn test_non_overlapping_result_is_disjoint() {
        // Todos os spans de até 3 palavras numa sentença de 6, com scores variados
        let mut candidates = Vec::new();
        let mut slot = 0;
        for start in 0..6 {
            for end in (start + 1)..=(start + 3).min(6) {
                let score = ((slot * 37) % 17) as f32 / 17.0;
                let label = if slot % 4 == 0 { O } else { 1 + slot % 2 };
                candidates.push(span(slot, start, end, label, score));
                slot += 1;
            }
        }

        let accepted = decode(&candidates, O, 6, false);
        assert!(!accepted.is_empty());
        assert!(disjoint(&accepted));

        let all = decode(&candidates, O, 6, true);
        let non_outside = candidates.iter().filter(|c| c.label_id != O).count();
        assert_eq!(all.len(), non_outside);
    }

    #[test]
    fn test_decisions_are_reported_in_score_order() {
        let candidates = vec![
            span(0, 0, 1, O, 0.95),
            span(1, 0, 2, PER, 0.9),
            span(2, 1, 2, ORG, 0.5),
        ];
        let mut decisions = Vec::new();
        decode_with(&candidates, O, 2, false, |c, d| decisions.push((c.slot, d)));
        assert_eq!(
            decisions,
            vec![
                (0, Decision::Outside),
                (1, Decision::Accepted),
                (2, Decision::Overlap)
            ]
        );
    }
}
