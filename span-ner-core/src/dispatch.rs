//! # Despacho de Entradas (`predict`)
//!
//! Classifica o formato da entrada e roteia cada sentença para
//! [`SpanPipeline::predict_one`], preservando a estrutura de lote.
//!
//! | Entrada                                   | Interpretação                  |
//! |-------------------------------------------|--------------------------------|
//! | `"Tim Cook became CEO"`                   | uma sentença em texto bruto    |
//! | `["Tim", "Cook", "became", "CEO"]`        | uma sentença pré-tokenizada    |
//! | `["Tim Cook became CEO", "Lula venceu"]`  | lote de textos                 |
//! | `[["Tim", "Cook"], ["Lula"]]`             | lote de sentenças tokenizadas  |
//!
//! ## Ambiguidade
//! Uma lista de textos sem espaços é sempre lida como **uma** sentença
//! pré-tokenizada: `["Lula", "Recife"]` nunca é um lote de duas frases de uma
//! palavra. Para forçar o lote, envie cada item como lista de palavras
//! (`[["Lula"], ["Recife"]]`).

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::encoder::Encoder;
use crate::error::Result;
use crate::pipeline::{Entity, SpanPipeline};
use crate::tokenizer::{Sentence, SpanTokenizer};

/// Item de uma lista de entrada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputItem {
    Text(String),
    Words(Vec<String>),
}

/// Entrada aceita por [`SpanPipeline::predict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictInput {
    Text(String),
    List(Vec<InputItem>),
}

/// Resultado de [`SpanPipeline::predict`], com a mesma forma da entrada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prediction {
    Single(Vec<Entity>),
    Batch(Vec<Vec<Entity>>),
}

impl Prediction {
    /// Total de entidades, somando todas as sentenças do lote.
    pub fn num_entities(&self) -> usize {
        match self {
            Prediction::Single(entities) => entities.len(),
            Prediction::Batch(batch) => batch.iter().map(Vec::len).sum(),
        }
    }
}

/// Forma reconhecida da entrada.
enum Routed {
    Empty,
    Single(Sentence),
    Batch(Vec<Sentence>),
}

impl PredictInput {
    fn route(&self) -> Routed {
        match self {
            PredictInput::Text(text) => Routed::Single(Sentence::Text(text.clone())),
            PredictInput::List(items) if items.is_empty() => Routed::Empty,
            PredictInput::List(items) => {
                let words: Option<Vec<String>> = items
                    .iter()
                    .map(|item| match item {
                        InputItem::Text(word) if !word.contains(' ') => Some(word.clone()),
                        _ => None,
                    })
                    .collect();
                match words {
                    Some(words) => Routed::Single(Sentence::Words(words)),
                    None => Routed::Batch(items.iter().map(InputItem::to_sentence).collect()),
                }
            }
        }
    }
}

impl InputItem {
    fn to_sentence(&self) -> Sentence {
        match self {
            InputItem::Text(text) => Sentence::Text(text.clone()),
            InputItem::Words(words) => Sentence::Words(words.clone()),
        }
    }
}

impl<T: SpanTokenizer, E: Encoder> SpanPipeline<T, E> {
    /// Reconhece entidades em qualquer formato de entrada aceito.
    pub fn predict(&self, input: &PredictInput, allow_overlapping: bool) -> Result<Prediction> {
        match input.route() {
            Routed::Empty => Ok(Prediction::Single(vec![])),
            Routed::Single(sentence) => Ok(Prediction::Single(self.predict_one(&sentence, allow_overlapping)?)),
            Routed::Batch(sentences) => {
                debug!(sentences = sentences.len(), "lote sequencial");
                let batch = sentences
                    .iter()
                    .map(|sentence| self.predict_one(sentence, allow_overlapping))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Prediction::Batch(batch))
            }
        }
    }

    /// Igual a [`predict`](Self::predict), processando o lote em paralelo com Rayon.
    ///
    /// A ordem das sentenças na saída é a mesma da entrada.
    pub fn predict_par(&self, input: &PredictInput, allow_overlapping: bool) -> Result<Prediction> {
        match input.route() {
            Routed::Batch(sentences) => {
                debug!(sentences = sentences.len(), "lote paralelo");
                let batch = sentences
                    .par_iter()
                    .map(|sentence| self.predict_one(sentence, allow_overlapping))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Prediction::Batch(batch))
            }
            _ => self.predict(input, allow_overlapping),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{nested_pipeline, pipeline};
    use crate::pipeline::SpanText;

    fn list(items: &[&str]) -> PredictInput {
        PredictInput::List(items.iter().map(|s| InputItem::Text(s.to_string())).collect())
    }

    fn words(items: &[&str]) -> InputItem {
        InputItem::Words(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_raw_text_is_single_sentence() {
        let pipeline = pipeline(32);
        let input = PredictInput::Text("Tim Cook became CEO".into());
        match pipeline.predict(&input, false).unwrap() {
            Prediction::Single(entities) => {
                assert_eq!(entities.len(), 1);
                assert_eq!(entities[0].span, SpanText::Text("Tim Cook".into()));
            }
            other => panic!("esperado Single, veio {other:?}"),
        }
    }

    #[test]
    fn test_word_list_is_pretokenized_sentence() {
        let pipeline = pipeline(32);
        match pipeline.predict(&list(&["Tim", "Cook"]), false).unwrap() {
            Prediction::Single(entities) => {
                assert_eq!(entities.len(), 1);
                assert_eq!(entities[0].span, SpanText::Words(vec!["Tim".into(), "Cook".into()]));
            }
            other => panic!("esperado Single, veio {other:?}"),
        }
    }

    #[test]
    fn test_texts_with_spaces_are_batch() {
        let pipeline = pipeline(32);
        let prediction = pipeline.predict(&list(&["Tim Cook", "is CEO"]), false).unwrap();
        match prediction {
            Prediction::Batch(batch) => {
                // o classificador de teste marca as duas primeiras palavras de cada sentença
                assert_eq!(batch.len(), 2);
                assert_eq!(batch[0][0].span, SpanText::Text("Tim Cook".into()));
                assert_eq!(batch[1][0].span, SpanText::Text("is CEO".into()));
            }
            other => panic!("esperado Batch, veio {other:?}"),
        }
    }

    #[test]
    fn test_one_spaced_item_turns_list_into_batch() {
        // "Cook" sozinho vira uma sentença de uma palavra
        let pipeline = pipeline(32);
        let prediction = pipeline.predict(&list(&["Tim Cook", "Cook"]), false).unwrap();
        assert!(matches!(prediction, Prediction::Batch(ref b) if b.len() == 2));
    }

    #[test]
    fn test_list_of_word_lists_is_batch() {
        let pipeline = pipeline(32);
        let input = PredictInput::List(vec![words(&["Tim", "Cook"]), words(&["Oi"])]);
        match pipeline.predict(&input, false).unwrap() {
            Prediction::Batch(batch) => {
                assert_eq!(batch[0][0].span, SpanText::Words(vec!["Tim".into(), "Cook".into()]));
                assert!(batch[1].is_empty());
            }
            other => panic!("esperado Batch, veio {other:?}"),
        }
    }

    fn word_ranges(entities: &[Entity]) -> Vec<(usize, usize)> {
        entities.iter().map(|e| (e.word_start_index, e.word_end_index)).collect()
    }

    #[test]
    fn test_batch_forwards_allow_overlapping() {
        let pipeline = nested_pipeline();
        let input = list(&["Tim Cook", "Tim Cook"]);

        for prediction in [pipeline.predict(&input, true).unwrap(), pipeline.predict_par(&input, true).unwrap()] {
            let Prediction::Batch(batch) = prediction else {
                panic!("esperado Batch");
            };
            assert_eq!(batch.len(), 2);
            for entities in &batch {
                assert_eq!(word_ranges(entities), vec![(0, 2), (1, 2)]);
            }
        }

        let Prediction::Batch(batch) = pipeline.predict(&input, false).unwrap() else {
            panic!("esperado Batch");
        };
        for entities in &batch {
            assert_eq!(word_ranges(entities), vec![(0, 2)]);
        }
    }

    #[test]
    fn test_empty_input() {
        let pipeline = pipeline(8);
        let prediction = pipeline.predict(&PredictInput::List(vec![]), false).unwrap();
        assert_eq!(prediction, Prediction::Single(vec![]));
        assert_eq!(prediction.num_entities(), 0);
    }

    #[test]
    fn test_parallel_batch_preserves_order() {
        let pipeline = pipeline(4);
        let input = list(&["Oi tudo bem", "Tim Cook now leads Apple", "Tim Cook became CEO", "bom dia"]);
        let sequential = pipeline.predict(&input, false).unwrap();
        let parallel = pipeline.predict_par(&input, false).unwrap();
        assert_eq!(sequential, parallel);
        assert_eq!(parallel.num_entities(), 5);
    }

    #[test]
    fn test_deserializes_untagged_json() {
        let input: PredictInput = serde_json::from_str(r#""Tim Cook""#).unwrap();
        assert_eq!(input, PredictInput::Text("Tim Cook".into()));

        let input: PredictInput = serde_json::from_str(r#"["Tim", "Cook"]"#).unwrap();
        assert_eq!(input, list(&["Tim", "Cook"]));

        let input: PredictInput = serde_json::from_str(r#"[["Tim", "Cook"], "Oi"]"#).unwrap();
        assert_eq!(
            input,
            PredictInput::List(vec![words(&["Tim", "Cook"]), InputItem::Text("Oi".into())])
        );
    }

    #[test]
    fn test_prediction_serializes_as_plain_lists() {
        let json = serde_json::to_value(Prediction::Batch(vec![vec![], vec![]])).unwrap();
        assert_eq!(json, serde_json::json!([[], []]));
    }
}
