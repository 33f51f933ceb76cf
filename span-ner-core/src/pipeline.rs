//! # Pipeline de Inferência — Orquestrador com Eventos Observáveis
//!
//! O pipeline coordena tokenizador, collator, modelo e decodificador para uma
//! sentença, e pode emitir eventos em cada passo via um canal Rust (`mpsc`),
//! permitindo que o servidor WebSocket transmita o progresso em tempo real.
//!
//! ```text
//! Sentence ─▶ tokenize ─▶ collate ─▶ forward ─▶ softmax/argmax ─▶ decode ─▶ Vec<Entity>
//! ```
//!
//! Tokenizador e modelo são dependências de construção: não existe pipeline
//! "meio configurado".

use std::sync::mpsc;
use std::time::Instant;

use ndarray::{s, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collator::MarkerCollator;
use crate::decoder::{argmax_probs, decode_with, score_spans, Decision, ScoredSpan};
use crate::encoder::{Encoder, HashingEncoder};
use crate::error::{Result, SpanError};
use crate::model::{ModelFile, SpanMarkerModel};
use crate::tokenizer::{Sentence, SpanTokenizer, TokenizedSentence, WordTokenizer};

/// Texto do span: fatia do texto original ou as palavras, conforme a entrada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpanText {
    Text(String),
    Words(Vec<String>),
}

/// Uma entidade reconhecida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Primeira palavra (inclusiva).
    pub word_start_index: usize,
    /// Última palavra (exclusiva).
    pub word_end_index: usize,
    /// Offset de caractere inicial no texto.
    pub char_start_index: usize,
    /// Offset de caractere final no texto (exclusivo).
    pub char_end_index: usize,
    pub label: String,
    /// Probabilidade softmax do label.
    pub score: f64,
    pub span: SpanText,
}

/// Eventos emitidos pelo pipeline durante a predição de uma sentença.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// **Passo 1**: sentença tokenizada e spans enumerados.
    TokenizationDone {
        num_words: usize,
        num_spans: usize,
        num_rows: usize,
    },
    /// **Passo 2**: um span candidato recebeu label e score.
    SpanScored {
        slot: usize,
        word_start: usize,
        word_end: usize,
        label: String,
        score: f32,
    },
    /// **Passo 3**: decisão da decodificação gulosa (em ordem de score).
    SpanDecided {
        slot: usize,
        word_start: usize,
        word_end: usize,
        label: String,
        score: f32,
        decision: Decision,
    },
    /// **Conclusão**: entidades finais em ordem de documento.
    Done {
        entities: Vec<Entity>,
        processing_ms: u64,
    },
    /// **Falha**: erro irrecuperável.
    Error { message: String },
}

pub struct SpanPipeline<T: SpanTokenizer, E: Encoder> {
    tokenizer: T,
    collator: MarkerCollator,
    model: SpanMarkerModel<E>,
}

impl SpanPipeline<WordTokenizer, HashingEncoder> {
    /// Pipeline de referência a partir de um arquivo de modelo.
    pub fn from_model_file(file: ModelFile) -> Result<Self> {
        let tokenizer = WordTokenizer::from_config(&file.config)?;
        Self::new(tokenizer, file.into_model()?)
    }
}

impl<T: SpanTokenizer, E: Encoder> SpanPipeline<T, E> {
    /// Compõe o pipeline. Tokenizador e modelo precisam usar o mesmo layout de marcadores.
    pub fn new(tokenizer: T, model: SpanMarkerModel<E>) -> Result<Self> {
        if tokenizer.layout() != model.layout() {
            return Err(SpanError::config(format!(
                "layout do tokenizador {:?} difere do layout do modelo {:?}",
                tokenizer.layout(),
                model.layout()
            )));
        }
        Ok(Self {
            collator: MarkerCollator::new(model.layout()),
            tokenizer,
            model,
        })
    }

    pub fn model(&self) -> &SpanMarkerModel<E> {
        &self.model
    }

    /// Reconhece as entidades de uma única sentença.
    pub fn predict_one(&self, sentence: &Sentence, allow_overlapping: bool) -> Result<Vec<Entity>> {
        self.run(sentence, allow_overlapping, |_| {})
    }

    /// Executa a predição enviando eventos de progresso pelo canal `tx`.
    ///
    /// # Fluxo de Eventos
    /// 1. `TokenizationDone`
    /// 2. `SpanScored` (um por span candidato, em ordem de slot)
    /// 3. `SpanDecided` (um por span candidato, em ordem de score)
    /// 4. `Done` ou `Error`
    pub fn predict_one_streaming(
        &self,
        sentence: &Sentence,
        allow_overlapping: bool,
        tx: mpsc::Sender<PipelineEvent>,
    ) {
        let result = self.run(sentence, allow_overlapping, |event| {
            let _ = tx.send(event);
        });
        if let Err(err) = result {
            let _ = tx.send(PipelineEvent::Error {
                message: err.to_string(),
            });
        }
    }

    fn run<F>(&self, sentence: &Sentence, allow_overlapping: bool, mut emit: F) -> Result<Vec<Entity>>
    where
        F: FnMut(PipelineEvent),
    {
        let start = Instant::now();
        let labels = self.model.labels();

        // === Passo 1: Tokenização ===
        let tokenized = self.tokenizer.tokenize(sentence)?;
        tokenized.check_spans()?;
        emit(PipelineEvent::TokenizationDone {
            num_words: tokenized.num_words,
            num_spans: tokenized.spans.len(),
            num_rows: tokenized.rows.len(),
        });

        if tokenized.spans.is_empty() {
            emit(PipelineEvent::Done {
                entities: vec![],
                processing_ms: start.elapsed().as_millis() as u64,
            });
            return Ok(vec![]);
        }

        // === Passo 2: Forward e scores por slot ===
        let batch = self.collator.collate(&tokenized.rows)?;
        let output = self.model.forward(&batch, None)?;

        let mut predictions = Vec::with_capacity(tokenized.spans.len());
        for (row, &num_spans) in output.logits.axis_iter(Axis(0)).zip(&output.num_spans) {
            predictions.extend(argmax_probs(row.slice(s![..num_spans, ..])));
        }
        if predictions.len() != tokenized.spans.len() {
            return Err(SpanError::shape(format!(
                "{} scores para {} spans candidatos",
                predictions.len(),
                tokenized.spans.len()
            )));
        }

        let candidates = score_spans(&tokenized.spans, &predictions);
        for c in &candidates {
            emit(PipelineEvent::SpanScored {
                slot: c.slot,
                word_start: c.word_start,
                word_end: c.word_end,
                label: labels.resolve(c.label_id).unwrap_or_default().to_string(),
                score: c.score,
            });
        }

        // === Passo 3: Decodificação gulosa ===
        let accepted = decode_with(
            &candidates,
            labels.outside_id(),
            tokenized.num_words,
            allow_overlapping,
            |c, decision| {
                emit(PipelineEvent::SpanDecided {
                    slot: c.slot,
                    word_start: c.word_start,
                    word_end: c.word_end,
                    label: labels.resolve(c.label_id).unwrap_or_default().to_string(),
                    score: c.score,
                    decision,
                })
            },
        );

        // === Passo 4: Entidades em ordem de documento ===
        let mut entities = accepted
            .iter()
            .map(|c| self.to_entity(sentence, &tokenized, c))
            .collect::<Result<Vec<_>>>()?;
        entities.sort_by_key(|e| e.word_start_index);

        debug!(
            words = tokenized.num_words,
            candidates = candidates.len(),
            entities = entities.len(),
            allow_overlapping,
            "sentença decodificada"
        );

        emit(PipelineEvent::Done {
            entities: entities.clone(),
            processing_ms: start.elapsed().as_millis() as u64,
        });
        Ok(entities)
    }

    fn to_entity(&self, sentence: &Sentence, tokenized: &TokenizedSentence, c: &ScoredSpan) -> Result<Entity> {
        let last_word = c.word_end.checked_sub(1).ok_or_else(|| {
            SpanError::tokenizer(format!("span vazio ({}, {})", c.word_start, c.word_end))
        })?;
        let (char_start_index, _) = tokenized.word_to_chars(c.word_start)?;
        let (_, char_end_index) = tokenized.word_to_chars(last_word)?;

        let span = match sentence {
            Sentence::Text(text) => {
                let (byte_start, _) = tokenized.word_to_bytes(c.word_start)?;
                let (_, byte_end) = tokenized.word_to_bytes(last_word)?;
                let slice = text.get(byte_start..byte_end).ok_or_else(|| {
                    SpanError::tokenizer(format!("offsets {byte_start}..{byte_end} inválidos no texto"))
                })?;
                SpanText::Text(slice.to_string())
            }
            Sentence::Words(words) => {
                let slice = words.get(c.word_start..c.word_end).ok_or_else(|| {
                    SpanError::tokenizer(format!("palavras {}..{} inexistentes", c.word_start, c.word_end))
                })?;
                SpanText::Words(slice.to_vec())
            }
        };

        let label = self
            .model
            .labels()
            .resolve(c.label_id)
            .ok_or_else(|| SpanError::config(format!("label id {} sem nome", c.label_id)))?
            .to_string();

        Ok(Entity {
            word_start_index: c.word_start,
            word_end_index: c.word_end,
            char_start_index,
            char_end_index,
            label,
            score: f64::from(c.score),
            span,
        })
    }
}
