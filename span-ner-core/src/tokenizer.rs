//! # Tokenizador com Marcadores de Span
//!
//! Transforma uma sentença em linhas empacotadas prontas para o collator.
//! Cada palavra vira um token (vocabulário por hashing) e cada span candidato
//! ganha um par de marcadores (início/fim) no fim da sequência:
//!
//! ```text
//! "Tim Cook became CEO"
//!
//! input_ids:    [CLS] tim cook became ceo [SEP] | <s> <s> ... | </s> </s> ...
//! position_ids:   0    1    2     3     4    5  |  1   1  ... |   1    2  ...
//!                                                  (0,1) (0,2)    (0,1) (0,2)
//! ```
//!
//! O marcador de início recebe o `position_id` da primeira palavra do span e o de
//! fim, o da última palavra. Quando há mais spans candidatos que `M` marcadores,
//! a sentença é dividida em várias linhas com o mesmo contexto.
//!
//! ## Palavras e offsets
//!
//! Texto bruto é dividido nas fronteiras de palavra Unicode (`unicode-segmentation`),
//! descartando espaços. Palavras pré-tokenizadas são usadas como estão, com offsets
//! calculados como se estivessem unidas por um único espaço. Offsets de caractere
//! são contados em escalares Unicode; os offsets de byte servem para fatiar o texto.

use serde::{Deserialize, Serialize};
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::SpanConfig;
use crate::error::{Result, SpanError};
use crate::layout::MarkerLayout;

pub const PAD_ID: u32 = 0;
pub const CLS_ID: u32 = 1;
pub const SEP_ID: u32 = 2;
pub const START_MARKER_ID: u32 = 3;
pub const END_MARKER_ID: u32 = 4;
/// Primeiro id disponível para palavras do vocabulário.
pub const FIRST_WORD_ID: u32 = 5;

/// Uma sentença de entrada: texto bruto ou lista de palavras.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sentence {
    Text(String),
    Words(Vec<String>),
}

impl Sentence {
    pub fn is_empty(&self) -> bool {
        match self {
            Sentence::Text(text) => text.trim().is_empty(),
            Sentence::Words(words) => words.is_empty(),
        }
    }
}

/// Uma palavra com suas posições no texto original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    /// Offset de caractere inicial (inclusivo).
    pub char_start: usize,
    /// Offset de caractere final (exclusivo).
    pub char_end: usize,
    pub byte_start: usize,
    pub byte_end: usize,
}

/// Uma linha do batch, antes do padding.
///
/// `input_ids` e `position_ids` contêm o contexto seguido de `num_spans`
/// marcadores de início e `num_spans` marcadores de fim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedRow {
    pub input_ids: Vec<u32>,
    pub position_ids: Vec<u32>,
    pub context_len: usize,
    pub num_spans: usize,
}

/// Resultado da tokenização de uma sentença.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedSentence {
    pub rows: Vec<TokenizedRow>,
    pub num_words: usize,
    pub words: Vec<Word>,
    /// Spans candidatos na mesma ordem em que ocupam os slots das linhas.
    pub spans: Vec<(usize, usize)>,
}

impl TokenizedSentence {
    /// Offsets de caractere `(início, fim)` da palavra `word_index`.
    pub fn word_to_chars(&self, word_index: usize) -> Result<(usize, usize)> {
        self.words
            .get(word_index)
            .map(|w| (w.char_start, w.char_end))
            .ok_or_else(|| {
                SpanError::tokenizer(format!(
                    "palavra {word_index} fora do intervalo 0..{}",
                    self.words.len()
                ))
            })
    }

    /// Verifica que todo span é `[início, fim)` não vazio dentro de `0..num_words`.
    pub fn check_spans(&self) -> Result<()> {
        match self
            .spans
            .iter()
            .find(|&&(start, end)| start >= end || end > self.num_words)
        {
            Some(&(start, end)) => Err(SpanError::tokenizer(format!(
                "span inválido ({start}, {end}) para {} palavras",
                self.num_words
            ))),
            None => Ok(()),
        }
    }

    /// Offsets de byte `(início, fim)` da palavra `word_index`.
    pub fn word_to_bytes(&self, word_index: usize) -> Result<(usize, usize)> {
        self.words
            .get(word_index)
            .map(|w| (w.byte_start, w.byte_end))
            .ok_or_else(|| SpanError::tokenizer(format!("palavra {word_index} inexistente")))
    }
}

/// Colaborador que converte sentenças em linhas com marcadores.
///
/// Os spans devolvidos devem satisfazer `início < fim <= num_words`; o pipeline
/// rejeita qualquer outro com [`SpanError::Tokenizer`].
pub trait SpanTokenizer: Send + Sync {
    fn tokenize(&self, sentence: &Sentence) -> Result<TokenizedSentence>;

    /// Layout de marcadores usado para montar as linhas.
    fn layout(&self) -> MarkerLayout;

    /// Spans candidatos para `num_words` palavras.
    fn candidate_spans(&self, num_words: usize, entity_max_length: usize) -> Vec<(usize, usize)> {
        candidate_spans(num_words, entity_max_length)
    }
}

/// Enumera todos os spans `[início, fim)` com até `entity_max_length` palavras.
///
/// Ordem: por início crescente e, para cada início, por fim crescente.
pub fn candidate_spans(num_words: usize, entity_max_length: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for start in 0..num_words {
        let last = num_words.min(start + entity_max_length);
        for end in (start + 1)..=last {
            spans.push((start, end));
        }
    }
    spans
}

/// Divide texto bruto em palavras nas fronteiras Unicode, ignorando espaços.
pub fn split_words(text: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut char_pos = 0;

    for (byte_start, segment) in text.split_word_bound_indices() {
        let len = segment.chars().count();
        if !segment.chars().all(char::is_whitespace) {
            words.push(Word {
                text: segment.to_string(),
                char_start: char_pos,
                char_end: char_pos + len,
                byte_start,
                byte_end: byte_start + segment.len(),
            });
        }
        char_pos += len;
    }
    words
}

/// Offsets de palavras pré-tokenizadas, como se unidas por um espaço.
pub fn join_words(words: &[String]) -> Vec<Word> {
    let mut result = Vec::with_capacity(words.len());
    let mut char_pos = 0;
    let mut byte_pos = 0;
    for word in words {
        let chars = word.chars().count();
        result.push(Word {
            text: word.clone(),
            char_start: char_pos,
            char_end: char_pos + chars,
            byte_start: byte_pos,
            byte_end: byte_pos + word.len(),
        });
        char_pos += chars + 1;
        byte_pos += word.len() + 1;
    }
    result
}

/// Tokenizador de referência: uma palavra = um token, ids por hashing FNV-1a.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    vocab_size: u32,
    layout: MarkerLayout,
    entity_max_length: usize,
    model_max_length: usize,
}

impl WordTokenizer {
    pub fn from_config(config: &SpanConfig) -> Result<Self> {
        config.validate()?;
        let vocab_size = u32::try_from(config.vocab_size)
            .map_err(|_| SpanError::config("vocab_size não cabe em u32"))?;
        Ok(Self {
            vocab_size,
            layout: config.layout()?,
            entity_max_length: config.entity_max_length,
            model_max_length: config.model_max_length,
        })
    }

    /// Id de vocabulário de uma palavra (case-insensitive).
    pub fn word_id(&self, word: &str) -> u32 {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in word.to_lowercase().bytes() {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        FIRST_WORD_ID + hash % (self.vocab_size - FIRST_WORD_ID)
    }

    fn build_row(&self, context_ids: &[u32], spans: &[(usize, usize)]) -> TokenizedRow {
        let context_len = context_ids.len();
        let mut input_ids = Vec::with_capacity(context_len + 2 * spans.len());
        let mut position_ids = Vec::with_capacity(context_len + 2 * spans.len());

        input_ids.extend_from_slice(context_ids);
        position_ids.extend(0..context_len as u32);

        // A palavra i ocupa a posição i + 1 (depois do [CLS])
        for &(start, _) in spans {
            input_ids.push(START_MARKER_ID);
            position_ids.push(start as u32 + 1);
        }
        for &(_, end) in spans {
            input_ids.push(END_MARKER_ID);
            position_ids.push(end as u32);
        }

        TokenizedRow {
            input_ids,
            position_ids,
            context_len,
            num_spans: spans.len(),
        }
    }
}

impl SpanTokenizer for WordTokenizer {
    fn tokenize(&self, sentence: &Sentence) -> Result<TokenizedSentence> {
        let mut words = match sentence {
            Sentence::Text(text) => split_words(text),
            Sentence::Words(words) => join_words(words),
        };

        // [CLS] e [SEP] ocupam duas posições do contexto
        let max_words = self.model_max_length.saturating_sub(2);
        if max_words == 0 && !words.is_empty() {
            return Err(SpanError::tokenizer("model_max_length não comporta nenhuma palavra"));
        }
        if words.len() > max_words {
            warn!(
                total = words.len(),
                kept = max_words,
                "sentença truncada para caber em model_max_length"
            );
            words.truncate(max_words);
        }

        let num_words = words.len();
        let spans = self.candidate_spans(num_words, self.entity_max_length);

        let mut context_ids = Vec::with_capacity(num_words + 2);
        context_ids.push(CLS_ID);
        context_ids.extend(words.iter().map(|w| self.word_id(&w.text)));
        context_ids.push(SEP_ID);

        let rows = spans
            .chunks(self.layout.marker_count)
            .map(|chunk| self.build_row(&context_ids, chunk))
            .collect();

        Ok(TokenizedSentence {
            rows,
            num_words,
            words,
            spans,
        })
    }

    fn layout(&self) -> MarkerLayout {
        self.layout
    }
}
