//! # span-ner-core — Reconhecimento de Entidades por Marcadores de Span
//!
//! Este crate implementa o núcleo de inferência de um modelo NER baseado em
//! spans: em vez de rotular token a token (BIO), todo intervalo de palavras de
//! até `entity_max_length` palavras é um candidato, representado por um par de
//! marcadores (início, fim) anexado ao final da sequência.
//!
//! ## Arquitetura do Sistema
//!
//! ```text
//! Sentence
//!   │
//!   ├─▶ tokenizer   palavras, spans candidatos, linhas [contexto | M inícios | M fins]
//!   ├─▶ collator    tensores input_ids / position_ids / máscara de atenção L × L
//!   ├─▶ encoder     estados ocultos batch × L × H      (trait Encoder)
//!   ├─▶ features    concat(início_i, fim_i)            batch × M × 2H
//!   ├─▶ classifier  scores por label                   batch × M × K
//!   └─▶ decoder     softmax → argmax → guloso por score → Vec<Entity>
//! ```
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use span_ner_core::{ModelFile, PredictInput, SpanPipeline};
//!
//! let json = r#"{"config": {"labels": ["O", "PER", "LOC"], "hidden_size": 16}}"#;
//! let pipeline = SpanPipeline::from_model_file(ModelFile::from_json_str(json)?)?;
//!
//! let input = PredictInput::Text("Lula visitou Recife".into());
//! let prediction = pipeline.predict(&input, false)?;
//! println!("{}", serde_json::to_string(&prediction)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Módulos Principais
//!
//! - [`layout`]: onde ficam os marcadores dentro da sequência.
//! - [`config`]: configuração serializável e tabela de labels resolvida.
//! - [`pipeline`]: orquestrador de uma sentença, com eventos observáveis.
//! - [`dispatch`]: roteamento de texto, lista de palavras e lotes.

pub mod classifier;
pub mod collator;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod features;
pub mod layout;
pub mod model;
pub mod pipeline;
pub mod tokenizer;

pub use config::{LabelTable, SpanConfig};
pub use dispatch::{InputItem, PredictInput, Prediction};
pub use encoder::{Encoder, HashingEncoder};
pub use error::{Result, SpanError};
pub use layout::MarkerLayout;
pub use model::{ModelFile, SpanMarkerModel};
pub use pipeline::{Entity, PipelineEvent, SpanPipeline, SpanText};
pub use tokenizer::{Sentence, SpanTokenizer, WordTokenizer};
