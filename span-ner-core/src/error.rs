//! # Erros do Sistema
//!
//! Todas as operações falíveis do crate retornam [`Result`]. Os erros seguem a
//! taxonomia do modelo:
//!
//! - **Config**: labels inconsistentes, tabela reduzida inválida, dimensões que
//!   não batem. Surgem na construção do modelo e são fatais.
//! - **Shape**: tensores com formato inesperado (ex: sequência menor que `2 × M`).
//! - **Tokenizer**: sentença que não cabe no comprimento máximo do modelo.
//!
//! A decodificação nunca gera erro: ausência de entidades é um resultado vazio.

use thiserror::Error;

/// Resultado padrão das operações do crate.
pub type Result<T> = std::result::Result<T, SpanError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SpanError {
    /// Configuração inválida (labels, dimensões, contagem de marcadores).
    #[error("Configuração inválida: {0}")]
    Config(String),

    /// Tensor com formato incompatível com o layout esperado.
    #[error("Formato de tensor inválido: {0}")]
    Shape(String),

    /// Falha ao tokenizar a sentença.
    #[error("Erro de tokenização: {0}")]
    Tokenizer(String),

    /// Falha no encoder.
    #[error("Erro no encoder: {0}")]
    Encoder(String),

    #[error("Erro de IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro de JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpanError {
    pub fn config(msg: impl Into<String>) -> Self {
        SpanError::Config(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        SpanError::Shape(msg.into())
    }

    pub fn tokenizer(msg: impl Into<String>) -> Self {
        SpanError::Tokenizer(msg.into())
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        SpanError::Encoder(msg.into())
    }
}

impl From<ndarray::ShapeError> for SpanError {
    fn from(err: ndarray::ShapeError) -> Self {
        SpanError::Shape(err.to_string())
    }
}
