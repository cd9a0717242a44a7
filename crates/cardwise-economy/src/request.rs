// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Actions a user can ask the economy to allow.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which balance an action draws on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// AI generation of study material; draws credits.
    Generation,
    /// Export of a study set; draws export units.
    Export,
}

/// An AI-generation request. Only used to compute cost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Length of the source material in characters.
    pub source_content_length: usize,
    pub flashcard_count: u32,
    pub quiz_count: u32,
}

/// What an export produces.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    FlashcardsOnly,
    QuizOnly,
    #[default]
    Both,
}

/// An export request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub set_id: String,
    pub kind: ExportKind,
    /// Cosmetic only; has no effect on cost.
    pub include_branding: bool,
}

/// A generation or export, as submitted for evaluation or commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Generation(GenerationRequest),
    Export(ExportRequest),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Generation(_) => ActionKind::Generation,
            Self::Export(_) => ActionKind::Export,
        }
    }
}
