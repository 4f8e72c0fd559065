//! Shared API request/response types
//!
//! Types exposed to every client: the learning stage label and the error body.

use serde::{Deserialize, Serialize};

// ========================================
// Learning Stage
// ========================================

/// Learning card state as stored (small integer encoding)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CardState {
    New,
    Learning,
    Review,
    Relearning,
}

impl TryFrom<i64> for CardState {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CardState::New),
            1 => Ok(CardState::Learning),
            2 => Ok(CardState::Review),
            3 => Ok(CardState::Relearning),
            other => Err(format!("Unknown card state: {}", other)),
        }
    }
}

impl From<CardState> for i64 {
    fn from(state: CardState) -> Self {
        match state {
            CardState::New => 0,
            CardState::Learning => 1,
            CardState::Review => 2,
            CardState::Relearning => 3,
        }
    }
}

/// Snapshot of the card fields the stage depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardProgress {
    /// Raw state value; unknown values map to `new`
    pub state: i64,
    /// Stability in days
    pub stability: f64,
}

/// User-facing progress label derived from a learning card
///
/// # Examples
///
/// ```
/// use vocab_common::api::types::{CardProgress, Stage};
///
/// let card = CardProgress { state: 2, stability: 21.0 };
/// assert_eq!(Stage::from_card(Some(&card)), Stage::Known);
/// assert_eq!(Stage::from_card(None), Stage::New);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    New,
    Practicing,
    Stabilizing,
    Known,
    Mastered,
}

impl Stage {
    /// Pure mapping from card state/stability to stage
    pub fn from_card(card: Option<&CardProgress>) -> Self {
        let Some(card) = card else {
            return Stage::New;
        };

        match CardState::try_from(card.state) {
            Ok(CardState::New) => Stage::New,
            Ok(CardState::Learning) | Ok(CardState::Relearning) => Stage::Practicing,
            Ok(CardState::Review) => {
                if card.stability < 7.0 {
                    Stage::Practicing
                } else if card.stability < 21.0 {
                    Stage::Stabilizing
                } else if card.stability < 60.0 {
                    Stage::Known
                } else {
                    Stage::Mastered
                }
            }
            Err(_) => Stage::New,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::New => "new",
            Stage::Practicing => "practicing",
            Stage::Stabilizing => "stabilizing",
            Stage::Known => "known",
            Stage::Mastered => "mastered",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========================================
// Error Response Types
// ========================================

/// Error body returned by every endpoint
///
/// ```json
/// {"error": {"code": "BAD_REQUEST", "message": "raw_word is required"}}
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(stability: f64) -> Stage {
        Stage::from_card(Some(&CardProgress { state: 2, stability }))
    }

    #[test]
    fn test_stage_review_boundaries() {
        assert_eq!(review(6.99), Stage::Practicing);
        assert_eq!(review(7.0), Stage::Stabilizing);
        assert_eq!(review(20.99), Stage::Stabilizing);
        assert_eq!(review(21.0), Stage::Known);
        assert_eq!(review(59.99), Stage::Known);
        assert_eq!(review(60.0), Stage::Mastered);
    }

    #[test]
    fn test_stage_new_ignores_stability() {
        for stability in [0.0, 30.0, 400.0] {
            let card = CardProgress { state: 0, stability };
            assert_eq!(Stage::from_card(Some(&card)), Stage::New);
        }
    }

    #[test]
    fn test_stage_missing_card_is_new() {
        assert_eq!(Stage::from_card(None), Stage::New);
    }

    #[test]
    fn test_stage_learning_and_relearning_practicing() {
        let learning = CardProgress { state: 1, stability: 100.0 };
        let relearning = CardProgress { state: 3, stability: 100.0 };
        assert_eq!(Stage::from_card(Some(&learning)), Stage::Practicing);
        assert_eq!(Stage::from_card(Some(&relearning)), Stage::Practicing);
    }

    #[test]
    fn test_stage_unknown_state_is_new() {
        let card = CardProgress { state: 9, stability: 100.0 };
        assert_eq!(Stage::from_card(Some(&card)), Stage::New);
    }

    #[test]
    fn test_stage_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Stage::Stabilizing).unwrap(), "\"stabilizing\"");
    }

    #[test]
    fn test_card_state_roundtrip_integer() {
        let state: CardState = serde_json::from_str("3").unwrap();
        assert_eq!(state, CardState::Relearning);
        assert!(serde_json::from_str::<CardState>("7").is_err());
    }
}
