use serde::Serialize;

use super::Deployment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Forward,
    Same,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("unknown status '{0}'")]
    UnknownStatus(String),
    #[error("「{from}」から「{to}」へは戻せません")]
    RollbackNotAllowed { from: String, to: String },
    #[error("「{from}」から「{to}」へ戻す理由を入力してください")]
    ReasonRequired { from: String, to: String },
}

impl Deployment {
    /// Classify a move without looking at the reason. Rollbacks outside the
    /// whitelist are rejected here.
    pub fn classify(&self, from: &str, to: &str) -> Result<Transition, TransitionError> {
        let from_idx = self
            .stage_index(from)
            .ok_or_else(|| TransitionError::UnknownStatus(from.to_string()))?;
        let to_idx = self
            .stage_index(to)
            .ok_or_else(|| TransitionError::UnknownStatus(to.to_string()))?;

        if to_idx == from_idx {
            return Ok(Transition::Same);
        }
        if to_idx > from_idx {
            return Ok(Transition::Forward);
        }

        let permitted = self
            .revertible
            .get(from)
            .is_some_and(|targets| targets.iter().any(|t| t == to));
        if permitted {
            Ok(Transition::Rollback)
        } else {
            Err(TransitionError::RollbackNotAllowed {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Full check run before any status write.
    pub fn check_transition(
        &self,
        from: &str,
        to: &str,
        reason: Option<&str>,
    ) -> Result<Transition, TransitionError> {
        let transition = self.classify(from, to)?;
        if transition == Transition::Rollback
            && reason.map(str::trim).is_none_or(str::is_empty)
        {
            return Err(TransitionError::ReasonRequired {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(transition)
    }

    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        self.classify(from, to).is_ok()
    }

    pub fn requires_reason(&self, from: &str, to: &str) -> bool {
        matches!(self.classify(from, to), Ok(Transition::Rollback))
    }

    /// Stages an episode in `from` may be dropped onto, excluding `from` itself.
    pub fn allowed_targets(&self, from: &str) -> Vec<&str> {
        self.stages
            .iter()
            .map(String::as_str)
            .filter(|to| *to != from && self.can_transition(from, to))
            .collect()
    }
}
