mod guard;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub use guard::{Transition, TransitionError};

#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error("unknown deployment '{0}' (expected pmlibrary or pmplatto)")]
    UnknownPreset(String),
    #[error("failed to read deployment file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid deployment file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid deployment: {0}")]
    Invalid(String),
}

/// Per-deployment pipeline record. Everything that differs between the
/// pmlibrary and pmplatto installations lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub app: String,
    pub display_name: String,
    pub episode_table: String,
    pub stages: Vec<String>,
    pub program_stages: Vec<String>,
    /// Program stage that is valid but hidden from the default program list.
    #[serde(default)]
    pub casting_stage: Option<String>,
    #[serde(default)]
    pub task_presets: Vec<String>,
    #[serde(default)]
    pub team_event_presets: Vec<String>,
    #[serde(default)]
    pub colors: BTreeMap<String, String>,
    #[serde(default)]
    pub revertible: BTreeMap<String, Vec<String>>,
}

const EPISODE_STAGES: [&str; 10] = [
    "台本作成中",
    "素材準備",
    "素材確定",
    "編集中",
    "試写1",
    "修正1",
    "MA中",
    "初稿完成",
    "修正中",
    "完パケ納品",
];

const ROLLBACKS: [(&str, &[&str]); 10] = [
    ("台本作成中", &[]),
    ("素材準備", &["台本作成中"]),
    ("素材確定", &["素材準備"]),
    ("編集中", &["素材確定"]),
    ("試写1", &["編集中"]),
    ("修正1", &["編集中"]),
    ("MA中", &["修正1"]),
    ("初稿完成", &["修正1", "MA中"]),
    ("修正中", &["編集中"]),
    ("完パケ納品", &[]),
];

const PROGRAM_STAGES: [&str; 9] = [
    "日程調整中",
    "ロケハン前",
    "収録準備中",
    "編集中",
    "試写中",
    "MA中",
    "完パケ納品",
    "放送済み",
    "キャスティング中",
];

const LIBRARY_PALETTE: [&str; 10] = [
    "#6B7280", "#8B5CF6", "#6366F1", "#3B82F6", "#06B6D4", "#10B981", "#84CC16", "#EAB308",
    "#F59E0B", "#22C55E",
];

const PLATTO_PALETTE: [&str; 10] = [
    "#94A3B8", "#7C3AED", "#4F46E5", "#2563EB", "#0891B2", "#059669", "#65A30D", "#CA8A04",
    "#DC2626", "#16A34A",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Deployment {
    pub fn preset(name: &str) -> Result<Self, DeploymentError> {
        let (display_name, episode_table, palette) = match name {
            "pmlibrary" => ("リベラリー進捗すごろく", "liberary_episode", LIBRARY_PALETTE),
            "pmplatto" => ("プラッと進捗すごろく", "episodes", PLATTO_PALETTE),
            other => return Err(DeploymentError::UnknownPreset(other.to_string())),
        };

        Ok(Self {
            app: name.to_string(),
            display_name: display_name.to_string(),
            episode_table: episode_table.to_string(),
            stages: strings(&EPISODE_STAGES),
            program_stages: strings(&PROGRAM_STAGES),
            casting_stage: Some("キャスティング中".to_string()),
            task_presets: strings(&["編集", "試写", "MA"]),
            team_event_presets: strings(&["🌐 全体会議", "💼 制作会議", "🎬 スタジオ収録", "⚠️ 重要"]),
            colors: EPISODE_STAGES
                .iter()
                .zip(palette.iter())
                .map(|(s, c)| (s.to_string(), c.to_string()))
                .collect(),
            revertible: ROLLBACKS
                .iter()
                .map(|(s, targets)| (s.to_string(), strings(targets)))
                .collect(),
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, DeploymentError> {
        let deployment: Deployment = toml::from_str(raw)?;
        deployment.validate()?;
        Ok(deployment)
    }

    pub fn load_file(path: &Path) -> Result<Self, DeploymentError> {
        let raw = std::fs::read_to_string(path).map_err(|source| DeploymentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), DeploymentError> {
        if self.stages.is_empty() {
            return Err(DeploymentError::Invalid("stages must not be empty".into()));
        }
        if self.program_stages.is_empty() {
            return Err(DeploymentError::Invalid(
                "program_stages must not be empty".into(),
            ));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].contains(stage) {
                return Err(DeploymentError::Invalid(format!(
                    "duplicate stage '{}'",
                    stage
                )));
            }
        }
        for (from, targets) in &self.revertible {
            let Some(from_idx) = self.stage_index(from) else {
                return Err(DeploymentError::Invalid(format!(
                    "rollback entry for unknown stage '{}'",
                    from
                )));
            };
            for target in targets {
                match self.stage_index(target) {
                    Some(idx) if idx < from_idx => {}
                    Some(_) => {
                        return Err(DeploymentError::Invalid(format!(
                            "rollback target '{}' is not earlier than '{}'",
                            target, from
                        )));
                    }
                    None => {
                        return Err(DeploymentError::Invalid(format!(
                            "unknown rollback target '{}'",
                            target
                        )));
                    }
                }
            }
        }
        if let Some(casting) = &self.casting_stage
            && !self.program_stages.contains(casting)
        {
            return Err(DeploymentError::Invalid(format!(
                "casting stage '{}' is not a program stage",
                casting
            )));
        }
        Ok(())
    }

    pub fn stage_index(&self, status: &str) -> Option<usize> {
        self.stages.iter().position(|s| s == status)
    }

    pub fn first_stage(&self) -> &str {
        self.stages.first().map(String::as_str).unwrap_or_default()
    }

    /// The final stage; an episode there is never overdue.
    pub fn delivered_stage(&self) -> &str {
        self.stages.last().map(String::as_str).unwrap_or_default()
    }

    pub fn color(&self, status: &str) -> Option<&str> {
        self.colors.get(status).map(String::as_str)
    }

    pub fn program_stage_index(&self, status: &str) -> Option<usize> {
        self.program_stages.iter().position(|s| s == status)
    }

    pub fn is_program_stage(&self, status: &str) -> bool {
        self.program_stage_index(status).is_some()
    }

    pub fn first_program_stage(&self) -> &str {
        self.program_stages
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn is_casting(&self, status: &str) -> bool {
        self.casting_stage.as_deref() == Some(status)
    }
}

#[cfg(test)]
mod tests;
