//! Study designs: which block files run in which session, in what order
//!
//! Block file stems name their task (`interdms_loc_ABAB_block_0`). Every
//! task maps to a [`TaskKind`], which carries the participant instructions.
//! Designs are validated when loaded so an unknown task fails before the
//! session starts rather than when its block comes up.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DesignError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("study design references unknown tasks: {}", .0.join(", "))]
    UnknownTasks(Vec<String>),

    #[error("no block files found in {0}")]
    NoBlocks(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Location,
    Category,
    Identity,
}

impl Feature {
    pub fn code(&self) -> &'static str {
        match self {
            Feature::Location => "loc",
            Feature::Category => "ctg",
            Feature::Identity => "obj",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Feature::Location => "LOCATION",
            Feature::Category => "CATEGORY",
            Feature::Identity => "IDENTITY",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "loc" => Some(Feature::Location),
            "ctg" => Some(Feature::Category),
            "obj" => Some(Feature::Identity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    Abab,
    Abba,
}

impl Pattern {
    pub fn code(&self) -> &'static str {
        match self {
            Pattern::Abab => "ABAB",
            Pattern::Abba => "ABBA",
        }
    }

    /// Objects that objects 3 and 4 are compared against
    fn probes(&self) -> (u8, u8) {
        match self {
            Pattern::Abab => (1, 2),
            Pattern::Abba => (2, 1),
        }
    }
}

/// Rule order of a context decision-making task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    /// category gates identity / location
    Col,
    /// location gates category / identity
    Lco,
}

impl Context {
    /// (gate, comparison when gate matches, comparison otherwise)
    fn rule(&self) -> (Feature, Feature, Feature) {
        match self {
            Context::Col => (Feature::Category, Feature::Identity, Feature::Location),
            Context::Lco => (Feature::Location, Feature::Category, Feature::Identity),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Context::Col => "col",
            Context::Lco => "lco",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Dms(Feature),
    InterDms { feature: Feature, pattern: Pattern },
    OneBack(Feature),
    CtxDm(Context),
}

impl TaskKind {
    pub fn objects_per_trial(&self) -> usize {
        match self {
            TaskKind::Dms(_) => 2,
            TaskKind::CtxDm(_) => 3,
            TaskKind::InterDms { .. } => 4,
            TaskKind::OneBack(_) => 6,
        }
    }

    /// Short banner shown above the stimulus
    pub fn abbreviation(&self) -> String {
        match self {
            TaskKind::Dms(f) => format!("DMS-{}", f.label()),
            TaskKind::InterDms { feature, pattern } => {
                format!("interDMS-{}-{}", pattern.code(), feature.label())
            }
            TaskKind::OneBack(f) => format!("1back-{}", f.label()),
            TaskKind::CtxDm(c) => {
                let (gate, hit, miss) = c.rule();
                format!("ctxDM-{}-{}-{}", gate.label(), hit.label(), miss.label())
            }
        }
    }

    pub fn instruction(&self) -> String {
        let header = format!(
            "In this task, trials will have {} objects. You must do the following:\n",
            self.objects_per_trial()
        );
        let body = match self {
            TaskKind::Dms(f) => format!(
                "- When Object 2 appears, answer whether its {} matches Object 1.\n",
                f.label()
            ),
            TaskKind::InterDms { feature, pattern } => {
                let (third, fourth) = pattern.probes();
                format!(
                    "Pattern {}, feature: {}\n\
                     - When Object 3 appears, answer whether its {} matches Object {}.\n\
                     - When Object 4 appears, answer whether its {} matches Object {}.\n",
                    pattern.code(),
                    feature.label(),
                    feature.label(),
                    third,
                    feature.label(),
                    fourth
                )
            }
            TaskKind::OneBack(f) => format!(
                "- For each new object (Object n+1), answer whether its {} matches the previous object (Object n).\n",
                f.label()
            ),
            TaskKind::CtxDm(c) => {
                let (gate, hit, miss) = c.rule();
                format!(
                    "Contextual Decision-Making: {} -> {} -> {}\n\
                     - If Objects 1 and 2 match in {}, answer whether Object 3 matches Object 2 by {}.\n\
                     - Otherwise, answer whether Object 3 matches Object 2 by {}.\n",
                    gate.label(),
                    hit.label(),
                    miss.label(),
                    gate.label(),
                    hit.label(),
                    miss.label()
                )
            }
        };
        format!("{}{}1 = yes\n2 = no\n", header, body)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Dms(feat) => write!(f, "dms_{}", feat.code()),
            TaskKind::InterDms { feature, pattern } => {
                write!(f, "interdms_{}_{}", feature.code(), pattern.code())
            }
            TaskKind::OneBack(feat) => write!(f, "1back_{}", feat.code()),
            TaskKind::CtxDm(c) => write!(f, "ctxdm_{}", c.code()),
        }
    }
}

impl FromStr for TaskKind {
    type Err = DesignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || DesignError::UnknownTask(s.to_string());
        let parts: Vec<&str> = s.split('_').collect();
        let feature = |code: &str| Feature::from_code(code).ok_or_else(unknown);

        match parts.as_slice() {
            ["dms", f] => match feature(*f)? {
                Feature::Category => Err(unknown()),
                feat => Ok(TaskKind::Dms(feat)),
            },
            ["interdms", f, p] => {
                let pattern = match *p {
                    "ABAB" => Pattern::Abab,
                    "ABBA" => Pattern::Abba,
                    _ => return Err(unknown()),
                };
                Ok(TaskKind::InterDms {
                    feature: feature(*f)?,
                    pattern,
                })
            }
            ["1back", f] => Ok(TaskKind::OneBack(feature(*f)?)),
            ["ctxdm", "col"] => Ok(TaskKind::CtxDm(Context::Col)),
            ["ctxdm", "lco"] => Ok(TaskKind::CtxDm(Context::Lco)),
            _ => Err(unknown()),
        }
    }
}

/// `interdms_loc_ABAB_block_3` -> `interdms_loc_ABAB`; other stems unchanged
pub fn task_name(block_stem: &str) -> &str {
    match block_stem.rsplit_once("_block_") {
        Some((task, index)) if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) => task,
        _ => block_stem,
    }
}

pub fn design_file_name(subject: &str) -> String {
    format!("sub-{}_design.tsv", subject)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignRun {
    pub session: u32,
    pub block_file_name: String,
}

impl DesignRun {
    pub fn task(&self) -> Result<TaskKind, DesignError> {
        task_name(&self.block_file_name).parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StudyDesign {
    pub runs: Vec<DesignRun>,
}

impl StudyDesign {
    /// Order every block file of `block_dir` for `session`. Stems are sorted
    /// before the seeded shuffle so directory order never leaks in.
    pub fn from_block_dir(block_dir: &Path, session: u32, seed: u64) -> Result<Self, DesignError> {
        let mut stems: Vec<String> = std::fs::read_dir(block_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().map(|e| e == "csv").unwrap_or(false))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        if stems.is_empty() {
            return Err(DesignError::NoBlocks(block_dir.to_path_buf()));
        }
        stems.sort();
        stems.shuffle(&mut StdRng::seed_from_u64(seed));

        let design = Self {
            runs: stems
                .into_iter()
                .map(|block_file_name| DesignRun {
                    session,
                    block_file_name,
                })
                .collect(),
        };
        design.validate()?;
        Ok(design)
    }

    /// Every run must name a known task; all unknown names are reported
    pub fn validate(&self) -> Result<(), DesignError> {
        let mut unknown: Vec<String> = self
            .runs
            .iter()
            .filter(|run| run.task().is_err())
            .map(|run| task_name(&run.block_file_name).to_string())
            .collect();
        unknown.sort();
        unknown.dedup();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(DesignError::UnknownTasks(unknown))
        }
    }

    /// Merge another session's runs, replacing any earlier runs of that session
    pub fn merge(&mut self, other: StudyDesign) {
        let sessions: Vec<u32> = other.runs.iter().map(|r| r.session).collect();
        self.runs.retain(|r| !sessions.contains(&r.session));
        self.runs.extend(other.runs);
    }

    pub fn session_runs(&self, session: u32) -> Vec<(&DesignRun, TaskKind)> {
        self.runs
            .iter()
            .filter(|r| r.session == session)
            .filter_map(|r| r.task().ok().map(|t| (r, t)))
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self, DesignError> {
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
        let runs = reader.deserialize().collect::<Result<Vec<DesignRun>, _>>()?;
        let design = Self { runs };
        design.validate()?;
        Ok(design)
    }

    pub fn write(&self, path: &Path) -> Result<(), DesignError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        for run in &self.runs {
            writer.serialize(run)?;
        }
        writer.flush()?;
        info!(path = %path.display(), runs = self.runs.len(), "wrote study design");
        Ok(())
    }
}
