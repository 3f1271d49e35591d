pub mod block;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod design;
pub mod planner;
pub mod probe;
pub mod sanity;
pub mod segment;
pub mod sequence;
pub mod store;
pub mod trial;

pub use catalog::{Bucket, Catalog, CatalogEntry};
pub use config::Config;
pub use design::{StudyDesign, TaskKind};
pub use planner::{PlanMode, PlanRequest, Planner};
pub use probe::{DurationProbe, ProbeChain};
pub use segment::{Segment, SegmentResolver};
pub use sequence::{NodeChain, Symbol};
pub use store::ProvenanceStore;
pub use trial::{TrialTable, Trace};
