pub mod analysis_state;

pub use analysis_state::{get_snapshot, AnalysisStateActor, AnalysisStateMsg};
