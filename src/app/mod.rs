pub mod ports;
pub mod transform_use_case;

pub use ports::{ExecutionLogPort, ExtractPort, LoadPort, LoadSummary};
pub use transform_use_case::{Assessment, RunStatus, RunSummary, TransformUseCase};
