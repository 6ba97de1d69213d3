pub mod controller;
pub mod error;
pub mod slot;
pub mod variant;
pub mod worker;

pub use controller::{
    Accepted, Backend, PipelineController, PipelineSlots, PipelineStats, PipelineStatus,
    ResultStatus, Started, Stopped, VariantChange,
};
pub use error::PipelineError;
pub use slot::{FrameSlot, SlotStats};
pub use variant::VariantSelector;
pub use worker::ProcessedResult;
