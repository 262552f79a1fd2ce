//! Configuration types for a batch run.

pub mod gpu;
pub mod parallel;
pub mod pipeline;
pub mod run;

pub use gpu::GpuSelection;
pub use parallel::ParallelPolicy;
pub use pipeline::PipelineOptions;
pub use run::RunConfig;
