//! Pipeline configuration: frozen defaults snapshotted into each run's
//! state, and the provider/model registry with cost metadata.

mod defaults;
mod providers;

pub use defaults::{ConfigSnapshot, PipelineDefaults, RepoDefaults};
pub use providers::{
    list_available_models, model_cost, provider_for_model, ModelConfig, DEFAULT_MODEL_COST,
};
