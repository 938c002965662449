//! Built-in adversarial benchmark datasets
//!
//! Each entry binds a dataset type to a fixed upstream id on the rows API.
//! The upstream id, config and split stay overridable per import.

use std::sync::Arc;

use super::{DatasetDefinition, DatasetFetcher, DatasetProvider, RowsApiProvider};

/// `(dataset type, upstream id, description)`
pub const BUILTIN_DATASETS: &[(&str, &str, &str)] = &[
    (
        "advbench",
        "walledai/AdvBench",
        "AdvBench harmful behaviors (goal/target pairs)",
    ),
    (
        "harmbench",
        "walledai/HarmBench",
        "HarmBench standard behaviors",
    ),
    (
        "jailbreakbench",
        "JailbreakBench/JBB-Behaviors",
        "JailbreakBench misuse behaviors",
    ),
    (
        "do_not_answer",
        "LibrAI/do-not-answer",
        "Do-Not-Answer risky instructions",
    ),
    (
        "beavertails",
        "PKU-Alignment/BeaverTails",
        "BeaverTails QA pairs with harm labels",
    ),
    (
        "rows_api",
        "",
        "Any dataset on the rows API; set dataset=<org/name>",
    ),
];

/// Register every built-in dataset type against `provider`
pub fn register_builtin(fetcher: &mut DatasetFetcher, provider: Arc<dyn DatasetProvider>) {
    for (dataset_type, upstream, description) in BUILTIN_DATASETS {
        let default_dataset = (!upstream.is_empty()).then_some(*upstream);
        fetcher.register(DatasetDefinition {
            dataset_type: dataset_type.to_string(),
            description: description.to_string(),
            schema: RowsApiProvider::schema(default_dataset),
            provider: provider.clone(),
        });
    }
}

/// Fetcher preloaded with the built-in catalog
pub fn builtin_fetcher(provider: Arc<dyn DatasetProvider>) -> DatasetFetcher {
    let mut fetcher = DatasetFetcher::new();
    register_builtin(&mut fetcher, provider);
    fetcher
}
