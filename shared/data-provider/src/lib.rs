mod builder;
mod config;
mod data_provider;
mod dummy;
mod error;
mod feature_converter;
mod in_memory;
pub mod lazy;
mod loader;
mod local;
mod mixture;
mod options;
mod packing;
mod preprocessors;
mod record;
mod registry;
mod sampler;
mod task;
mod traits;

pub use builder::TaskBuilder;
pub use config::{
    ComponentConfig, FeatureConverterConfig, MixtureConfig, PreprocessorConfig, ProvidersConfig,
    SourceConfig, TaskConfig,
};
pub use data_provider::{get_dataset, Provider};
pub use dummy::DummyDataSource;
pub use error::{ConfigurationError, DatasetError};
pub use feature_converter::{FeatureConverter, PadTrimConverter};
pub use in_memory::InMemoryDataSource;
pub use loader::{DataLoader, DatasetIterator, IteratorState};
pub use local::LocalDataSource;
pub use mixture::Mixture;
pub use options::{
    DatasetOptions, SequenceLengths, DEFAULT_NUM_RECORDS_TO_INSPECT, DEFAULT_SPLIT,
    MAX_NUM_RECORDS_TO_INSPECT,
};
pub use packing::{PackDataset, PackOp, PackerKind};
pub use preprocessors::{
    apply_operations, drop_features, filter_empty, rename_feature, truncate_feature, BatchOp,
    FilterFn, MapFn, Preprocessor, RandomMapFn,
};
pub use record::{record, Record, Value};
pub use registry::Registry;
pub use sampler::{IndexSampler, SampledDataset};
pub use task::Task;
pub use traits::{DataSource, DatasetProvider, RecordSource};
