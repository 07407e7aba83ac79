pub mod accumulator;
pub mod aggregator;
pub mod analytics;
pub mod dag;
pub mod discovery;
pub mod error;
pub mod fanout;
pub mod parse;
pub mod record;
pub mod report;
pub mod results;
pub mod task;

/* --------- Núcleo: agregación multi-dimensión --------- */

pub use accumulator::{AggregateFunction, AggregateResult, MetricsAccumulator, ViewMetrics};
pub use aggregator::{aggregate, aggregate_chunked, GroupedResults};
pub use fanout::{standard_dimensions, DimensionResults, FanOut};
pub use record::{GroupKey, KeySelector, KeyValue, Projection, Record, RecordField};

/* --------- Núcleo: ejecución del DAG --------- */

pub use dag::{Dag, DagReport, TaskReport};
pub use task::{Task, TaskId, TaskStatus};

pub use error::{AggregateError, TaskError};
