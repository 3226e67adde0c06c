//! Overlay stored signals onto a consumer's time series.
//!
//! Every signal for the pair contributes its value to the rows whose
//! timestamp falls in `[updated_at, updated_at + ttl)`. Signals are applied
//! oldest first, so where windows overlap on one column the most recent
//! signal wins.

use crate::series::Series;
use crate::signal::Scalar;
use crate::store::SignalStore;
use std::collections::HashMap;

/// Per-call projection options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionOptions {
    /// Output column; overrides the dataset-name mapping.
    pub column_name: Option<String>,
    /// Only project signals from this dataset.
    pub data_set_id: Option<String>,
    /// Also write `{column}_{key}` for each context entry.
    pub include_context: bool,
}

impl ProjectionOptions {
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column_name = Some(name.into());
        self
    }

    pub fn data_set(mut self, id: impl Into<String>) -> Self {
        self.data_set_id = Some(id.into());
        self
    }

    pub fn with_context(mut self) -> Self {
        self.include_context = true;
        self
    }
}

/// Counts from one projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionSummary {
    /// Signals considered for the pair.
    pub signals: usize,
    /// Cell writes performed (value and context).
    pub cells_written: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SeriesProjector {
    data_set_names: HashMap<String, String>,
}

impl SeriesProjector {
    pub fn new(data_set_names: HashMap<String, String>) -> Self {
        Self { data_set_names }
    }

    /// Resolve the output column for a dataset.
    pub fn column_for(&self, data_set_id: &str, options: &ProjectionOptions) -> String {
        if let Some(name) = &options.column_name {
            return name.clone();
        }
        self.data_set_names
            .get(data_set_id)
            .cloned()
            .unwrap_or_else(|| data_set_id.to_string())
    }

    /// Annotate `series` in place. The store is only read.
    ///
    /// Rows outside every window keep whatever they held before.
    pub fn project(
        &self,
        store: &SignalStore,
        series: &mut Series,
        pair: &str,
        options: &ProjectionOptions,
    ) -> ProjectionSummary {
        let signals = store.signals_for(pair, options.data_set_id.as_deref());
        let mut summary = ProjectionSummary {
            signals: signals.len(),
            cells_written: 0,
        };

        for signal in signals {
            let column = self.column_for(&signal.data_set_id, options);
            let window = signal.window();

            for row in series.rows.iter_mut().filter(|r| window.contains(r.timestamp)) {
                row.set(&column, Scalar::Number(signal.value));
                summary.cells_written += 1;

                if options.include_context {
                    for (key, value) in &signal.context {
                        row.set(&format!("{column}_{key}"), value.clone());
                        summary.cells_written += 1;
                    }
                }
            }
        }

        summary
    }
}
