//! Registered dataset references and narrowed views over them.

use serde::{Deserialize, Serialize};

/// Pointer to tabular data already registered in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    /// Platform-assigned identity. Views keep this unchanged.
    pub id: String,
    pub name: String,
    pub version: String,
    /// Column names as reported by the platform, when it reports them.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl DatasetRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            columns: None,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Same rows, named columns removed. Names are not checked against the
    /// schema here; the platform rejects unknown ones at submission.
    pub fn drop_columns<I, S>(&self, columns: I) -> DatasetView
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DatasetView::full(self.clone()).drop_columns(columns)
    }
}

/// Derived view: a dataset reference plus the columns excluded from it.
/// Nothing is copied or materialized locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetView {
    source: DatasetRef,
    dropped: Vec<String>,
}

impl DatasetView {
    /// View over the whole dataset.
    pub fn full(source: DatasetRef) -> Self {
        Self {
            source,
            dropped: Vec::new(),
        }
    }

    /// Narrow further. Repeated names are recorded once.
    pub fn drop_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            if !self.dropped.contains(&column) {
                self.dropped.push(column);
            }
        }
        self
    }

    pub fn source(&self) -> &DatasetRef {
        &self.source
    }

    pub fn source_id(&self) -> &str {
        &self.source.id
    }

    pub fn dropped_columns(&self) -> &[String] {
        &self.dropped
    }

    pub fn is_dropped(&self, column: &str) -> bool {
        self.dropped.iter().any(|c| c == column)
    }

    /// Schema after the exclusions, in source order. `None` when the
    /// platform did not report the source schema.
    pub fn retained_columns(&self) -> Option<Vec<String>> {
        self.source.columns.as_ref().map(|columns| {
            columns
                .iter()
                .filter(|c| !self.is_dropped(c))
                .cloned()
                .collect()
        })
    }

    /// Dropped names that the source schema does not contain. Empty when
    /// the schema is unknown.
    pub fn unknown_dropped_columns(&self) -> Vec<String> {
        match &self.source.columns {
            Some(columns) => self
                .dropped
                .iter()
                .filter(|d| !columns.contains(d))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}
