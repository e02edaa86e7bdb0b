use polars::prelude::{CsvReader, CsvWriter, DataFrame, SerReader, SerWriter};
use std::fs::File;
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};

// Imports a csv panel from a specified path to a Polars DataFrame
//
// A path that does not resolve to a file is reported as `DataNotFound`;
// anything that goes wrong while parsing is a `DataLoad` error. Either way
// the caller is expected to stop the pipeline.
pub fn load_panel(path: &Path) -> Result<DataFrame> {
    if !path.is_file() {
        return Err(PipelineError::DataNotFound(path.to_path_buf()));
    }
    let data = CsvReader::from_path(path)
        .and_then(|reader| reader.has_header(true).finish())
        .map_err(|source| PipelineError::DataLoad {
            path: path.to_path_buf(),
            source,
        })?;
    info!(
        path = %path.display(),
        observations = data.height(),
        variables = data.width(),
        "data loaded"
    );
    Ok(data)
}

// Writes the processed panel as csv, creating the parent directory if needed.
pub fn write_panel(data: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).has_header(true).finish(data)?;
    info!(path = %path.display(), rows = data.height(), "processed data saved");
    Ok(())
}
