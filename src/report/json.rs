//! JSON persistence of run results.

use crate::types::Result;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Write `value` as pretty JSON to `path`, or to stdout when `path` is `None`.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => {
            fs::write(path, json)?;
            info!("Results written to: {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Write one name per line.
pub fn write_names(names: &[String], path: &Path) -> Result<()> {
    let mut file = std::io::BufWriter::new(fs::File::create(path)?);
    for name in names {
        writeln!(file, "{}", name)?;
    }
    file.flush()?;
    info!("{} names written to: {:?}", names.len(), path);
    Ok(())
}
