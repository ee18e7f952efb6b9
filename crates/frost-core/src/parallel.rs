//! Per-file fan-out used when merging many model output files.

use std::path::PathBuf;

use crate::error::Result;

/// Apply a fallible transform to every path, preserving input order.
///
/// Runs on the rayon pool with the `threading` feature, sequentially otherwise.
/// The first error (in input order) is returned.
pub fn map_files<T, F>(paths: &[PathBuf], f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&PathBuf) -> Result<T> + Sync + Send,
{
    #[cfg(feature = "threading")]
    let results: Vec<Result<T>> = {
        use rayon::prelude::*;
        paths.par_iter().map(&f).collect()
    };
    #[cfg(not(feature = "threading"))]
    let results: Vec<Result<T>> = paths.iter().map(&f).collect();

    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn preserves_order() {
        let paths: Vec<PathBuf> = (0..50).map(|i| PathBuf::from(format!("cell_{i}_x.json"))).collect();
        let names = map_files(&paths, |p| Ok(p.display().to_string())).unwrap();
        assert_eq!(names[7], "cell_7_x.json");
        assert_eq!(names.len(), 50);
    }

    #[test]
    fn propagates_first_error() {
        let paths: Vec<PathBuf> = ["a", "b", "c"].iter().map(PathBuf::from).collect();
        let err = map_files(&paths, |p| {
            if p.as_os_str() == "a" {
                Ok(1)
            } else {
                Err(Error::MissingField(p.display().to_string()))
            }
        })
        .unwrap_err();
        assert!(matches!(err, Error::MissingField(ref s) if s == "b"));
    }
}
