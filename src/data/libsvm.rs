//! Reader for the sparse LibSVM text format: `label index:value index:value ...`.

use std::io::BufRead;

use log::debug;

use super::{DataErr, DataPoint, Dataset, Result};

/// How to interpret the label column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Labels {
    /// `1` maps to `1.0`, anything else (`-1`, `0`, `2`...) maps to `0.0`.
    Binary,
    /// The label is kept as is, classes are expected to be `0..classes`.
    Multiclass,
}

/// Reads a LibSVM dataset.
///
/// Blank lines are skipped. Indices are kept as written.
///
/// # Arguments
/// * `reader` - The source of the text.
/// * `labels` - How to interpret the first column.
///
/// # Returns
/// The parsed dataset or a `DataErr` pointing at the first malformed line.
pub fn read<R: BufRead>(reader: R, labels: Labels) -> Result<Dataset> {
    let mut points = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        points.push(parse_line(line, n + 1, labels)?);
    }

    debug!(points = points.len(); "libsvm dataset loaded");
    Ok(Dataset::new(points))
}

fn parse_line(line: &str, n: usize, labels: Labels) -> Result<DataPoint> {
    let malformed = |detail: String| DataErr::Malformed { line: n, detail };

    let mut parts = line.split_whitespace();
    let raw_label = parts
        .next()
        .ok_or_else(|| malformed("missing label".to_string()))?;

    let label: f32 = raw_label
        .parse()
        .map_err(|_| malformed(format!("invalid label `{raw_label}`")))?;

    let label = match labels {
        Labels::Binary if label == 1. => 1.,
        Labels::Binary => 0.,
        Labels::Multiclass => label,
    };

    let mut indices = Vec::new();
    let mut values = Vec::new();

    for part in parts {
        let (idx, value) = part
            .split_once(':')
            .ok_or_else(|| malformed(format!("expected `index:value`, got `{part}`")))?;

        let idx = idx
            .parse()
            .map_err(|_| malformed(format!("invalid index `{idx}`")))?;
        let value = value
            .parse()
            .map_err(|_| malformed(format!("invalid value `{value}`")))?;

        indices.push(idx);
        values.push(value);
    }

    DataPoint::sparse(indices, values, label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_binary_labels() {
        let text = "1 0:0.5 3:1\n-1 2:2\n\n";
        let dataset = read(text.as_bytes(), Labels::Binary).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.get(0).label(), 1.);
        assert_eq!(dataset.get(0).indices(), &[0, 3]);
        assert_eq!(dataset.get(0).values(), &[0.5, 1.]);
        assert_eq!(dataset.get(1).label(), 0.);
        assert_eq!(dataset.features(), 4);
    }

    #[test]
    fn keeps_multiclass_labels() {
        let dataset = read("2 1:1".as_bytes(), Labels::Multiclass).unwrap();
        assert_eq!(dataset.get(0).label(), 2.);
    }

    #[test]
    fn reports_malformed_line() {
        let err = read("1 0:1\n0 oops".as_bytes(), Labels::Binary).unwrap_err();
        assert!(matches!(err, DataErr::Malformed { line: 2, .. }));
    }
}
