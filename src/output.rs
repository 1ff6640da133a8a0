//! Tab-separated table output.

use std::io::Write;

use crate::acquisition::AcquisitionResult;
use crate::errors::{DriverError, Result};

/// Header row: the time column followed by one column per channel in label order.
pub fn header(result: &AcquisitionResult, time_scale: f64, v_scale: f64) -> Vec<String> {
    std::iter::once(format!("T [{time_scale:.3} s]"))
        .chain(
            result
                .channels
                .keys()
                .map(|label| format!("{label} [{v_scale:.3} V]")),
        )
        .collect()
}

/// Shortest round-trip form that always keeps a decimal point (`2.0`, `0.5`),
/// with `nan` for padded gaps.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{value:?}")
    }
}

/// Write `result` as a table with one row per timestamp.
pub fn write_table<W: Write>(
    writer: W,
    result: &AcquisitionResult,
    time_scale: f64,
    v_scale: f64,
) -> Result<()> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);

    out.write_record(header(result, time_scale, v_scale))
        .map_err(|e| DriverError::Output(e.to_string()))?;

    for (i, t) in result.timestamps.iter().enumerate() {
        let row = std::iter::once(format_value(*t)).chain(
            result
                .channels
                .values()
                .map(|series| series.get(i).copied().map(format_value).unwrap_or_default()),
        );
        out.write_record(row)
            .map_err(|e| DriverError::Output(e.to_string()))?;
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> AcquisitionResult {
        let mut result = AcquisitionResult {
            timestamps: vec![0.0, 0.5],
            ..Default::default()
        };
        result.channels.insert("CH.3".into(), vec![1.25, 2.0]);
        result.channels.insert("CH.1".into(), vec![0.0, 3.3]);
        result
    }

    #[test]
    fn table_has_time_then_sorted_channels() {
        let mut buf = Vec::new();
        write_table(&mut buf, &sample_result(), 0.001, 1.0).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "T [0.001 s]\tCH.1 [1.000 V]\tCH.3 [1.000 V]");
        assert_eq!(lines[1], "0.0\t0.0\t1.25");
        assert_eq!(lines[2], "0.5\t3.3\t2.0");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn values_keep_a_decimal_point() {
        assert_eq!(format_value(0.0), "0.0");
        assert_eq!(format_value(-2.0), "-2.0");
        assert_eq!(format_value(1.25), "1.25");
        assert_eq!(format_value(f64::NAN), "nan");
    }

    #[test]
    fn writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.tsv");
        let file = std::fs::File::create(&path).unwrap();
        write_table(file, &sample_result(), 1.0, 0.001).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("T [1.000 s]\tCH.1 [0.001 V]"));
    }
}
