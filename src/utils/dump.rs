use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use super::error::SnnError;

/// Strip the trailing pass suffix from a render pass name, `"conv1 pass[0]"` -> `"conv1"`.
pub fn normalize_name(name: &str) -> String {
    let mut tokens: Vec<&str> = name.split_whitespace().collect();
    if tokens.len() > 1 {
        tokens.pop();
    }
    tokens.join(" ")
}

pub fn create_dir_if_not_exists(path: &Path) -> Result<(), SnnError> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Render float rows the way CPU layer dumps are written: each value followed by `", "`,
/// one row per line.
pub fn format_rows(rows: &[Vec<f32>]) -> String {
    let mut out = String::new();
    for row in rows {
        for v in row {
            let _ = write!(out, "{}, ", v);
        }
        out.push('\n');
    }
    out
}

/// Write `<dir>/<name>.txt` with the rows of a CPU output matrix.
pub fn dump_text_outputs(dir: &Path, name: &str, rows: &[Vec<f32>]) -> Result<PathBuf, SnnError> {
    create_dir_if_not_exists(dir)?;
    let path = dir.join(format!("{}.txt", name));
    fs::write(&path, format_rows(rows))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_pass_suffix() {
        assert_eq!(normalize_name("conv1 pass[0]"), "conv1");
        assert_eq!(normalize_name("dense  layer pass[3]"), "dense layer");
        assert_eq!(normalize_name("single"), "single");
    }

    #[test]
    fn rows_are_comma_terminated() {
        let rows = vec![vec![1.0, 2.5], vec![-3.0]];
        assert_eq!(format_rows(&rows), "1, 2.5, \n-3, \n");
    }

    #[test]
    fn text_dump_lands_in_dir() {
        let dir = std::env::temp_dir().join(format!("snn_dump_{}", std::process::id()));
        let path = dump_text_outputs(&dir, "fc cpu layer", &[vec![0.5]]).unwrap();
        assert_eq!(path.file_name().unwrap(), "fc cpu layer.txt");
        assert_eq!(fs::read_to_string(&path).unwrap(), "0.5, \n");
        let _ = fs::remove_dir_all(dir);
    }
}
