//! Line sorting of spill files.
//!
//! Spill files are sorted as raw bytes, line by line. [`ExternalSorter`] shells
//! out to a `sort` executable under the C locale; [`MergeSorter`] does the same
//! job in process with bounded memory: it cuts the input into sorted runs on
//! temporary files and merges them.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Debug;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use log::debug;
use tempfile::NamedTempFile;

use crate::error::{GridShardError, Result};

/// Byte-order line sorting.
pub trait Sorter: Send + Sync + Debug {
    /// Sort the lines of `input` into `output`.
    fn sort(&self, input: &Path, output: &Path) -> Result<()>;

    /// Merge already sorted `inputs` into one sorted `output`.
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

/// Runs a `sort` executable with `LC_ALL=C`.
#[derive(Debug, Clone)]
pub struct ExternalSorter {
    program: PathBuf,
    temp_dir: Option<PathBuf>,
}

impl ExternalSorter {
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        ExternalSorter {
            program: program.as_ref().to_path_buf(),
            temp_dir: None,
        }
    }

    /// Directory for the program's own temporary files (`-T`).
    pub fn with_temp_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.temp_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    fn run(&self, merge: bool, inputs: &[&Path], output: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.env("LC_ALL", "C");
        if merge {
            command.arg("-m");
        }
        if let Some(dir) = &self.temp_dir {
            command.arg("-T").arg(dir);
        }
        command.arg("-o").arg(output).args(inputs);

        let result = command.output().map_err(|e| {
            GridShardError::config(format!(
                "cannot run sort program {}: {e}",
                self.program.display()
            ))
        })?;
        if !result.status.success() {
            return Err(GridShardError::other(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        if !output.is_file() {
            return Err(GridShardError::other(format!(
                "{} produced no output at {}",
                self.program.display(),
                output.display()
            )));
        }
        Ok(())
    }
}

impl Sorter for ExternalSorter {
    fn sort(&self, input: &Path, output: &Path) -> Result<()> {
        self.run(false, &[input], output)
    }

    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let inputs: Vec<&Path> = inputs.iter().map(PathBuf::as_path).collect();
        self.run(true, &inputs, output)
    }
}

/// In-process external merge sort.
#[derive(Debug, Clone)]
pub struct MergeSorter {
    run_lines: usize,
    temp_dir: PathBuf,
}

impl MergeSorter {
    /// Sort with at most `run_lines` lines in memory, spilling runs to `temp_dir`.
    pub fn new<P: AsRef<Path>>(run_lines: usize, temp_dir: P) -> Self {
        MergeSorter {
            run_lines: run_lines.max(1),
            temp_dir: temp_dir.as_ref().to_path_buf(),
        }
    }

    fn write_run(&self, lines: &mut Vec<Vec<u8>>) -> Result<NamedTempFile> {
        lines.sort_unstable();
        let mut run = tempfile::Builder::new()
            .prefix(".run.")
            .tempfile_in(&self.temp_dir)?;
        {
            let mut out = BufWriter::new(run.as_file_mut());
            for line in lines.iter() {
                out.write_all(line)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        lines.clear();
        Ok(run)
    }
}

/// Read the next line without its newline; `None` at end of input.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Some(line))
}

/// K-way merge of sorted line sources into `output`.
fn merge_sources<R: BufRead>(mut sources: Vec<R>, output: &Path) -> Result<u64> {
    let mut out = BufWriter::new(File::create(output)?);
    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (i, source) in sources.iter_mut().enumerate() {
        if let Some(line) = read_line(source)? {
            heap.push(Reverse((line, i)));
        }
    }

    let mut lines = 0;
    while let Some(Reverse((line, i))) = heap.pop() {
        out.write_all(&line)?;
        out.write_all(b"\n")?;
        lines += 1;
        if let Some(next) = read_line(&mut sources[i])? {
            heap.push(Reverse((next, i)));
        }
    }
    out.flush()?;
    Ok(lines)
}

impl Sorter for MergeSorter {
    fn sort(&self, input: &Path, output: &Path) -> Result<()> {
        std::fs::create_dir_all(&self.temp_dir)?;
        let mut reader = BufReader::new(File::open(input)?);
        let mut lines = Vec::new();
        let mut runs = Vec::new();

        while let Some(line) = read_line(&mut reader)? {
            lines.push(line);
            if lines.len() >= self.run_lines {
                runs.push(self.write_run(&mut lines)?);
            }
        }
        if !lines.is_empty() || runs.is_empty() {
            runs.push(self.write_run(&mut lines)?);
        }

        let sources = runs
            .iter()
            .map(|run| Ok(BufReader::new(run.reopen()?)))
            .collect::<Result<Vec<_>>>()?;
        let total = merge_sources(sources, output)?;
        debug!(
            "sorted {} ({} lines, {} runs)",
            input.display(),
            total,
            runs.len()
        );
        Ok(())
    }

    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let sources = inputs
            .iter()
            .map(|path| Ok(BufReader::new(File::open(path)?)))
            .collect::<Result<Vec<_>>>()?;
        let total = merge_sources(sources, output)?;
        debug!("merged {} files into {} ({total} lines)", inputs.len(), output.display());
        Ok(())
    }
}

/// The sorter for a configuration: the external program when one is set,
/// otherwise the in-process sorter.
pub fn sorter_for(sort_path: Option<&Path>, temp_dir: &Path, run_lines: usize) -> Arc<dyn Sorter> {
    match sort_path {
        Some(program) if !program.as_os_str().is_empty() => {
            Arc::new(ExternalSorter::new(program).with_temp_dir(temp_dir))
        }
        _ => Arc::new(MergeSorter::new(run_lines, temp_dir)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut text = lines.join("\n");
        text.push('\n');
        std::fs::write(path, text).unwrap();
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_merge_sorter_multiple_runs() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_lines(&input, &["pear\t1", "apple\t2", "fig\t3", "apple\t1", "Zebra\t4"]);

        MergeSorter::new(2, dir.path()).sort(&input, &output).unwrap();
        assert_eq!(
            read_lines(&output),
            vec!["Zebra\t4", "apple\t1", "apple\t2", "fig\t3", "pear\t1"]
        );
    }

    #[test]
    fn test_merge_sorter_empty_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::write(&input, "").unwrap();

        MergeSorter::new(10, dir.path()).sort(&input, &output).unwrap();
        assert!(output.is_file());
        assert!(read_lines(&output).is_empty());
    }

    #[test]
    fn test_merge_of_sorted_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write_lines(&a, &["apple", "cherry"]);
        write_lines(&b, &["banana", "date"]);
        let output = dir.path().join("out");

        MergeSorter::new(10, dir.path())
            .merge(&[a, b], &output)
            .unwrap();
        assert_eq!(read_lines(&output), vec!["apple", "banana", "cherry", "date"]);
    }

    #[test]
    fn test_external_sorter() {
        let program = Path::new("/usr/bin/sort");
        if !program.exists() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_lines(&input, &["b\t1", "a b\t1", "a\t2", "B\t9"]);

        ExternalSorter::new(program).sort(&input, &output).unwrap();
        assert_eq!(read_lines(&output), vec!["B\t9", "a\t2", "a b\t1", "b\t1"]);
    }

    #[test]
    fn test_external_sorter_missing_program() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        write_lines(&input, &["a"]);

        let sorter = ExternalSorter::new(dir.path().join("no-such-sort"));
        assert!(sorter.sort(&input, &dir.path().join("out")).is_err());
    }

    #[test]
    fn test_sorter_selection() {
        let dir = TempDir::new().unwrap();
        let sorter = sorter_for(None, dir.path(), 100);
        assert!(format!("{sorter:?}").starts_with("MergeSorter"));
        let sorter = sorter_for(Some(Path::new("/usr/bin/sort")), dir.path(), 100);
        assert!(format!("{sorter:?}").starts_with("ExternalSorter"));
    }
}
