use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;

use crate::types::{Entry, Header, Op, CURRENT_VERSION};

/// Default ledger directory, `~/.alloy/ledgers`.
pub fn default_ledger_dir() -> Result<PathBuf> {
    Ok(alloy_home()?.join("ledgers"))
}

/// Default backup directory, `~/.alloy/backups`.
pub fn default_backup_dir() -> Result<PathBuf> {
    Ok(alloy_home()?.join("backups"))
}

/// The alloy state root, `~/.alloy`.
pub fn alloy_home() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set; cannot resolve alloy home")?;
    Ok(PathBuf::from(home).join(".alloy"))
}

/// The file path of a package's ledger within a ledger directory.
pub fn ledger_path(dir: &Path, pkg: &str) -> PathBuf {
    dir.join(format!("{pkg}.jsonl"))
}

/// Per-package append-only log of file system mutations.
///
/// The on-disk format is line-delimited JSON: the header on line 1, one
/// entry per subsequent line. Entries are written with a single `write` of
/// the full line each, so a crashed install leaves a clean prefix.
#[derive(Debug)]
pub struct Ledger {
    pub header: Header,
    pub entries: Vec<Entry>,
    path: PathBuf,
    file: Option<File>,
}

impl Ledger {
    /// Creates a new ledger for a package installation. Fails if a ledger
    /// for the package already exists; the exclusive create is the install
    /// mutual-exclusion mechanism.
    pub fn create(dir: &Path, pkg: &str, source: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create ledger directory: {}", dir.display()))?;

        let path = ledger_path(dir, pkg);
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(anyhow!("ledger already exists for package '{pkg}'"));
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create ledger file: {}", path.display()));
            }
        };

        let header = Header {
            version: CURRENT_VERSION,
            package: pkg.to_string(),
            installed_at: Utc::now(),
            source: source.to_string(),
            source_checksum: None,
        };

        let mut ledger = Self {
            header,
            entries: Vec::new(),
            path,
            file: Some(file),
        };

        let header_record = ledger.header.clone();
        if let Err(err) = ledger.write_line(&header_record) {
            ledger.file = None;
            let _ = fs::remove_file(&ledger.path);
            return Err(err.context("failed to write ledger header"));
        }

        Ok(ledger)
    }

    /// Opens an existing ledger, loading every entry into memory.
    pub fn open(dir: &Path, pkg: &str) -> Result<Self> {
        Self::open_path(&ledger_path(dir, pkg))
    }

    /// Opens a ledger from an explicit file path.
    pub fn open_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open ledger file: {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut header: Option<Header> = None;
        let mut entries = Vec::new();
        let mut line_number = 0usize;

        for line in reader.lines() {
            line_number += 1;
            let line = line
                .with_context(|| format!("failed to read ledger file: {}", path.display()))?;

            if line_number == 1 {
                let parsed: Header = serde_json::from_str(&line)
                    .context("failed to parse ledger header (line 1)")?;
                if parsed.version > CURRENT_VERSION {
                    bail!(
                        "ledger version {} is newer than supported version {}",
                        parsed.version,
                        CURRENT_VERSION
                    );
                }
                header = Some(parsed);
                continue;
            }

            let entry: Entry = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse ledger entry (line {line_number})"))?;
            entries.push(entry);
        }

        let Some(header) = header else {
            bail!("ledger file is empty: {}", path.display());
        };

        Ok(Self {
            header,
            entries,
            path: path.to_path_buf(),
            file: None,
        })
    }

    /// Opens an existing ledger and reopens the underlying file for append,
    /// so further [`record`](Self::record) calls extend it.
    pub fn append(dir: &Path, pkg: &str) -> Result<Self> {
        let mut ledger = Self::open(dir, pkg)?;
        let file = OpenOptions::new()
            .append(true)
            .open(&ledger.path)
            .with_context(|| {
                format!("failed to open ledger for append: {}", ledger.path.display())
            })?;
        ledger.file = Some(file);
        Ok(ledger)
    }

    /// Writes a new entry to the ledger. The entry is persisted immediately
    /// as one full line; its timestamp is assigned now if unset.
    pub fn record(&mut self, mut entry: Entry) -> Result<()> {
        if entry.timestamp.is_none() {
            entry.timestamp = Some(Utc::now());
        }
        self.write_line(&entry).context("failed to write ledger entry")?;
        self.entries.push(entry);
        Ok(())
    }

    /// Fsyncs and closes the ledger file. An fsync failure surfaces; the
    /// handle is dropped either way.
    pub fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .with_context(|| format!("failed to sync ledger: {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Closes the ledger and removes its file from disk.
    pub fn delete(mut self) -> Result<()> {
        self.file = None;
        fs::remove_file(&self.path)
            .with_context(|| format!("failed to remove ledger file: {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in undo order, newest first.
    pub fn reverse_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().rev()
    }

    /// Entries matching an operation kind, in recorded order.
    pub fn filter_by_op(&self, op: Op) -> Vec<&Entry> {
        self.entries.iter().filter(|entry| entry.op == op).collect()
    }

    /// Entries affecting a specific path, in recorded order.
    pub fn filter_by_path(&self, path: &Path) -> Vec<&Entry> {
        self.entries.iter().filter(|entry| entry.path == path).collect()
    }

    fn write_line<T: serde::Serialize>(&mut self, value: &T) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| anyhow!("ledger not open for writing"))?;
        let mut line = serde_json::to_vec(value).context("failed to serialize ledger record")?;
        line.push(b'\n');
        file.write_all(&line)
            .with_context(|| format!("failed to write ledger file: {}", self.path.display()))
    }
}

/// Returns the package names of all ledgers in a directory.
pub fn list(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read ledger directory: {}", dir.display()));
        }
    };

    let mut packages = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read ledger directory: {}", dir.display()))?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(package) = name.strip_suffix(".jsonl") {
            packages.push(package.to_string());
        }
    }
    packages.sort();
    Ok(packages)
}

/// Whether a ledger exists for the given package.
pub fn exists(dir: &Path, pkg: &str) -> bool {
    ledger_path(dir, pkg).exists()
}

/// Streaming ledger reader: parses the header up front and yields entries
/// one at a time without loading the whole file.
pub struct LedgerStream {
    lines: io::Lines<BufReader<File>>,
    header: Header,
    line_number: usize,
}

impl LedgerStream {
    pub fn open(dir: &Path, pkg: &str) -> Result<Self> {
        Self::open_path(&ledger_path(dir, pkg))
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open ledger file: {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let first = lines
            .next()
            .ok_or_else(|| anyhow!("ledger file is empty: {}", path.display()))?
            .with_context(|| format!("failed to read ledger file: {}", path.display()))?;
        let header: Header =
            serde_json::from_str(&first).context("failed to parse ledger header (line 1)")?;
        if header.version > CURRENT_VERSION {
            bail!(
                "ledger version {} is newer than supported version {}",
                header.version,
                CURRENT_VERSION
            );
        }

        Ok(Self {
            lines,
            header,
            line_number: 1,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

impl Iterator for LedgerStream {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.lines.next()? {
            Ok(line) => line,
            Err(err) => return Some(Err(err).context("failed to read ledger file")),
        };
        self.line_number += 1;
        let line_number = self.line_number;
        Some(
            serde_json::from_str(&line)
                .with_context(|| format!("failed to parse ledger entry (line {line_number})")),
        )
    }
}
