//! On-disk format: length-prefixed bincode over buffered files, with a
//! zstd-compressed variant for archival outputs.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::Context;

use crate::tables::TableCollection;

impl TableCollection {
    /// # Errors
    ///
    /// Fails if the file cannot be created or the tables cannot be encoded.
    pub fn dump(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create the output file {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write the tables to {}", path.display()))
    }

    /// # Errors
    ///
    /// Fails, naming the file, if `path` cannot be read as a table
    /// collection.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .with_context(|| format!("Failed to open the input file {}", path.display()))?;
        bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("Failed to read {} as a table collection", path.display()))
    }

    /// # Errors
    ///
    /// Fails if the file cannot be created or the compressed stream cannot
    /// be written.
    pub fn dump_zst(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create the output file {}", path.display()))?;
        let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), 0)
            .context("Failed to start the zstd stream")?;
        let encoder = encoder.auto_finish();
        bincode::serialize_into(encoder, self)
            .with_context(|| format!("Failed to write the tables to {}", path.display()))
    }

    /// # Errors
    ///
    /// Fails, naming the file, if `path` cannot be read as a compressed
    /// table collection.
    pub fn load_zst(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .with_context(|| format!("Failed to open the input file {}", path.display()))?;
        let decoder = zstd::stream::read::Decoder::new(BufReader::new(file))
            .context("Failed to start the zstd stream")?;
        bincode::deserialize_from(decoder)
            .with_context(|| format!("Failed to read {} as a table collection", path.display()))
    }

    /// Dispatches on the `.tsz` suffix convention for compressed records.
    ///
    /// # Errors
    ///
    /// See [`TableCollection::load`] and [`TableCollection::load_zst`].
    pub fn load_auto(path: &Path) -> anyhow::Result<Self> {
        if path.extension().is_some_and(|e| e == "tsz") {
            Self::load_zst(path)
        } else {
            Self::load(path)
        }
    }

    /// # Errors
    ///
    /// See [`TableCollection::dump`] and [`TableCollection::dump_zst`].
    pub fn dump_auto(&self, path: &Path) -> anyhow::Result<()> {
        if path.extension().is_some_and(|e| e == "tsz") {
            self.dump_zst(path)
        } else {
            self.dump(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tables::{TableCollection, NODE_IS_SAMPLE, NULL};

    fn sample_tables() -> TableCollection {
        let mut tables = TableCollection::new(100.0);
        tables.add_population(None);
        tables.add_node(NODE_IS_SAMPLE, 0.0, 0, NULL, None);
        tables.add_node(0, 3.0, 0, NULL, None);
        tables.add_edge(0.0, 100.0, 1, 0);
        let site = tables.add_site(12.5, "A");
        tables.add_mutation(site, 0, NULL, 1.5, "T", None);
        tables.metadata.tick = 42;
        tables
    }

    #[test]
    fn dump_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.trees");
        let tables = sample_tables();
        tables.dump(&path).unwrap();
        assert_eq!(TableCollection::load(&path).unwrap(), tables);
    }

    #[test]
    fn compressed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.tsz");
        let tables = sample_tables();
        tables.dump_auto(&path).unwrap();
        assert_eq!(TableCollection::load_auto(&path).unwrap(), tables);
    }

    #[test]
    fn missing_input_names_the_file() {
        let err = TableCollection::load(std::path::Path::new("/no/such/file.trees"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("/no/such/file.trees"));
    }
}
