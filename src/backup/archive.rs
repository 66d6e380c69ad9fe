// pgsnapshot/src/backup/archive.rs
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, Header};
use tempfile::NamedTempFile;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// Name of the single entry inside a `.tar.gz` artifact.
pub const TAR_ENTRY_NAME: &str = "dump.sql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// Gzip stream of the SQL script.
    Gzip,
    /// Uncompressed SQL script.
    Sql,
    /// Gzip-compressed tar holding the SQL script as `dump.sql`.
    TarGz,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Gzip => "gz",
            ArtifactFormat::Sql => "sql",
            ArtifactFormat::TarGz => "tar.gz",
        }
    }
}

impl FromStr for ArtifactFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "gz" | "gzip" => Ok(ArtifactFormat::Gzip),
            "sql" | "plain" => Ok(ArtifactFormat::Sql),
            "tar.gz" | "tgz" => Ok(ArtifactFormat::TarGz),
            other => Err(format!("expected 'gz', 'sql' or 'tar.gz', got '{other}'")),
        }
    }
}

/// Streaming sink for the dump.
///
/// Every `write_all` compresses the chunk and awaits the disk write before
/// returning, so a producer that awaits its writes can never run ahead of
/// the file. The artifact is only complete after `finish`.
pub struct ArtifactWriter {
    path: PathBuf,
    format: ArtifactFormat,
    file: BufWriter<File>,
    encoder: Option<GzEncoder<Vec<u8>>>,
    // `.tar.gz` needs the entry size up front, so the script is spooled
    // to a scratch file first. Removed on drop.
    spool: Option<NamedTempFile>,
    bytes_in: u64,
    peak_buffered: usize,
}

impl ArtifactWriter {
    /// Creates the artifact at `path`. Fails if the file already exists.
    pub async fn create(path: &Path, format: ArtifactFormat) -> io::Result<Self> {
        let (file, spool) = match format {
            ArtifactFormat::TarGz => {
                let parent = path.parent().unwrap_or_else(|| Path::new("."));
                let spool = tempfile::Builder::new()
                    .prefix(".pgsnapshot-spool-")
                    .suffix(".sql")
                    .tempfile_in(parent)?;
                let file = File::from_std(spool.as_file().try_clone()?);
                (file, Some(spool))
            }
            ArtifactFormat::Gzip | ArtifactFormat::Sql => {
                let file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(path)
                    .await?;
                (file, None)
            }
        };

        let encoder = match format {
            ArtifactFormat::Gzip => Some(GzEncoder::new(Vec::new(), Compression::default())),
            ArtifactFormat::Sql | ArtifactFormat::TarGz => None,
        };

        debug!(path = %path.display(), format = format.extension(), "opened artifact writer");
        Ok(ArtifactWriter {
            path: path.to_path_buf(),
            format,
            file: BufWriter::new(file),
            encoder,
            spool,
            bytes_in: 0,
            peak_buffered: 0,
        })
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.bytes_in += buf.len() as u64;
        match &mut self.encoder {
            Some(encoder) => {
                encoder.write_all(buf)?;
                let compressed = std::mem::take(encoder.get_mut());
                self.peak_buffered = self.peak_buffered.max(compressed.len());
                if !compressed.is_empty() {
                    self.file.write_all(&compressed).await?;
                }
            }
            None => {
                self.peak_buffered = self.peak_buffered.max(buf.len());
                self.file.write_all(buf).await?;
            }
        }
        Ok(())
    }

    /// Writes `line` followed by a newline.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.write_all(line.as_bytes()).await?;
        self.write_all(b"\n").await
    }

    /// Uncompressed bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_in
    }

    /// Largest chunk the writer held in memory between two disk writes.
    pub fn peak_buffered(&self) -> usize {
        self.peak_buffered
    }

    /// Finalizes compression, flushes and fsyncs the artifact, and returns
    /// its size on disk.
    pub async fn finish(self) -> io::Result<u64> {
        let mut file = self.file;
        if let Some(encoder) = self.encoder {
            let trailer = encoder.finish()?;
            file.write_all(&trailer).await?;
        }
        file.flush().await?;
        let file = file.into_inner();
        file.sync_all().await?;
        drop(file);

        if let Some(spool) = self.spool {
            let artifact_path = self.path.clone();
            tokio::task::spawn_blocking(move || write_tar_gz(spool, &artifact_path))
                .await
                .map_err(io::Error::other)??;
        }

        let size = tokio::fs::metadata(&self.path).await?.len();
        debug!(
            path = %self.path.display(),
            format = self.format.extension(),
            uncompressed_bytes = self.bytes_in,
            size_bytes = size,
            "artifact finalized"
        );
        Ok(size)
    }
}

fn write_tar_gz(spool: NamedTempFile, archive_dest_path: &Path) -> io::Result<()> {
    let mut source = spool.reopen()?;
    let size = source.metadata()?.len();

    let archive_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(archive_dest_path)?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    let mut header = Header::new_gnu();
    header.set_size(size);
    header.set_mode(0o600);
    header.set_mtime(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );
    header.set_cksum();
    tar_builder.append_data(&mut header, TAR_ENTRY_NAME, &mut source)?;

    let encoder = tar_builder.into_inner()?;
    let archive_file = encoder.finish()?;
    archive_file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_format_parsing_and_extensions() {
        assert_eq!("gz".parse::<ArtifactFormat>(), Ok(ArtifactFormat::Gzip));
        assert_eq!(".tar.gz".parse::<ArtifactFormat>(), Ok(ArtifactFormat::TarGz));
        assert_eq!("SQL".parse::<ArtifactFormat>(), Ok(ArtifactFormat::Sql));
        assert!("zip".parse::<ArtifactFormat>().is_err());
        assert_eq!(ArtifactFormat::TarGz.extension(), "tar.gz");
    }

    #[tokio::test]
    async fn test_gzip_artifact_is_complete_after_finish() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.gz");

        let mut writer = ArtifactWriter::create(&path, ArtifactFormat::Gzip).await?;
        writer.write_line("CREATE TABLE t (id integer);").await?;
        for i in 0..1000 {
            writer.write_line(&format!("{i}")).await?;
        }
        let size = writer.finish().await?;

        assert_eq!(size, std::fs::metadata(&path)?.len());
        let mut decoded = String::new();
        GzDecoder::new(std::fs::File::open(&path)?).read_to_string(&mut decoded)?;
        assert!(decoded.starts_with("CREATE TABLE t (id integer);\n0\n1\n"));
        assert!(decoded.ends_with("998\n999\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_artifact_is_not_overwritten() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("taken.sql");
        std::fs::write(&path, b"keep me")?;

        assert!(ArtifactWriter::create(&path, ArtifactFormat::Sql).await.is_err());
        assert_eq!(std::fs::read(&path)?, b"keep me");
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_stays_bounded_for_large_input() -> anyhow::Result<()> {
        const CHUNK: usize = 64 * 1024;
        const TOTAL: usize = 8 * 1024 * 1024;
        const BUDGET: usize = 256 * 1024;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("large.gz");
        let mut writer = ArtifactWriter::create(&path, ArtifactFormat::Gzip).await?;

        for (i, _) in (0..TOTAL).step_by(CHUNK).enumerate() {
            writer.write_all(&noise(CHUNK, i as u64)).await?;
            assert!(writer.peak_buffered() <= BUDGET);
        }
        assert_eq!(writer.bytes_written(), TOTAL as u64);
        let peak = writer.peak_buffered();
        writer.finish().await?;

        assert!(peak <= BUDGET, "peak buffered {peak} exceeds {BUDGET}");
        let mut decoded = Vec::new();
        GzDecoder::new(std::fs::File::open(&path)?).read_to_end(&mut decoded)?;
        assert_eq!(decoded.len(), TOTAL);
        Ok(())
    }

    #[tokio::test]
    async fn test_tar_gz_holds_single_entry_and_removes_spool() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.tar.gz");

        let mut writer = ArtifactWriter::create(&path, ArtifactFormat::TarGz).await?;
        writer.write_line("CREATE TABLE t (id integer);").await?;
        writer.write_line("COPY t (id) FROM stdin;").await?;
        writer.write_line("1").await?;
        writer.write_line("\\.").await?;
        writer.finish().await?;

        let mut archive = tar::Archive::new(GzDecoder::new(std::fs::File::open(&path)?));
        let mut entries = archive.entries()?;
        let mut entry = entries.next().expect("archive has an entry")?;
        assert_eq!(entry.path()?.to_string_lossy(), TAR_ENTRY_NAME);
        let mut contents = String::new();
        entry.read_to_string(&mut contents)?;
        assert_eq!(contents, "CREATE TABLE t (id integer);\nCOPY t (id) FROM stdin;\n1\n\\.\n");
        drop(entry);
        assert!(entries.next().is_none());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("out.tar.gz")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_tar_writer_leaves_nothing_behind() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("aborted.tar.gz");

        let mut writer = ArtifactWriter::create(&path, ArtifactFormat::TarGz).await?;
        writer.write_line("partial").await?;
        drop(writer);

        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }
}
