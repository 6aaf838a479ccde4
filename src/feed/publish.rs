use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::writer::{write_feed, FeedFormat, FeedHeader};
use super::FeedError;
use crate::mapping::{MappedItem, MappingError};

const BACKUP_SUFFIX: &str = "backup";

#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    /// Copy the current published file to `<name>.backup` before replacing it.
    pub backup_previous: bool,
    /// Re-read the finished temp file before publishing it.
    pub validate: bool,
}

/// A feed that made it to its published path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub path: PathBuf,
    pub items: usize,
    pub products: usize,
    pub file_size: u64,
}

/// Removes the temp file unless the publish went through.
struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// `<name>.tmp.<nanos>` next to `path`.
///
/// The suffix is unpredictable enough that combined with `create_new` a
/// pre-planted file or symlink at the temp path makes the open fail instead
/// of being followed.
fn temp_sibling(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.tmp.{nanos:016x}"))
}

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Path of the backup copy kept next to a published feed.
pub fn backup_path(published: &Path) -> PathBuf {
    let name = published
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    published.with_file_name(format!("{name}.{BACKUP_SUFFIX}"))
}

/// Streams `items` into `dir/filename` without ever exposing a partial file.
///
/// The document goes to a temp file first; it is synced, optionally
/// validated, the previous feed is optionally backed up, and only then is
/// the temp file renamed over the published name. On any error the temp
/// file is removed and both the published file and its backup are left
/// as they were.
pub fn publish_feed<I>(
    dir: &Path,
    filename: &str,
    format: FeedFormat,
    header: &FeedHeader,
    items: I,
    options: PublishOptions,
) -> Result<Published, FeedError>
where
    I: IntoIterator<Item = Result<MappedItem, MappingError>>,
{
    fs::create_dir_all(dir)?;
    let target = dir.join(filename);
    let mut temp = TempFile::new(temp_sibling(&target));

    let file = create_new(&temp.path)?;
    let (buffered, summary) = write_feed(items, BufWriter::new(file), format, header)?;
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    if options.validate {
        let found = validate_feed(&temp.path, format)?;
        if found != summary.items {
            return Err(FeedError::Validation(format!(
                "expected {} <{}> elements, found {found}",
                summary.items,
                format.item_element()
            )));
        }
    }

    if options.backup_previous && target.exists() {
        atomic_copy(&target, &backup_path(&target))?;
        tracing::debug!(path = %target.display(), "Backed up previous feed");
    }

    fs::rename(&temp.path, &target)?;
    temp.keep = true;

    let file_size = fs::metadata(&target)?.len();
    tracing::info!(
        path = %target.display(),
        items = summary.items,
        products = summary.products,
        bytes = file_size,
        "Published feed"
    );

    Ok(Published {
        path: target,
        items: summary.items,
        products: summary.products,
        file_size,
    })
}

/// Re-reads a feed with a streaming reader and returns its item count.
///
/// Fails when the document is not well-formed, its root does not match
/// `format`, or elements are left unclosed.
pub fn validate_feed(path: &Path, format: FeedFormat) -> Result<usize, FeedError> {
    // quick-xml never expands DOCTYPE entity declarations and we only look
    // at element names here, so external entities cannot be pulled in.
    let mut reader = Reader::from_reader(BufReader::new(File::open(path)?));
    reader.config_mut().trim_text(true);

    let expected_root: &[u8] = match format {
        FeedFormat::Atom => b"feed",
        FeedFormat::Rss => b"rss",
    };
    let item = format.item_element().as_bytes();

    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut seen_root = false;
    let mut count = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if depth == 0 {
                    if seen_root || e.name().as_ref() != expected_root {
                        return Err(FeedError::Validation(format!(
                            "unexpected root element <{}>",
                            String::from_utf8_lossy(e.name().as_ref())
                        )));
                    }
                    seen_root = true;
                }
                if e.name().as_ref() == item {
                    count += 1;
                }
                depth += 1;
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FeedError::Validation(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(FeedError::Validation("document has no root element".into()));
    }
    if depth != 0 {
        return Err(FeedError::Validation(format!(
            "{depth} element(s) left unclosed"
        )));
    }
    Ok(count)
}

/// Copies `src` over `dst` through a temp file and rename, so `dst` is
/// always either the old copy or the complete new one.
///
/// The content is streamed; only one buffer of it is in memory at a time.
pub fn atomic_copy(src: &Path, dst: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut temp = TempFile::new(temp_sibling(dst));
    let mut writer = BufWriter::new(create_new(&temp.path)?);
    io::copy(&mut reader, &mut writer)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp.path, dst)?;
    temp.keep = true;
    Ok(())
}

/// Writes `bytes` to `path` through a synced temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut temp = TempFile::new(temp_sibling(path));
    let mut file = create_new(&temp.path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp.path, path)?;
    temp.keep = true;
    Ok(())
}
