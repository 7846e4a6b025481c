//! Read-only commands over an existing container.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use komi_container::Container;
use std::fs;
use std::io::Write;
use std::path::Path;

fn open(path: &Path) -> Result<Container> {
    Container::open(path).or_raise(|| ErrorKind::Container)
}

/// Print the chapter table, one chapter per line.
pub fn list(path: &Path, out: &mut impl Write) -> Result<()> {
    let container = open(path)?;
    for chapter in container.chapters() {
        writeln!(out, "{chapter}\t{}", chapter.key).or_raise(|| ErrorKind::Io)?;
    }
    Ok(())
}

/// Look up a chapter's pages and either write them to `directory` as
/// `001.bin`, `002.bin`, ... or print their sizes.
pub fn get(path: &Path, key: &str, directory: Option<&Path>, out: &mut impl Write) -> Result<()> {
    let container = open(path)?;
    let Some(pages) = container.lookup(key).or_raise(|| ErrorKind::Container)? else {
        exn::bail!(ErrorKind::NotFound(key.to_string()));
    };
    match directory {
        Some(directory) => {
            fs::create_dir_all(directory).or_raise(|| ErrorKind::Io)?;
            for (number, page) in pages.iter().enumerate() {
                let file = directory.join(format!("{:03}.bin", number + 1));
                fs::write(&file, page).or_raise(|| ErrorKind::Io)?;
            }
            writeln!(out, "Wrote {} page(s) to {}", pages.len(), directory.display()).or_raise(|| ErrorKind::Io)?;
        },
        None => {
            for (number, page) in pages.iter().enumerate() {
                writeln!(out, "{:03}\t{} bytes", number + 1, page.len()).or_raise(|| ErrorKind::Io)?;
            }
        },
    }
    Ok(())
}

/// Print the header offsets and table sizes.
pub fn info(path: &Path, out: &mut impl Write) -> Result<()> {
    let container = open(path)?;
    let size = fs::metadata(path).or_raise(|| ErrorKind::Io)?.len();
    let header = container.header();
    let lines = [
        format!("path:             {}", path.display()),
        format!("size:             {size}"),
        format!("chapters offset:  {}", header.chapters_offset),
        format!("table offset:     {}", header.table_offset),
        format!("elements offset:  {}", header.elements_offset),
        format!("images offset:    {}", header.images_offset),
        format!("buckets:          {}", container.bucket_count()),
        format!("chapters:         {}", container.chapters().len()),
    ];
    for line in lines {
        writeln!(out, "{line}").or_raise(|| ErrorKind::Io)?;
    }
    Ok(())
}
