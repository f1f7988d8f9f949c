use std::fs;

use crate::data::Data;
use crate::error::Result;
use crate::mime;
use crate::readers::{at_most_one_arg, Reader};
use crate::source::Source;
use crate::urls;

/// Local filesystem reader. A URL path ending in `/` lists the directory as
/// a sorted JSON array of entry names.
pub struct FileReader;

impl Reader for FileReader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let arg = at_most_one_arg("file", args)?;
        let url = match arg {
            Some(subpath) => urls::resolve_url(source.url(), subpath)?,
            None => source.url().clone(),
        };

        let path = url
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("not a usable file URL: {url}"))?;

        if url.path().ends_with('/') {
            let mut names: Vec<String> = fs::read_dir(&path)
                .map_err(|e| anyhow::anyhow!("couldn't list {}: {e}", path.display()))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();

            source.set_media_type(mime::JSON_ARRAY_MEDIATYPE);
            return Ok(serde_json::to_vec(&names).map_err(anyhow::Error::from)?);
        }

        // a subpath may point at a plain file even when the base was a
        // directory listing, so drop any stale hint
        source.clear_media_type();
        Ok(fs::read(&path).map_err(|e| anyhow::anyhow!("couldn't read {}: {e}", path.display()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use std::io::Write;

    fn file_url(path: &std::path::Path) -> url::Url {
        url::Url::from_file_path(path).unwrap()
    }

    fn dir_url(path: &std::path::Path) -> url::Url {
        url::Url::from_directory_path(path).unwrap()
    }

    #[test]
    fn reads_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(b"{\"a\": 1}").unwrap();

        let data = Data::new();
        let source = Source::new("t", file_url(&path), vec![]);
        let bytes = FileReader.read(&data, &source, &[]).unwrap();
        assert_eq!(bytes, b"{\"a\": 1}");
    }

    #[test]
    fn trailing_slash_lists_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();

        let data = Data::new();
        let source = Source::new("t", dir_url(dir.path()), vec![]);
        let bytes = FileReader.read(&data, &source, &[]).unwrap();
        let names: Vec<String> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(source.media_type_hint().as_deref(), Some(mime::JSON_ARRAY_MEDIATYPE));
    }

    #[test]
    fn listing_on_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        fs::write(&path, "x").unwrap();

        let mut url = file_url(&path);
        url.set_path(&format!("{}/", url.path()));

        let data = Data::new();
        let source = Source::new("t", url, vec![]);
        assert!(FileReader.read(&data, &source, &[]).is_err());
    }

    #[test]
    fn subpath_resolves_against_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("values.yaml"), "k: v").unwrap();

        let data = Data::new();
        let source = Source::new("t", dir_url(dir.path()), vec![]);
        // listing first leaves a hint; the subpath read must clear it
        FileReader.read(&data, &source, &[]).unwrap();
        let bytes = FileReader
            .read(&data, &source, &["values.yaml".to_string()])
            .unwrap();
        assert_eq!(bytes, b"k: v");
        assert_eq!(source.media_type_hint(), None);
    }
}
