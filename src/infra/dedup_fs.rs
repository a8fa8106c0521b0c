use crate::app::ports::DedupIndexPort;
use std::fs;
use std::path::{Path, PathBuf};

/// Treats parsed-output files on disk as the record of processed units.
///
/// Not safe under concurrent runs; the pipeline's running flag covers that.
#[derive(Debug, Default, Clone)]
pub struct FsDedupIndex;

impl DedupIndexPort for FsDedupIndex {
    fn find_output(&self, dir: &Path, signature: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(dir).ok()?;
        let mut matches: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| encodes_signature(&e.file_name().to_string_lossy(), signature))
            .map(|e| e.path())
            .collect();
        // read_dir order is unspecified
        matches.sort();
        matches.into_iter().next()
    }
}

/// True when `name` contains `signature` as a whole token, so `1_<id>` does
/// not match `11_<id>` or `1_<id>x`.
pub fn encodes_signature(name: &str, signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    name.match_indices(signature).any(|(start, _)| {
        let before = name[..start].chars().next_back();
        let after = name[start + signature.len()..].chars().next();
        let boundary = |c: Option<char>| match c {
            None => true,
            Some(c) => !(c.is_alphanumeric() || c == '-'),
        };
        boundary(before) && boundary(after)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_must_be_a_whole_token() {
        assert!(encodes_signature("1_1-abc.json", "1_1-abc"));
        assert!(encodes_signature("parsed_1_1-abc.json", "1_1-abc"));
        assert!(!encodes_signature("11_1-abc.json", "1_1-abc"));
        assert!(!encodes_signature("1_1-abcd.json", "1_1-abc"));
        assert!(!encodes_signature("anything.json", ""));
    }

    #[test]
    fn test_find_output_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2_1-abc.json"), b"{}").unwrap();
        std::fs::create_dir(dir.path().join("1_1-abc")).unwrap();

        let index = FsDedupIndex;
        assert_eq!(
            index.find_output(dir.path(), "2_1-abc"),
            Some(dir.path().join("2_1-abc.json"))
        );
        // directories never count as output
        assert_eq!(index.find_output(dir.path(), "1_1-abc"), None);
        assert_eq!(index.find_output(&dir.path().join("missing"), "2_1-abc"), None);
    }
}
