//! INI-style run files.
//!
//! Value files, mode files, defaults and autosave files all share one
//! small dialect: `[SECTION]` headers, `key = "value"` entries, `;` or
//! `#` comments. Entries before the first header belong to the global
//! section. Quotes around a value are optional and stripped.

use std::path::Path;

use crate::ConfigError;

/// One named block of key/value entries, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

/// A parsed run file.
#[derive(Debug, Clone, Default)]
pub struct IniFile {
    global: Vec<(String, String)>,
    sections: Vec<Section>,
}

impl IniFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let mut ini = IniFile::default();
        let mut current: Option<Section> = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[') {
                let Some(name) = name.strip_suffix(']') else {
                    return Err(format!("line {}: unterminated section header", lineno + 1));
                };
                if let Some(done) = current.take() {
                    ini.sections.push(done);
                }
                current = Some(Section {
                    name: name.trim().to_string(),
                    entries: Vec::new(),
                });
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("line {}: expected 'key = value'", lineno + 1));
            };
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(format!("line {}: empty key", lineno + 1));
            }
            let value = unquote(value.trim()).to_string();
            match &mut current {
                Some(section) => section.entries.push((key, value)),
                None => ini.global.push((key, value)),
            }
        }
        if let Some(done) = current.take() {
            ini.sections.push(done);
        }
        Ok(ini)
    }

    /// Entries outside any `[SECTION]`, in file order.
    pub fn global(&self) -> &[(String, String)] {
        &self.global
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Section names in file order; their position doubles as the mode
    /// index.
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Strip one optional layer of double quotes.
fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_global_and_sections() {
        let ini = IniFile::parse(
            "; camera run file\nexposure.d = \"1.5\"\n\n[DAY]\nGAIN = \"1.0\"\n# night block\n[NIGHT]\nGAIN = 8.0\n",
        )
        .unwrap();
        assert_eq!(
            ini.global(),
            &[("exposure.d".to_string(), "1.5".to_string())]
        );
        assert_eq!(ini.section_names(), vec!["DAY", "NIGHT"]);
        assert_eq!(
            ini.section("NIGHT").unwrap().entries,
            vec![("GAIN".to_string(), "8.0".to_string())]
        );
        assert!(ini.section("DUSK").is_none());
    }

    #[test]
    fn test_quotes_keep_inner_spaces() {
        let ini = IniFile::parse("OBJECT = \"M 31\"\n").unwrap();
        assert_eq!(ini.global()[0].1, "M 31");
    }

    #[test]
    fn test_malformed_lines_rejected() {
        assert!(IniFile::parse("[OPEN\n").is_err());
        assert!(IniFile::parse("no equals sign\n").is_err());
        assert!(IniFile::parse(" = orphan\n").is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.values");
        let err = IniFile::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
